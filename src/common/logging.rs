//! Logging and tracing configuration
//!
//! The harness logs to stderr so that report output on stdout stays
//! clean. `--verbose` raises the default level to DEBUG, which echoes
//! every command line and truncated output.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing for the CLI (stderr logging)
///
/// Logs are controlled by the `RUST_LOG` environment variable; when it is
/// unset the default level is INFO, or DEBUG with `verbose`.
pub fn init_cli(verbose: bool) {
    let default_filter = if verbose {
        "agent_harness=debug,warn"
    } else {
        "agent_harness=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}
