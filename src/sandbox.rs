//! Sandbox provisioning
//!
//! Builds an isolated, git-backed project per scenario: a bare remote, a
//! working clone with a fixed identity, a seed commit pushed upstream,
//! and optionally a local marketplace whose plugin entry is a symlink to
//! the real plugin source tree.
//!
//! Every build stage is fatal on failure; the caller keeps the partially
//! constructed [`Sandbox`] so cleanup can still run.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::common::{Error, Result};
use crate::exec::{InvokeRequest, Invoker};
use crate::scenario::SandboxConfig;

/// Timeout for provisioning commands (git, hook scripts).
const PROVISION_TIMEOUT: Duration = Duration::from_secs(120);

/// Fixed identity so sandbox commits are deterministic and hermetic.
const GIT_IDENTITY: [(&str, &str); 4] = [
    ("GIT_AUTHOR_NAME", "Test User"),
    ("GIT_AUTHOR_EMAIL", "test@example.com"),
    ("GIT_COMMITTER_NAME", "Test User"),
    ("GIT_COMMITTER_EMAIL", "test@example.com"),
];

/// Paths of a provisioned sandbox
///
/// Exclusively owned by the running scenario; `cleanup` must run on every
/// exit path unless the operator asked to keep the tree.
#[derive(Debug)]
pub struct Sandbox {
    /// Temp root holding everything below
    pub base_dir: PathBuf,
    /// Bare git remote
    pub remote_dir: PathBuf,
    /// Cloned working copy
    pub work_dir: PathBuf,
    /// Local marketplace with the symlinked plugin, when requested
    pub plugin_dir: Option<PathBuf>,
}

impl Sandbox {
    /// Create the temp root; `build` fills in the rest.
    pub fn create() -> Result<Self> {
        let base_dir = tempfile::Builder::new()
            .prefix("agent-harness-")
            .tempdir()?
            .keep();
        let remote_dir = base_dir.join("remote.git");
        let work_dir = base_dir.join("project");
        Ok(Self {
            base_dir,
            remote_dir,
            work_dir,
            plugin_dir: None,
        })
    }

    /// Run the provisioning stages against the created root.
    pub async fn build(
        &mut self,
        invoker: &dyn Invoker,
        plugin_root: Option<&Path>,
        cfg: &SandboxConfig,
    ) -> Result<()> {
        let remote = self.remote_dir.display().to_string();
        let work = self.work_dir.display().to_string();

        self.git(invoker, &self.base_dir, &["init", "--bare", remote.as_str()])
            .await?;
        self.git(invoker, &self.base_dir, &["clone", remote.as_str(), work.as_str()])
            .await?;
        self.git(
            invoker,
            &self.work_dir,
            &["config", "user.email", "test@example.com"],
        )
        .await?;
        self.git(
            invoker,
            &self.work_dir,
            &["config", "user.name", "Test User"],
        )
        .await?;

        for (rel_path, content) in &cfg.files {
            let abs_path = self.work_dir.join(rel_path);
            if let Some(parent) = abs_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&abs_path, content)?;
        }

        // At least one file, so the initial commit is never empty.
        let readme = self.work_dir.join("README.md");
        if !readme.exists() {
            if let Some(parent) = readme.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&readme, "# Test Project\n")?;
        }

        self.git(invoker, &self.work_dir, &["add", "-A"]).await?;
        self.git(
            invoker,
            &self.work_dir,
            &["commit", "-m", "initial commit"],
        )
        .await?;
        self.git(
            invoker,
            &self.work_dir,
            &["push", "-u", "origin", "HEAD"],
        )
        .await?;

        let plugin = match plugin_root {
            Some(root) if cfg.plugin_link || cfg.setup_hook || cfg.plugin_config => {
                Some(detect_plugin(root)?)
            }
            _ => None,
        };

        if cfg.plugin_link {
            if let Some(plugin) = &plugin {
                self.link_marketplace(plugin)?;
            }
        }

        if cfg.setup_hook {
            let plugin = plugin.as_ref().ok_or_else(|| {
                Error::Provision("setup hook requested but no plugin directory resolved".into())
            })?;
            let script = plugin.source_dir.join("scripts").join("sandbox-setup.sh");
            let outcome = invoker.invoke(self.hook_request(&script)).await?;
            if !outcome.success() {
                return Err(Error::Provision(format!(
                    "sandbox-setup hook failed (exit {}): {}",
                    outcome.exit_code,
                    outcome.output.trim()
                )));
            }
        }

        if cfg.plugin_config {
            let plugin = plugin.as_ref().ok_or_else(|| {
                Error::Provision("plugin config requested but no plugin directory resolved".into())
            })?;
            let config_dir = self.work_dir.join(format!(".{}", plugin.name));
            fs::create_dir_all(&config_dir)?;
            fs::write(
                config_dir.join("config.json"),
                serde_json::to_string_pretty(&json!({ "enabled": true }))?,
            )?;

            // Preflight is best-effort; a broken hook must not block tests.
            let script = plugin.source_dir.join("scripts").join("plugin-preflight.sh");
            if let Err(e) = invoker.invoke(self.hook_request(&script)).await {
                tracing::debug!(error = %e, "plugin preflight failed");
            }
        }

        Ok(())
    }

    /// Remove the whole sandbox tree.
    pub fn cleanup(&self) {
        let _ = fs::remove_dir_all(&self.base_dir);
    }

    async fn git(&self, invoker: &dyn Invoker, cwd: &Path, args: &[&str]) -> Result<()> {
        let req = InvokeRequest::new("git", cwd)
            .args(args.iter().copied())
            .envs(
                GIT_IDENTITY
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string())),
            )
            .timeout(PROVISION_TIMEOUT);
        let outcome = invoker.invoke(req).await?;
        if !outcome.success() {
            return Err(Error::Provision(format!(
                "git {} failed (exit {}): {}",
                args.join(" "),
                outcome.exit_code,
                outcome.output.trim()
            )));
        }
        Ok(())
    }

    fn hook_request(&self, script: &Path) -> InvokeRequest {
        InvokeRequest::new("bash", &self.work_dir)
            .arg(script.display().to_string())
            .env("CLAUDE_PROJECT_DIR", self.work_dir.display().to_string())
            .timeout(PROVISION_TIMEOUT)
    }

    /// Build the local marketplace: a catalog document plus a symlink to
    /// the real plugin source, so steps resolve the plugin through a
    /// symlink rather than a copy.
    fn link_marketplace(&mut self, plugin: &PluginIdentity) -> Result<()> {
        let plugin_dir = self.base_dir.join("local-plugins");
        let marketplace_dir = plugin_dir.join(".claude-plugin");
        fs::create_dir_all(&marketplace_dir)?;

        let catalog = json!({
            "name": "test-marketplace",
            "plugins": [
                { "name": plugin.name, "dir": format!("plugins/{}", plugin.name) }
            ]
        });
        fs::write(
            marketplace_dir.join("marketplace.json"),
            serde_json::to_string_pretty(&catalog)?,
        )?;

        let plugins_dir = plugin_dir.join("plugins");
        fs::create_dir_all(&plugins_dir)?;
        symlink_dir(&plugin.source_dir, &plugins_dir.join(&plugin.name)).map_err(|e| {
            Error::Provision(format!("symlink {}: {}", plugin.name, e))
        })?;

        self.plugin_dir = Some(plugin_dir);
        Ok(())
    }
}

/// Identity of the plugin under test, read from the real marketplace
/// manifest under the resolved plugin directory.
#[derive(Debug, Clone)]
pub struct PluginIdentity {
    pub name: String,
    pub source_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct MarketplaceManifest {
    #[serde(default)]
    plugins: Vec<CatalogPlugin>,
}

#[derive(Debug, Deserialize)]
struct CatalogPlugin {
    name: String,
    #[serde(default, alias = "dir")]
    source: Option<String>,
}

/// Read the first catalog entry of `<plugin_root>/.claude-plugin/marketplace.json`.
pub fn detect_plugin(plugin_root: &Path) -> Result<PluginIdentity> {
    let manifest_path = plugin_root.join(".claude-plugin").join("marketplace.json");
    let data = fs::read_to_string(&manifest_path).map_err(|e| {
        Error::Provision(format!(
            "cannot read marketplace manifest {}: {}",
            manifest_path.display(),
            e
        ))
    })?;
    let manifest: MarketplaceManifest = serde_json::from_str(&data).map_err(|e| {
        Error::Provision(format!(
            "invalid marketplace manifest {}: {}",
            manifest_path.display(),
            e
        ))
    })?;
    let entry = manifest.plugins.first().ok_or_else(|| {
        Error::Provision(format!(
            "marketplace manifest {} lists no plugins",
            manifest_path.display()
        ))
    })?;

    let rel = entry
        .source
        .clone()
        .unwrap_or_else(|| format!("plugins/{}", entry.name));
    let rel = rel.trim_start_matches("./");

    Ok(PluginIdentity {
        name: entry.name.clone(),
        source_dir: plugin_root.join(rel),
    })
}

#[cfg(unix)]
fn symlink_dir(src: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[cfg(windows)]
fn symlink_dir(src: &Path, dst: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(src, dst)
}
