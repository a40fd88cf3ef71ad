use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// Daemon settings, loadable from a toml file. CLI flags override these.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// TCP address the channel listener binds.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Device database path; `None` means a transient in-memory store.
    #[serde(default)]
    pub db_path: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { listen: default_listen(), db_path: None }
    }
}

fn default_listen() -> String {
    "127.0.0.1:6001".to_string()
}

impl DaemonConfig {
    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        if config.listen.trim().is_empty() {
            anyhow::bail!("listen address must not be empty");
        }
        Ok(config)
    }
}
