use crate::paths;
use crate::plugins::native::DEFAULT_EXTENSIONS;
use crate::signature::TrustAnchor;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Where plugin binaries live. Defaults to the executable's directory.
    pub plugin_dir: Option<PathBuf>,
    pub extensions: Vec<String>,
    /// Name of the statically linked module scanned first.
    pub embedded_plugin: Option<String>,
    pub refresh_interval_ms: u64,
    /// Bound on the shutdown drain. Unset waits for every plugin.
    pub drain_timeout_ms: Option<u64>,
    pub signature: SignatureConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    pub enabled: bool,
    pub online_revocation: bool,
    pub policy_oids: Vec<String>,
    pub trust_anchors: Vec<TrustAnchor>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            plugin_dir: None,
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            embedded_plugin: Some(crate::builtin::MODULE_NAME.to_string()),
            refresh_interval_ms: 1000,
            drain_timeout_ms: None,
            signature: SignatureConfig::default(),
        }
    }
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            online_revocation: true,
            policy_oids: Vec::new(),
            trust_anchors: Vec::new(),
        }
    }
}

impl HostConfig {
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path()?)
    }

    /// Missing file means defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn plugin_dir(&self) -> Result<PathBuf> {
        match &self.plugin_dir {
            Some(dir) => Ok(dir.clone()),
            None => paths::app_dir(),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms.max(50))
    }

    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_ms.map(Duration::from_millis)
    }
}
