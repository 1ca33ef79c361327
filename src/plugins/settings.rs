use super::contract::SettingsStore;
use super::Guid;
use crate::paths;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// `{ "<GUID>": { "<key>": <value>, ... }, ... }`
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SettingsFile {
    #[serde(flatten)]
    pub plugins: HashMap<Guid, HashMap<String, Value>>,
}

/// Settings persisted as one JSON file, partitioned by plugin GUID.
pub struct JsonSettingsStore {
    path: PathBuf,
    cache: Mutex<SettingsFile>,
}

impl JsonSettingsStore {
    pub fn open_default() -> Result<Self> {
        Self::open(paths::settings_path()?)
    }

    /// A missing or corrupt file starts out empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cache = match load(&path) {
            Ok(file) => file,
            Err(e) => {
                log::warn!("Ignoring unreadable settings file {}: {}", path.display(), e);
                SettingsFile::default()
            }
        };
        Ok(Self {
            path,
            cache: Mutex::new(cache),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonSettingsStore {
    fn get(&self, plugin: Guid, key: &str) -> Option<Value> {
        let cache = self.cache.lock().unwrap();
        cache.plugins.get(&plugin)?.get(key).cloned()
    }

    fn set(&self, plugin: Guid, key: &str, value: Value) -> Result<()> {
        let mut cache = self.cache.lock().unwrap();
        cache.plugins.entry(plugin).or_default().insert(key.to_string(), value);
        save(&self.path, &cache)
    }
}

fn load(path: &Path) -> Result<SettingsFile> {
    if !path.exists() {
        return Ok(SettingsFile::default());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn save(path: &Path, settings: &SettingsFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, content)?;
    Ok(())
}
