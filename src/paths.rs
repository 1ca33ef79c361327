use anyhow::{Context, Result};
use std::path::PathBuf;

pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .context("Could not determine config directory")
        .map(|p| p.join("tray-host"))
}

pub fn config_path() -> Result<PathBuf> {
    config_dir().map(|p| p.join("config.toml"))
}

pub fn settings_path() -> Result<PathBuf> {
    config_dir().map(|p| p.join("settings.json"))
}

/// Instance lock files. Prefers the per-session runtime dir so locks never
/// outlive a login.
pub fn locks_dir() -> Result<PathBuf> {
    match dirs::runtime_dir() {
        Some(dir) => Ok(dir.join("tray-host").join("locks")),
        None => config_dir().map(|p| p.join("locks")),
    }
}

/// Directory holding the host executable, the default plugin directory.
pub fn app_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Could not locate host executable")?;
    exe.parent()
        .map(PathBuf::from)
        .context("Host executable has no parent directory")
}

pub fn open_path(path: &std::path::Path) -> Result<()> {
    open::that(path)?;
    Ok(())
}
