#[cfg(target_os = "linux")]
mod linux;

#[cfg(not(target_os = "linux"))]
mod standard;

#[cfg(target_os = "macos")]
mod macos;

use super::TrayContext;
use anyhow::Result;

#[cfg(target_os = "linux")]
pub fn run(context: TrayContext) -> Result<()> {
    linux::run(context)
}

#[cfg(not(target_os = "linux"))]
pub fn run(context: TrayContext) -> Result<()> {
    #[cfg(target_os = "macos")]
    macos::prepare_application();

    standard::run(context)
}
