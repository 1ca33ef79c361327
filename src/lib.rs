//! A tray icon host for binary plugins.
//!
//! The host finds plugin binaries next to its executable, checks their
//! signatures, instantiates every compatible plugin type and merges what the
//! plugins offer into one tray icon, tooltip and context menu.

pub mod builtin;
pub mod config;
pub mod daemon;
pub mod error;
pub mod menu;
pub mod paths;
pub mod platform;
pub mod plugins;
pub mod signature;
pub mod sleeper;
pub mod tray;

use plugins::Guid;

/// The host's own identity: owns the host-wide settings and the single
/// instance lock.
pub const HOST_GUID: Guid = Guid::from_u128(0x2d6e_41f3_0b8c_4a57_a1e9_64c3_f05d_7b22);

/// Name of the host's own single instance lock.
pub fn host_lock_name() -> String {
    format!("tray-host-{}", HOST_GUID.canonical())
}
