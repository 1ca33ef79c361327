//! The capability contract between the host and its plugins.
//!
//! A plugin is any type implementing [`TrayPlugin`]. The host never names a
//! concrete plugin type: it receives boxed trait objects from the constructors
//! registered by a module (see [`crate::plugins::module`]) and talks to them
//! only through [`crate::plugins::PluginHandle`].

use super::Guid;
use crate::daemon::EventBus;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Interface name a module type must declare to be considered a plugin.
pub const CONTRACT_INTERFACE: &str = "tray_host::TrayPlugin";

/// Version of the contract exported by native plugin libraries.
pub const CONTRACT_VERSION: u32 = 1;

/// Opaque command token chosen by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(String);

impl CommandId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommandId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// One entry of a plugin's command list. `None` is a menu separator.
pub type MenuCommand = Option<CommandId>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IconError {
    #[error("icon must not be empty")]
    Empty,
    #[error("expected {expected} bytes of RGBA data for {width}x{height}, got {actual}")]
    SizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// RGBA bitmap handed over by a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconImage {
    rgba: Vec<u8>,
    width: u32,
    height: u32,
}

impl IconImage {
    pub fn from_rgba(rgba: Vec<u8>, width: u32, height: u32) -> Result<Self, IconError> {
        if width == 0 || height == 0 {
            return Err(IconError::Empty);
        }
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(IconError::SizeMismatch {
                width,
                height,
                expected,
                actual: rgba.len(),
            });
        }
        Ok(Self { rgba, width, height })
    }

    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn into_rgba(self) -> Vec<u8> {
        self.rgba
    }
}

/// Persisted preferences, partitioned by plugin GUID.
pub trait SettingsStore: Send + Sync {
    fn get(&self, plugin: Guid, key: &str) -> Option<Value>;
    fn set(&self, plugin: Guid, key: &str, value: Value) -> anyhow::Result<()>;
}

/// Handle a plugin may keep to ask the UI thread for work.
///
/// The host never calls it itself; it only hands it to `initialize`.
#[derive(Clone)]
pub struct UiContext {
    events: Arc<EventBus>,
}

impl UiContext {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self { events }
    }

    /// Ask for an icon/tooltip/menu refresh without waiting for the next tick.
    pub fn request_refresh(&self) {
        self.events.request_refresh();
    }
}

/// Leveled logger given to each plugin, routed through the `log` facade.
#[derive(Debug, Clone)]
pub struct PluginLogger {
    target: String,
}

impl PluginLogger {
    pub fn new(plugin_name: &str) -> Self {
        Self {
            target: format!("plugin::{}", plugin_name),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn log(&self, level: log::Level, message: &str) {
        log::log!(target: self.target.as_str(), level, "{}", message);
    }

    pub fn info(&self, message: &str) {
        self.log(log::Level::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(log::Level::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(log::Level::Error, message);
    }
}

/// Everything a plugin receives in `initialize`.
pub struct PluginContext {
    pub is_elevated: bool,
    pub ui: UiContext,
    pub settings: Arc<dyn SettingsStore>,
    pub logger: PluginLogger,
}

/// The plugin capability contract.
///
/// Identity accessors are read once right after construction. Everything else
/// is called on demand by the host, serialized through the plugin's handle.
/// Changed-flag queries are reset-on-read: they report `true` once per change.
pub trait TrayPlugin: Send {
    fn name(&self) -> String;
    fn guid(&self) -> Guid;

    fn requires_elevation(&self) -> bool {
        false
    }

    fn has_click_handler(&self) -> bool {
        false
    }

    fn initialize(&mut self, context: PluginContext);

    fn commands(&mut self) -> Vec<MenuCommand> {
        Vec::new()
    }

    fn command_header(&mut self, command: &CommandId) -> String {
        command.to_string()
    }

    fn command_visible(&mut self, _command: &CommandId) -> bool {
        true
    }

    fn command_enabled(&mut self, _command: &CommandId) -> bool {
        true
    }

    fn command_checked(&mut self, _command: &CommandId) -> bool {
        false
    }

    fn command_icon(&mut self, _command: &CommandId) -> Option<IconImage> {
        None
    }

    /// `before_menu_open` is true when the host is about to show the menu.
    fn menu_changed(&mut self, _before_menu_open: bool) -> bool {
        false
    }

    fn execute_command(&mut self, _command: &CommandId) {}

    fn icon(&mut self) -> Option<IconImage> {
        None
    }

    /// Small bitmap shown when the user picks between click-capable plugins.
    fn selection_bitmap(&mut self) -> Option<IconImage> {
        None
    }

    fn icon_changed(&mut self) -> bool {
        false
    }

    fn on_click(&mut self) {}

    fn tooltip(&mut self) -> Option<String> {
        None
    }

    fn tooltip_changed(&mut self) -> bool {
        false
    }

    fn on_activated(&mut self) {}

    fn on_deactivated(&mut self) {}

    fn can_close(&mut self, _prior_veto: bool) -> bool {
        true
    }

    fn begin_close(&mut self) {}

    fn is_closed(&mut self) -> bool {
        true
    }
}
