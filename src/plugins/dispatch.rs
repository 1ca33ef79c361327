//! The only way host code reaches a plugin instance.
//!
//! Calls are serialized through a mutex so the UI thread and the refresh
//! ticker never overlap inside one plugin. A plugin that panics has broken
//! the contract: the panic is logged with the operation name and then
//! propagated, never swallowed.

use super::contract::{CommandId, IconImage, MenuCommand, PluginContext, TrayPlugin};
use super::module::ModuleRetainer;
use super::Guid;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;

pub struct PluginHandle {
    // Declared before `_module`: the instance must drop while its code is mapped.
    plugin: Mutex<Box<dyn TrayPlugin>>,
    name: String,
    _module: ModuleRetainer,
}

impl PluginHandle {
    pub fn new(plugin: Box<dyn TrayPlugin>, module: ModuleRetainer) -> Self {
        let name = plugin.name();
        Self {
            plugin: Mutex::new(plugin),
            name,
            _module: module,
        }
    }

    fn invoke<R>(&self, op: &str, f: impl FnOnce(&mut dyn TrayPlugin) -> R) -> R {
        let mut plugin = self
            .plugin
            .lock()
            .unwrap_or_else(|_| panic!("plugin {} is unusable after an earlier panic", self.name));
        log::trace!("{}::{}", self.name, op);

        match panic::catch_unwind(AssertUnwindSafe(|| f(plugin.as_mut()))) {
            Ok(result) => result,
            Err(payload) => {
                log::error!("Plugin {} violated its contract in {}", self.name, op);
                panic::resume_unwind(payload)
            }
        }
    }

    pub fn name(&self) -> String {
        self.invoke("name", |p| p.name())
    }

    pub fn guid(&self) -> Guid {
        self.invoke("guid", |p| p.guid())
    }

    pub fn requires_elevation(&self) -> bool {
        self.invoke("requires_elevation", |p| p.requires_elevation())
    }

    pub fn has_click_handler(&self) -> bool {
        self.invoke("has_click_handler", |p| p.has_click_handler())
    }

    pub fn initialize(&self, context: PluginContext) {
        self.invoke("initialize", move |p| p.initialize(context))
    }

    pub fn commands(&self) -> Vec<MenuCommand> {
        self.invoke("commands", |p| p.commands())
    }

    pub fn command_header(&self, command: &CommandId) -> String {
        self.invoke("command_header", |p| p.command_header(command))
    }

    pub fn command_visible(&self, command: &CommandId) -> bool {
        self.invoke("command_visible", |p| p.command_visible(command))
    }

    pub fn command_enabled(&self, command: &CommandId) -> bool {
        self.invoke("command_enabled", |p| p.command_enabled(command))
    }

    pub fn command_checked(&self, command: &CommandId) -> bool {
        self.invoke("command_checked", |p| p.command_checked(command))
    }

    pub fn command_icon(&self, command: &CommandId) -> Option<IconImage> {
        self.invoke("command_icon", |p| p.command_icon(command))
    }

    pub fn menu_changed(&self, before_menu_open: bool) -> bool {
        self.invoke("menu_changed", |p| p.menu_changed(before_menu_open))
    }

    pub fn execute_command(&self, command: &CommandId) {
        self.invoke("execute_command", |p| p.execute_command(command))
    }

    pub fn icon(&self) -> Option<IconImage> {
        self.invoke("icon", |p| p.icon())
    }

    pub fn selection_bitmap(&self) -> Option<IconImage> {
        self.invoke("selection_bitmap", |p| p.selection_bitmap())
    }

    pub fn icon_changed(&self) -> bool {
        self.invoke("icon_changed", |p| p.icon_changed())
    }

    pub fn on_click(&self) {
        self.invoke("on_click", |p| p.on_click())
    }

    pub fn tooltip(&self) -> Option<String> {
        self.invoke("tooltip", |p| p.tooltip())
    }

    pub fn tooltip_changed(&self) -> bool {
        self.invoke("tooltip_changed", |p| p.tooltip_changed())
    }

    pub fn on_activated(&self) {
        self.invoke("on_activated", |p| p.on_activated())
    }

    pub fn on_deactivated(&self) {
        self.invoke("on_deactivated", |p| p.on_deactivated())
    }

    pub fn can_close(&self, prior_veto: bool) -> bool {
        self.invoke("can_close", |p| p.can_close(prior_veto))
    }

    pub fn begin_close(&self) {
        self.invoke("begin_close", |p| p.begin_close())
    }

    pub fn is_closed(&self) -> bool {
        self.invoke("is_closed", |p| p.is_closed())
    }
}
