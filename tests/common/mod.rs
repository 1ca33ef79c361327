#![allow(dead_code)]

use anyhow::{anyhow, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tray_host::daemon::EventBus;
use tray_host::plugins::{
    CommandId, EmbeddedCatalog, FileLockProvider, Guid, IconImage, JsonSettingsStore, ManagerDeps, MenuCommand,
    ModuleLoader, PluginContext, PluginManager, PluginModule, PluginType, ScanOptions, StaticModule, TrayPlugin,
};
use tray_host::sleeper::Sleeper;

pub const EXTENSION: &str = "plug";

/// What a [`Widget`] was asked to do, shared with the test.
#[derive(Default)]
pub struct Activity {
    pub executed: Mutex<Vec<String>>,
    pub icon_dirty: AtomicBool,
    pub icon_hidden: AtomicBool,
    pub menu_dirty: AtomicBool,
    pub close_polls: AtomicUsize,
}

#[derive(Clone)]
pub struct Widget {
    pub name: &'static str,
    pub guid: Guid,
    pub click: bool,
    pub commands: Vec<&'static str>,
    pub polls_to_close: usize,
    pub activity: Arc<Activity>,
}

impl Widget {
    pub fn new(name: &'static str, guid: u128) -> Self {
        Self {
            name,
            guid: Guid::from_u128(guid),
            click: false,
            commands: Vec::new(),
            polls_to_close: 1,
            activity: Arc::default(),
        }
    }

    pub fn clickable(mut self) -> Self {
        self.click = true;
        self
    }

    pub fn with_commands(mut self, commands: &[&'static str]) -> Self {
        self.commands = commands.to_vec();
        self
    }

    pub fn slow_to_close(mut self, polls: usize) -> Self {
        self.polls_to_close = polls;
        self
    }

    pub fn plugin_type(&self) -> PluginType {
        let template = self.clone();
        PluginType::plugin(self.name, move || -> Box<dyn TrayPlugin> { Box::new(template.clone()) })
    }
}

impl TrayPlugin for Widget {
    fn name(&self) -> String {
        self.name.to_string()
    }

    fn guid(&self) -> Guid {
        self.guid
    }

    fn has_click_handler(&self) -> bool {
        self.click
    }

    fn initialize(&mut self, _context: PluginContext) {}

    fn commands(&mut self) -> Vec<MenuCommand> {
        self.commands.iter().map(|c| Some(CommandId::from(*c))).collect()
    }

    fn menu_changed(&mut self, _before_menu_open: bool) -> bool {
        self.activity.menu_dirty.swap(false, Ordering::SeqCst)
    }

    fn execute_command(&mut self, command: &CommandId) {
        self.activity.executed.lock().unwrap().push(command.to_string());
    }

    fn icon(&mut self) -> Option<IconImage> {
        if self.activity.icon_hidden.load(Ordering::SeqCst) {
            return None;
        }
        IconImage::from_rgba(vec![0x40; 16 * 16 * 4], 16, 16).ok()
    }

    fn icon_changed(&mut self) -> bool {
        self.activity.icon_dirty.swap(false, Ordering::SeqCst)
    }

    fn tooltip(&mut self) -> Option<String> {
        Some(format!("{} tooltip", self.name))
    }

    fn is_closed(&mut self) -> bool {
        self.activity.close_polls.fetch_add(1, Ordering::SeqCst) + 1 >= self.polls_to_close
    }
}

/// Embedded modules by name; plugin files by stem. File contents are ignored.
pub struct MemoryLoader {
    pub embedded: EmbeddedCatalog,
    pub files: EmbeddedCatalog,
}

impl ModuleLoader for MemoryLoader {
    fn load_by_name(&self, name: &str) -> Result<Box<dyn PluginModule>> {
        let module = self.embedded.resolve(name).ok_or_else(|| anyhow!("no module {}", name))?;
        Ok(Box::new(module))
    }

    fn probe(&self, path: &Path) -> std::io::Result<bool> {
        Ok(self.files.resolve(&stem(path)).is_some())
    }

    fn load_by_path(&self, path: &Path) -> Result<Box<dyn PluginModule>> {
        let module = self.files.resolve(&stem(path)).ok_or_else(|| anyhow!("cannot open {}", path.display()))?;
        Ok(Box::new(module))
    }
}

fn stem(path: &Path) -> String {
    path.file_stem().and_then(|s| s.to_str()).unwrap_or_default().to_string()
}

#[derive(Default)]
pub struct CountingSleeper {
    pub naps: Mutex<Vec<Duration>>,
}

impl Sleeper for CountingSleeper {
    fn sleep(&self, duration: Duration) {
        self.naps.lock().unwrap().push(duration);
    }
}

/// A host installation in a temp dir: plugin dir, lock dir, settings file.
pub struct Host {
    pub root: TempDir,
    pub embedded: Vec<Widget>,
    pub files: Vec<(&'static str, Vec<Widget>)>,
    pub sleeper: Arc<CountingSleeper>,
    pub events: Arc<EventBus>,
}

impl Host {
    pub fn new() -> Self {
        Self {
            root: TempDir::new().unwrap(),
            embedded: Vec::new(),
            files: Vec::new(),
            sleeper: Arc::default(),
            events: Arc::new(EventBus::new()),
        }
    }

    pub fn embed(mut self, widget: Widget) -> Self {
        self.embedded.push(widget);
        self
    }

    pub fn install(mut self, file: &'static str, widgets: Vec<Widget>) -> Self {
        std::fs::create_dir_all(self.plugin_dir()).unwrap();
        std::fs::write(self.plugin_dir().join(format!("{}.{}", file, EXTENSION)), b"binary").unwrap();
        self.files.push((file, widgets));
        self
    }

    pub fn plugin_dir(&self) -> std::path::PathBuf {
        self.root.path().join("plugins")
    }

    pub fn settings_path(&self) -> std::path::PathBuf {
        self.root.path().join("settings.json")
    }

    pub fn manager(&self) -> PluginManager {
        let mut embedded = EmbeddedCatalog::new();
        if !self.embedded.is_empty() {
            embedded.register(StaticModule::new(
                "core",
                self.embedded.iter().map(Widget::plugin_type).collect(),
            ));
        }
        let mut files = EmbeddedCatalog::new();
        for (file, widgets) in &self.files {
            files.register(StaticModule::new(*file, widgets.iter().map(Widget::plugin_type).collect()));
        }

        let deps = ManagerDeps {
            loader: Box::new(MemoryLoader { embedded, files }),
            locks: Box::new(FileLockProvider::new(self.root.path().join("locks"))),
            validator: None,
            settings: Arc::new(JsonSettingsStore::open(self.settings_path()).unwrap()),
            events: Arc::clone(&self.events),
            sleeper: self.sleeper.clone(),
        };
        let options = ScanOptions {
            app_dir: self.plugin_dir(),
            extensions: vec![EXTENSION.to_string()],
            embedded: (!self.embedded.is_empty()).then(|| "core".to_string()),
        };
        PluginManager::new(deps, options)
    }
}
