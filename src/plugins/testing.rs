//! Scriptable plugin used by unit tests across the plugins module.

use super::contract::{CommandId, IconImage, MenuCommand, PluginContext, TrayPlugin};
use super::module::PluginType;
use super::Guid;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct FakeSpec {
    pub name: String,
    pub guid: Guid,
    pub click: bool,
    pub elevation: bool,
    pub icon: bool,
    pub commands: Vec<MenuCommand>,
    /// `is_closed` turns true on this poll.
    pub closes_after: usize,
    pub veto: bool,
}

impl FakeSpec {
    pub fn new(name: &str, guid: u128) -> Self {
        Self {
            name: name.to_string(),
            guid: Guid::from_u128(guid),
            click: false,
            elevation: false,
            icon: true,
            commands: Vec::new(),
            closes_after: 1,
            veto: false,
        }
    }

    pub fn click(mut self) -> Self {
        self.click = true;
        self
    }

    pub fn no_icon(mut self) -> Self {
        self.icon = false;
        self
    }

    pub fn elevated(mut self) -> Self {
        self.elevation = true;
        self
    }

    pub fn commands(mut self, commands: &[Option<&str>]) -> Self {
        self.commands = commands.iter().map(|c| c.map(CommandId::from)).collect();
        self
    }

    pub fn closes_after(mut self, polls: usize) -> Self {
        self.closes_after = polls;
        self
    }

    pub fn veto(mut self) -> Self {
        self.veto = true;
        self
    }
}

/// Everything the fake observed, shared with the test.
#[derive(Default)]
pub struct Probe {
    pub initialized: AtomicBool,
    pub menu_dirty: AtomicBool,
    pub icon_dirty: AtomicBool,
    pub clicks: AtomicUsize,
    pub executed: Mutex<Vec<String>>,
    pub can_close_calls: Mutex<Vec<bool>>,
    pub begin_close_calls: AtomicUsize,
    pub close_polls: AtomicUsize,
    pub activations: AtomicUsize,
}

impl Probe {
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn can_close_calls(&self) -> Vec<bool> {
        self.can_close_calls.lock().unwrap().clone()
    }
}

pub struct FakePlugin {
    spec: FakeSpec,
    probe: Arc<Probe>,
}

impl FakePlugin {
    pub fn new(spec: FakeSpec) -> (Self, Arc<Probe>) {
        let probe = Arc::new(Probe::default());
        (Self { spec, probe: Arc::clone(&probe) }, probe)
    }

    /// A module type building this fake; every instance shares one probe.
    pub fn factory(spec: FakeSpec) -> (PluginType, Arc<Probe>) {
        let probe = Arc::new(Probe::default());
        let shared = Arc::clone(&probe);
        let name = spec.name.clone();
        let ty = PluginType::plugin(name, move || -> Box<dyn TrayPlugin> {
            Box::new(FakePlugin {
                spec: spec.clone(),
                probe: Arc::clone(&shared),
            })
        });
        (ty, probe)
    }
}

pub fn solid_icon(value: u8) -> IconImage {
    IconImage::from_rgba(vec![value; 4 * 4 * 4], 4, 4).unwrap()
}

impl TrayPlugin for FakePlugin {
    fn name(&self) -> String {
        self.spec.name.clone()
    }

    fn guid(&self) -> Guid {
        self.spec.guid
    }

    fn requires_elevation(&self) -> bool {
        self.spec.elevation
    }

    fn has_click_handler(&self) -> bool {
        self.spec.click
    }

    fn initialize(&mut self, _context: PluginContext) {
        self.probe.initialized.store(true, Ordering::SeqCst);
    }

    fn commands(&mut self) -> Vec<MenuCommand> {
        self.spec.commands.clone()
    }

    fn command_header(&mut self, command: &CommandId) -> String {
        format!("{}: {}", self.spec.name, command)
    }

    fn command_checked(&mut self, command: &CommandId) -> bool {
        self.probe.executed().iter().any(|c| c == command.as_str())
    }

    fn menu_changed(&mut self, _before_menu_open: bool) -> bool {
        self.probe.menu_dirty.swap(false, Ordering::SeqCst)
    }

    fn execute_command(&mut self, command: &CommandId) {
        self.probe.executed.lock().unwrap().push(command.to_string());
    }

    fn icon(&mut self) -> Option<IconImage> {
        self.spec.icon.then(|| solid_icon(0x80))
    }

    fn icon_changed(&mut self) -> bool {
        self.probe.icon_dirty.swap(false, Ordering::SeqCst)
    }

    fn on_click(&mut self) {
        self.probe.clicks.fetch_add(1, Ordering::SeqCst);
    }

    fn tooltip(&mut self) -> Option<String> {
        Some(format!("{} tooltip", self.spec.name))
    }

    fn on_activated(&mut self) {
        self.probe.activations.fetch_add(1, Ordering::SeqCst);
    }

    fn can_close(&mut self, prior_veto: bool) -> bool {
        self.probe.can_close_calls.lock().unwrap().push(prior_veto);
        !self.spec.veto
    }

    fn begin_close(&mut self) {
        self.probe.begin_close_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn is_closed(&mut self) -> bool {
        let polls = self.probe.close_polls.fetch_add(1, Ordering::SeqCst) + 1;
        polls >= self.spec.closes_after
    }
}
