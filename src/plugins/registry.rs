//! Loaded plugins and the UI model aggregated from them.
//!
//! Owned by the [`PluginManager`](super::PluginManager). The UI reaches it
//! through the manager's mutex, never through ambient state.

use super::contract::{CommandId, IconImage, MenuCommand};
use super::descriptor::PluginDescriptor;
use super::Guid;
use std::collections::HashMap;
use std::fmt;

/// A command made unique across plugins by its owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandKey {
    pub plugin: Guid,
    pub command: CommandId,
}

impl CommandKey {
    const SEPARATOR: &'static str = "::";

    pub fn new(plugin: Guid, command: CommandId) -> Self {
        Self { plugin, command }
    }

    /// Menu item id: `{GUID}::command`.
    pub fn menu_id(&self) -> String {
        format!("{}{}{}", self.plugin.canonical(), Self::SEPARATOR, self.command)
    }

    pub fn parse(menu_id: &str) -> Option<Self> {
        let (guid, command) = menu_id.split_once(Self::SEPARATOR)?;
        if command.is_empty() {
            return None;
        }
        Some(Self::new(Guid::parse(guid).ok()?, CommandId::new(command)))
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.menu_id())
    }
}

/// One menu slot. `command == None` is a separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEntry {
    pub command: MenuCommand,
    pub plugin: Guid,
}

impl CommandEntry {
    pub fn key(&self) -> Option<CommandKey> {
        self.command.clone().map(|c| CommandKey::new(self.plugin, c))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginGroup {
    pub name: String,
    pub plugin: Guid,
    pub entries: Vec<CommandEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandState {
    pub header: String,
    pub visible: bool,
    pub enabled: bool,
    pub checked: bool,
    pub icon: Option<IconImage>,
}

/// Entry in the "which plugin drives the icon" picker.
#[derive(Debug, Clone)]
pub struct SelectablePlugin {
    pub guid: Guid,
    pub name: String,
    pub bitmap: Option<IconImage>,
    pub preferred: bool,
}

#[derive(Default)]
pub struct Registry {
    descriptors: Vec<PluginDescriptor>,
    commands: HashMap<CommandKey, Guid>,
    groups: Vec<PluginGroup>,
    consolidated: Vec<Guid>,
    preferred: Option<Guid>,
    any_requires_elevation: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses a second descriptor for a GUID already present.
    pub fn insert(&mut self, descriptor: PluginDescriptor) -> Result<(), PluginDescriptor> {
        if self.contains(descriptor.guid) {
            return Err(descriptor);
        }
        self.any_requires_elevation |= descriptor.requires_elevation;
        self.descriptors.push(descriptor);
        Ok(())
    }

    pub fn contains(&self, guid: Guid) -> bool {
        self.descriptors.iter().any(|d| d.guid == guid)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn any_requires_elevation(&self) -> bool {
        self.any_requires_elevation
    }

    pub fn descriptor(&self, guid: Guid) -> Option<&PluginDescriptor> {
        self.descriptors.iter().find(|d| d.guid == guid)
    }

    pub fn descriptors(&self) -> &[PluginDescriptor] {
        &self.descriptors
    }

    pub(crate) fn descriptors_mut(&mut self) -> &mut [PluginDescriptor] {
        &mut self.descriptors
    }

    pub fn groups(&self) -> &[PluginGroup] {
        &self.groups
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    /// Build the command table, menu groups, consolidated list and the
    /// default preferred plugin from the inserted descriptors.
    pub fn aggregate(&mut self) {
        self.commands.clear();
        self.groups.clear();
        self.consolidated.clear();

        for descriptor in &self.descriptors {
            let commands = descriptor.handle().commands();
            if commands.is_empty() {
                continue;
            }

            let mut group = PluginGroup {
                name: descriptor.name.clone(),
                plugin: descriptor.guid,
                entries: Vec::with_capacity(commands.len()),
            };
            for command in commands {
                if let Some(id) = &command {
                    let key = CommandKey::new(descriptor.guid, id.clone());
                    if self.commands.insert(key, descriptor.guid).is_some() {
                        log::warn!("Plugin {} lists command '{}' more than once", descriptor.name, id);
                    }
                }
                group.entries.push(CommandEntry { command, plugin: descriptor.guid });
            }
            self.groups.push(group);
        }

        for descriptor in &self.descriptors {
            if descriptor.handle().icon().is_some() {
                self.consolidated.push(descriptor.guid);
            }
        }

        let preferred = self
            .consolidated_descriptors()
            .find(|d| d.has_click_handler)
            .or_else(|| self.consolidated_descriptors().next())
            .map(|d| d.guid);
        self.preferred = preferred;

        log::info!(
            "Aggregated {} plugins: {} commands in {} groups, {} with icons",
            self.descriptors.len(),
            self.commands.len(),
            self.groups.len(),
            self.consolidated.len()
        );
    }

    fn consolidated_descriptors(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.consolidated.iter().filter_map(|guid| self.descriptor(*guid))
    }

    pub fn consolidated(&self) -> Vec<&PluginDescriptor> {
        self.consolidated_descriptors().collect()
    }

    /// No-op unless `guid` is a consolidated plugin.
    pub fn set_preferred(&mut self, guid: Guid) -> bool {
        if !self.consolidated.contains(&guid) {
            return false;
        }
        self.preferred = Some(guid);
        true
    }

    pub fn preferred(&self) -> Option<&PluginDescriptor> {
        self.preferred.and_then(|guid| self.descriptor(guid))
    }

    pub fn lookup(&self, key: &CommandKey) -> Option<&PluginDescriptor> {
        self.commands.get(key).and_then(|guid| self.descriptor(*guid))
    }

    /// Commands of every plugin reporting a menu change. Reading resets the
    /// plugins' flags.
    pub fn changed_commands(&self, before_menu_open: bool) -> Vec<CommandKey> {
        let mut changed = Vec::new();
        for descriptor in &self.descriptors {
            if !descriptor.handle().menu_changed(before_menu_open) {
                continue;
            }
            let Some(group) = self.groups.iter().find(|g| g.plugin == descriptor.guid) else {
                continue;
            };
            changed.extend(group.entries.iter().filter_map(CommandEntry::key));
        }
        changed
    }

    pub fn command_state(&self, key: &CommandKey) -> Option<CommandState> {
        let handle = self.lookup(key)?.handle();
        Some(CommandState {
            header: handle.command_header(&key.command),
            visible: handle.command_visible(&key.command),
            enabled: handle.command_enabled(&key.command),
            checked: handle.command_checked(&key.command),
            icon: handle.command_icon(&key.command),
        })
    }

    pub fn execute(&self, key: &CommandKey) -> bool {
        match self.lookup(key) {
            Some(descriptor) => {
                log::info!("Executing {} on {}", key.command, descriptor.name);
                descriptor.handle().execute_command(&key.command);
                true
            }
            None => {
                log::warn!("No plugin owns command {}", key);
                false
            }
        }
    }

    pub fn icon(&self) -> Option<IconImage> {
        self.preferred()?.handle().icon()
    }

    pub fn icon_changed(&self) -> bool {
        self.preferred().is_some_and(|d| d.handle().icon_changed())
    }

    pub fn tooltip(&self) -> Option<String> {
        self.preferred()?.handle().tooltip()
    }

    pub fn tooltip_changed(&self) -> bool {
        self.preferred().is_some_and(|d| d.handle().tooltip_changed())
    }

    /// Returns false when the preferred plugin does not handle clicks.
    pub fn click(&self) -> bool {
        match self.preferred() {
            Some(d) if d.has_click_handler => {
                d.handle().on_click();
                true
            }
            _ => false,
        }
    }

    /// Click-capable consolidated plugins, offered only when there is a choice.
    pub fn selectable(&self) -> Vec<SelectablePlugin> {
        let candidates: Vec<_> = self.consolidated_descriptors().filter(|d| d.has_click_handler).collect();
        if candidates.len() < 2 {
            return Vec::new();
        }
        candidates
            .into_iter()
            .map(|d| SelectablePlugin {
                guid: d.guid,
                name: d.name.clone(),
                bitmap: d.handle().selection_bitmap(),
                preferred: self.preferred == Some(d.guid),
            })
            .collect()
    }

    pub fn activate(&self) {
        for descriptor in &self.descriptors {
            descriptor.handle().on_activated();
        }
    }

    pub fn deactivate(&self) {
        for descriptor in &self.descriptors {
            descriptor.handle().on_deactivated();
        }
    }

    /// Back to the pre-load empty state.
    pub fn clear(&mut self) {
        self.commands.clear();
        self.groups.clear();
        self.consolidated.clear();
        self.preferred = None;
        self.any_requires_elevation = false;
        self.descriptors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::dispatch::PluginHandle;
    use crate::plugins::module::ModuleRetainer;
    use crate::plugins::testing::{FakePlugin, FakeSpec, Probe};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn insert(registry: &mut Registry, spec: FakeSpec) -> Arc<Probe> {
        let (plugin, probe) = FakePlugin::new(spec);
        let handle = PluginHandle::new(Box::new(plugin), ModuleRetainer::none());
        registry.insert(PluginDescriptor::new(handle, None)).unwrap();
        probe
    }

    fn key(guid: u128, command: &str) -> CommandKey {
        CommandKey::new(Guid::from_u128(guid), CommandId::new(command))
    }

    #[test]
    fn command_key_menu_id_round_trip() {
        let key = key(0xA, "refresh::now");
        let id = key.menu_id();

        assert_eq!(id, "{00000000-0000-0000-0000-00000000000A}::refresh::now");
        assert_eq!(CommandKey::parse(&id), Some(key));
    }

    #[test]
    fn command_key_parse_rejects_malformed_ids() {
        let cases = ["", "refresh", "not-a-guid::refresh", "{00000000-0000-0000-0000-00000000000A}::", "__quit__"];
        for input in cases {
            assert_eq!(CommandKey::parse(input), None, "{:?}", input);
        }
    }

    #[test]
    fn duplicate_guid_is_rejected() {
        let mut registry = Registry::new();
        insert(&mut registry, FakeSpec::new("Clock", 1));

        let (plugin, _) = FakePlugin::new(FakeSpec::new("Clock again", 1));
        let handle = PluginHandle::new(Box::new(plugin), ModuleRetainer::none());
        let rejected = registry.insert(PluginDescriptor::new(handle, None));

        assert!(rejected.is_err());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.descriptors()[0].name, "Clock");
    }

    #[test]
    fn every_command_maps_back_to_its_plugin() {
        let mut registry = Registry::new();
        insert(&mut registry, FakeSpec::new("Clock", 1).commands(&[Some("sync"), None, Some("format")]));
        insert(&mut registry, FakeSpec::new("Weather", 2).commands(&[Some("sync"), Some("units")]));
        insert(&mut registry, FakeSpec::new("Silent", 3));

        registry.aggregate();

        assert_eq!(registry.command_count(), 4);
        for (guid, command) in [(1, "sync"), (1, "format"), (2, "sync"), (2, "units")] {
            let owner = registry.lookup(&key(guid, command)).unwrap();
            assert_eq!(owner.guid, Guid::from_u128(guid), "{}", command);
        }
        assert!(registry.lookup(&key(3, "sync")).is_none());
    }

    #[test]
    fn groups_keep_separators_and_skip_plugins_without_commands() {
        let mut registry = Registry::new();
        insert(&mut registry, FakeSpec::new("Clock", 1).commands(&[Some("sync"), None, Some("format")]));
        insert(&mut registry, FakeSpec::new("Silent", 2));

        registry.aggregate();

        let groups = registry.groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "Clock");
        let commands: Vec<_> = groups[0].entries.iter().map(|e| e.command.as_ref().map(CommandId::as_str)).collect();
        assert_eq!(commands, vec![Some("sync"), None, Some("format")]);
    }

    #[test]
    fn preferred_is_first_click_capable_consolidated_plugin() {
        let mut registry = Registry::new();
        insert(&mut registry, FakeSpec::new("P0", 10).click().no_icon());
        insert(&mut registry, FakeSpec::new("P1", 1));
        insert(&mut registry, FakeSpec::new("P2", 2).click());
        insert(&mut registry, FakeSpec::new("P3", 3).click());

        registry.aggregate();

        assert_eq!(registry.preferred().unwrap().name, "P2");
    }

    #[test]
    fn preferred_falls_back_to_first_consolidated_plugin() {
        let mut registry = Registry::new();
        insert(&mut registry, FakeSpec::new("P0", 10).no_icon());
        insert(&mut registry, FakeSpec::new("P1", 1));
        insert(&mut registry, FakeSpec::new("P2", 2));

        registry.aggregate();

        assert_eq!(registry.preferred().unwrap().name, "P1");
    }

    #[test]
    fn no_consolidated_plugins_means_no_preferred() {
        let mut registry = Registry::new();
        insert(&mut registry, FakeSpec::new("P0", 10).click().no_icon());

        registry.aggregate();

        assert!(registry.preferred().is_none());
        assert!(registry.icon().is_none());
        assert!(registry.tooltip().is_none());
        assert!(!registry.click());
    }

    #[test]
    fn set_preferred_only_accepts_consolidated_plugins() {
        let mut registry = Registry::new();
        insert(&mut registry, FakeSpec::new("P1", 1));
        insert(&mut registry, FakeSpec::new("P2", 2).click());
        insert(&mut registry, FakeSpec::new("Hidden", 3).no_icon());
        registry.aggregate();

        assert!(!registry.set_preferred(Guid::from_u128(3)));
        assert!(!registry.set_preferred(Guid::from_u128(99)));
        assert_eq!(registry.preferred().unwrap().name, "P2");

        assert!(registry.set_preferred(Guid::from_u128(1)));
        assert_eq!(registry.preferred().unwrap().name, "P1");
        assert_eq!(registry.tooltip().as_deref(), Some("P1 tooltip"));
    }

    #[test]
    fn changed_commands_reads_reset_on_read_flag() {
        let mut registry = Registry::new();
        let clock = insert(&mut registry, FakeSpec::new("Clock", 1).commands(&[Some("sync"), None]));
        let weather = insert(&mut registry, FakeSpec::new("Weather", 2).commands(&[Some("units")]));
        registry.aggregate();

        clock.menu_dirty.store(true, Ordering::SeqCst);

        assert_eq!(registry.changed_commands(true), vec![key(1, "sync")]);
        assert!(registry.changed_commands(true).is_empty());

        weather.menu_dirty.store(true, Ordering::SeqCst);
        assert_eq!(registry.changed_commands(true), vec![key(2, "units")]);
    }

    #[test]
    fn execute_routes_to_owner() {
        let mut registry = Registry::new();
        let clock = insert(&mut registry, FakeSpec::new("Clock", 1).commands(&[Some("sync")]));
        let weather = insert(&mut registry, FakeSpec::new("Weather", 2).commands(&[Some("sync")]));
        registry.aggregate();

        assert!(registry.execute(&key(2, "sync")));
        assert!(!registry.execute(&key(2, "missing")));

        assert!(clock.executed().is_empty());
        assert_eq!(weather.executed(), vec!["sync"]);

        let state = registry.command_state(&key(2, "sync")).unwrap();
        assert_eq!(state.header, "Weather: sync");
        assert!(state.checked);
        assert!(state.visible && state.enabled);
    }

    #[test]
    fn click_reaches_preferred_click_handler() {
        let mut registry = Registry::new();
        let p1 = insert(&mut registry, FakeSpec::new("P1", 1));
        let p2 = insert(&mut registry, FakeSpec::new("P2", 2).click());
        registry.aggregate();

        assert!(registry.click());

        assert_eq!(p1.clicks.load(Ordering::SeqCst), 0);
        assert_eq!(p2.clicks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn selection_offered_only_with_several_click_handlers() {
        let mut registry = Registry::new();
        insert(&mut registry, FakeSpec::new("P1", 1));
        insert(&mut registry, FakeSpec::new("P2", 2).click());
        registry.aggregate();
        assert!(registry.selectable().is_empty());

        insert(&mut registry, FakeSpec::new("P3", 3).click());
        registry.aggregate();

        let names: Vec<_> = registry.selectable().into_iter().map(|s| (s.name, s.preferred)).collect();
        assert_eq!(names, vec![("P2".to_string(), true), ("P3".to_string(), false)]);
    }

    #[test]
    fn elevation_flag_is_aggregated() {
        let mut registry = Registry::new();
        insert(&mut registry, FakeSpec::new("P1", 1));
        assert!(!registry.any_requires_elevation());

        insert(&mut registry, FakeSpec::new("P2", 2).elevated());
        assert!(registry.any_requires_elevation());
    }

    #[test]
    fn clear_returns_to_empty_state() {
        let mut registry = Registry::new();
        insert(&mut registry, FakeSpec::new("Clock", 1).commands(&[Some("sync")]));
        registry.aggregate();

        registry.clear();

        assert!(registry.is_empty());
        assert_eq!(registry.command_count(), 0);
        assert!(registry.groups().is_empty());
        assert!(registry.preferred().is_none());
    }
}
