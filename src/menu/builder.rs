use super::router::{EventRoute, EventRouter, HandlerResult};
use crate::plugins::{CommandKey, Guid, IconImage, PluginManager, Registry};
use anyhow::Result;
use std::sync::{Arc, Mutex};
use tray_icon::menu::{CheckMenuItem, IconMenuItem, IsMenuItem, Menu, MenuItem, PredefinedMenuItem, Submenu};

pub const QUIT_ID: &str = "__quit__";
pub const SELECT_PREFIX: &str = "__select__::";

/// Toolkit-independent description of the context menu.
#[derive(Debug, Clone, PartialEq)]
pub enum MenuNode {
    Separator,
    Item {
        id: String,
        label: String,
        enabled: bool,
        checked: bool,
        icon: Option<IconImage>,
    },
    Submenu {
        label: String,
        children: Vec<MenuNode>,
    },
}

impl MenuNode {
    fn item(id: impl Into<String>, label: impl Into<String>) -> Self {
        MenuNode::Item {
            id: id.into(),
            label: label.into(),
            enabled: true,
            checked: false,
            icon: None,
        }
    }
}

/// Plugin groups in registration order, the icon picker when there is a
/// choice, then Quit. Hidden commands are left out and separators never
/// lead, trail or repeat.
pub fn menu_model(registry: &Registry) -> Vec<MenuNode> {
    let mut nodes = Vec::new();

    for group in registry.groups() {
        push_separator(&mut nodes);
        for entry in &group.entries {
            let Some(key) = entry.key() else {
                push_separator(&mut nodes);
                continue;
            };
            let Some(state) = registry.command_state(&key) else {
                continue;
            };
            if !state.visible {
                continue;
            }
            nodes.push(MenuNode::Item {
                id: key.menu_id(),
                label: state.header,
                enabled: state.enabled,
                checked: state.checked,
                icon: state.icon,
            });
        }
    }

    let selectable = registry.selectable();
    if !selectable.is_empty() {
        push_separator(&mut nodes);
        let children = selectable
            .into_iter()
            .map(|plugin| MenuNode::Item {
                id: format!("{}{}", SELECT_PREFIX, plugin.guid.canonical()),
                label: plugin.name,
                enabled: true,
                checked: plugin.preferred,
                icon: plugin.bitmap,
            })
            .collect();
        nodes.push(MenuNode::Submenu {
            label: "Tray Icon".to_string(),
            children,
        });
    }

    push_separator(&mut nodes);
    nodes.push(MenuNode::item(QUIT_ID, "Quit"));
    nodes
}

fn push_separator(nodes: &mut Vec<MenuNode>) {
    if matches!(nodes.last(), Some(node) if *node != MenuNode::Separator) {
        nodes.push(MenuNode::Separator);
    }
}

pub fn build_menu(plugin_manager: Arc<Mutex<PluginManager>>) -> Result<(Menu, EventRouter)> {
    let nodes = menu_model(plugin_manager.lock().unwrap().registry());

    let menu = Menu::new();
    for node in &nodes {
        menu.append(render(node)?.as_ref())?;
    }

    Ok((menu, routes(plugin_manager)))
}

/// Which toolkit item an entry becomes. A check mark wins over an icon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemKind {
    Check,
    Icon,
    Plain,
}

fn item_kind(checked: bool, has_icon: bool) -> ItemKind {
    match (checked, has_icon) {
        (true, _) => ItemKind::Check,
        (false, true) => ItemKind::Icon,
        (false, false) => ItemKind::Plain,
    }
}

fn render(node: &MenuNode) -> Result<Box<dyn IsMenuItem>> {
    let item: Box<dyn IsMenuItem> = match node {
        MenuNode::Separator => Box::new(PredefinedMenuItem::separator()),
        MenuNode::Item { id, label, enabled, checked, icon } => match (item_kind(*checked, icon.is_some()), icon) {
            (ItemKind::Icon, Some(icon)) => {
                let icon = tray_icon::menu::Icon::from_rgba(icon.rgba().to_vec(), icon.width(), icon.height())?;
                Box::new(IconMenuItem::with_id(id.as_str(), label, *enabled, Some(icon), None))
            }
            (ItemKind::Check, _) => Box::new(CheckMenuItem::with_id(id.as_str(), label, *enabled, true, None)),
            _ => Box::new(MenuItem::with_id(id.as_str(), label, *enabled, None)),
        },
        MenuNode::Submenu { label, children } => {
            let submenu = Submenu::new(label, true);
            for child in children {
                submenu.append(render(child)?.as_ref())?;
            }
            Box::new(submenu)
        }
    };
    Ok(item)
}

/// Quit, icon selection, and `{GUID}::command` plugin commands.
pub fn routes(plugin_manager: Arc<Mutex<PluginManager>>) -> EventRouter {
    let select_manager = Arc::clone(&plugin_manager);

    EventRouter::new(vec![
        EventRoute::exact(QUIT_ID, |_| {
            log::info!("Quit requested");
            Ok(HandlerResult::Quit)
        }),
        EventRoute::prefix(SELECT_PREFIX, move |event_id| {
            let guid = Guid::parse(&event_id[SELECT_PREFIX.len()..])?;
            if select_manager.lock().unwrap().set_preferred(guid) {
                Ok(HandlerResult::Rebuild)
            } else {
                log::warn!("Plugin {} cannot drive the tray icon", guid);
                Ok(HandlerResult::Continue)
            }
        }),
        EventRoute::prefix("{", move |event_id| {
            let Some(key) = CommandKey::parse(event_id) else {
                log::warn!("Malformed command id: {}", event_id);
                return Ok(HandlerResult::Continue);
            };
            plugin_manager.lock().unwrap().registry().execute(&key);
            Ok(HandlerResult::Continue)
        }),
    ])
}
