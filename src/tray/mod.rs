pub mod icon;
pub mod platform;

use crate::builtin;
use crate::daemon::{EventBus, HostEvent, RefreshDelta, Refresher};
use crate::menu::builder::build_menu;
use crate::menu::router::{EventRouter, HandlerResult};
use crate::plugins::{IconImage, PluginManager};
use anyhow::Result;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tray_icon::menu::MenuEvent;
use tray_icon::{MouseButton, MouseButtonState, TrayIcon, TrayIconBuilder, TrayIconEvent};

pub const PUMP_INTERVAL: Duration = Duration::from_millis(100);

const SIGNATURE_NOTICE: &str = "Some plugins were not loaded: invalid signature";

/// Everything the tray UI needs, handed to the platform layer.
#[derive(Clone)]
pub struct TrayContext {
    pub plugin_manager: Arc<Mutex<PluginManager>>,
    pub refresher: Arc<Refresher>,
    pub events: Arc<EventBus>,
}

pub enum Flow {
    Continue,
    Quit,
}

/// Owns the tray icon; lives on the UI thread and is pumped from there.
pub struct TrayController {
    tray: TrayIcon,
    router: EventRouter,
    context: TrayContext,
    events: broadcast::Receiver<HostEvent>,
    icon: IconImage,
    tooltip: String,
    signature_warning: bool,
}

impl TrayController {
    pub fn new(context: TrayContext) -> Result<Self> {
        let events = context.events.subscribe();
        let (icon, tooltip, has_click) = {
            let manager = context.plugin_manager.lock().unwrap();
            let registry = manager.registry();
            (
                registry.icon().unwrap_or_else(builtin::default_icon),
                registry.tooltip().unwrap_or_else(|| builtin::DEFAULT_TOOLTIP.to_string()),
                registry.preferred().is_some_and(|d| d.has_click_handler),
            )
        };
        let (menu, router) = build_menu(Arc::clone(&context.plugin_manager))?;

        let tray = TrayIconBuilder::new()
            .with_menu(Box::new(menu))
            .with_menu_on_left_click(!has_click)
            .with_tooltip(&tooltip)
            .with_icon(icon::render(&icon, false)?)
            .build()?;

        Ok(Self {
            tray,
            router,
            context,
            events,
            icon,
            tooltip,
            signature_warning: false,
        })
    }

    /// Handle everything queued since the last call.
    pub fn pump(&mut self) -> Flow {
        while let Ok(event) = MenuEvent::receiver().try_recv() {
            log::debug!("Menu event: {}", event.id.0);
            match self.router.route(&event.id.0) {
                Ok(HandlerResult::Continue) => {}
                Ok(HandlerResult::Rebuild) => self.reload(),
                Ok(HandlerResult::Quit) => {
                    self.context.events.send(HostEvent::Quit);
                    return Flow::Quit;
                }
                Err(e) => log::error!("Error handling menu event: {:#}", e),
            }
        }

        while let Ok(event) = TrayIconEvent::receiver().try_recv() {
            self.on_tray_event(event);
        }

        loop {
            match self.events.try_recv() {
                Ok(HostEvent::Refresh(delta)) => {
                    self.apply(delta);
                    self.context.refresher.complete();
                }
                Ok(HostEvent::SignatureWarning) => {
                    self.signature_warning = true;
                    self.show_icon();
                    self.show_tooltip();
                }
                Ok(HostEvent::Quit) => return Flow::Quit,
                Ok(HostEvent::RefreshRequested) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    // A dropped Refresh would otherwise block the ticker for good.
                    log::debug!("Tray skipped {} events", skipped);
                    self.context.refresher.complete();
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Closed) => return Flow::Quit,
            }
        }

        Flow::Continue
    }

    fn on_tray_event(&self, event: TrayIconEvent) {
        let manager = self.context.plugin_manager.lock().unwrap();
        match event {
            TrayIconEvent::Click {
                button: MouseButton::Left,
                button_state: MouseButtonState::Up,
                ..
            } => {
                manager.registry().click();
            }
            TrayIconEvent::Enter { .. } => manager.registry().activate(),
            TrayIconEvent::Leave { .. } => manager.registry().deactivate(),
            _ => {}
        }
    }

    fn apply(&mut self, delta: RefreshDelta) {
        if let Some(icon) = delta.icon {
            self.icon = icon;
            self.show_icon();
        }
        if let Some(tooltip) = delta.tooltip {
            self.tooltip = tooltip;
            self.show_tooltip();
        }
        if !delta.commands.is_empty() {
            self.rebuild_menu();
        }
    }

    /// The preferred plugin changed: everything it drives is stale.
    fn reload(&mut self) {
        {
            let manager = self.context.plugin_manager.lock().unwrap();
            let registry = manager.registry();
            self.icon = registry.icon().unwrap_or_else(builtin::default_icon);
            self.tooltip = registry.tooltip().unwrap_or_else(|| builtin::DEFAULT_TOOLTIP.to_string());
        }
        self.show_icon();
        self.show_tooltip();
        self.rebuild_menu();
    }

    fn show_icon(&self) {
        let result = icon::render(&self.icon, self.signature_warning)
            .and_then(|icon| Ok(self.tray.set_icon(Some(icon))?));
        if let Err(e) = result {
            log::error!("Failed to update tray icon: {:#}", e);
        }
    }

    fn show_tooltip(&self) {
        let tooltip = if self.signature_warning {
            format!("{}\n{}", self.tooltip, SIGNATURE_NOTICE)
        } else {
            self.tooltip.clone()
        };
        if let Err(e) = self.tray.set_tooltip(Some(tooltip)) {
            log::error!("Failed to update tooltip: {}", e);
        }
    }

    fn rebuild_menu(&mut self) {
        match build_menu(Arc::clone(&self.context.plugin_manager)) {
            Ok((menu, router)) => {
                self.tray.set_menu(Some(Box::new(menu)));
                self.router = router;
            }
            Err(e) => log::error!("Failed to rebuild menu: {:#}", e),
        }
    }
}

/// Show the tray and block until the user quits.
pub fn run(context: TrayContext) -> Result<()> {
    platform::run(context)
}
