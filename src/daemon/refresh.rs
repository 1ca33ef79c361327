use super::{EventBus, HostEvent};
use crate::builtin;
use crate::plugins::{CommandKey, IconImage, PluginManager};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// What changed since the last refresh. `None` fields are unchanged; a
/// plugin that stops providing an icon or tooltip yields the host default.
#[derive(Debug, Clone, Default)]
pub struct RefreshDelta {
    pub icon: Option<IconImage>,
    pub tooltip: Option<String>,
    pub commands: Vec<CommandKey>,
}

impl RefreshDelta {
    pub fn is_empty(&self) -> bool {
        self.icon.is_none() && self.tooltip.is_none() && self.commands.is_empty()
    }
}

/// Periodic "did anything change" check. At most one refresh is outstanding:
/// while the UI has not called [`Refresher::complete`], ticks do nothing and
/// the plugins' change flags stay unread.
pub struct Refresher {
    manager: Arc<Mutex<PluginManager>>,
    events: Arc<EventBus>,
    in_flight: AtomicBool,
}

impl Refresher {
    pub fn new(manager: Arc<Mutex<PluginManager>>, events: Arc<EventBus>) -> Self {
        Self {
            manager,
            events,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Returns whether a refresh was published.
    pub fn tick(&self) -> bool {
        if self.in_flight.load(Ordering::SeqCst) {
            return false;
        }
        self.events.clear_refresh_request();

        let delta = {
            let manager = self.manager.lock().unwrap();
            let registry = manager.registry();
            RefreshDelta {
                icon: registry
                    .icon_changed()
                    .then(|| registry.icon().unwrap_or_else(builtin::default_icon)),
                tooltip: registry
                    .tooltip_changed()
                    .then(|| registry.tooltip().unwrap_or_else(|| builtin::DEFAULT_TOOLTIP.to_string())),
                commands: registry.changed_commands(true),
            }
        };
        if delta.is_empty() {
            return false;
        }

        log::debug!(
            "Refresh: icon={}, tooltip={}, {} commands",
            delta.icon.is_some(),
            delta.tooltip.is_some(),
            delta.commands.len()
        );
        self.in_flight.store(true, Ordering::SeqCst);
        self.events.send(HostEvent::Refresh(delta));
        true
    }

    pub fn complete(&self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Tick every `interval`, and whenever a plugin requests a refresh.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let mut rx = self.events.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick();
                    }
                    event = rx.recv() => match event {
                        Ok(HostEvent::RefreshRequested) => {
                            self.tick();
                        }
                        Ok(HostEvent::Quit) | Err(RecvError::Closed) => break,
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            log::debug!("Refresher skipped {} events", skipped);
                        }
                    },
                }
            }
            log::debug!("Refresher stopped");
        })
    }
}
