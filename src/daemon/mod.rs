mod refresh;

pub use refresh::{RefreshDelta, Refresher};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Events a slow receiver may fall behind by before it sees `Lagged`.
pub const EVENT_CAPACITY: usize = 64;

/// How long after startup the tray shows that some binaries were rejected.
pub const SIGNATURE_NOTICE_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub enum HostEvent {
    /// A plugin asked for an immediate icon/tooltip/menu check.
    RefreshRequested,
    /// Something changed; the UI applies it and calls [`Refresher::complete`].
    Refresh(RefreshDelta),
    /// At least one plugin binary failed signature validation.
    SignatureWarning,
    Quit,
}

/// Host-wide broadcast between plugins, the refresher and the tray thread.
///
/// Plugin refresh requests are coalesced: until the refresher has looked at
/// the registry again, further requests publish nothing.
pub struct EventBus {
    tx: broadcast::Sender<HostEvent>,
    refresh_requested: AtomicBool,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tx,
            refresh_requested: AtomicBool::new(false),
        }
    }

    /// Returns how many receivers got the event.
    pub fn send(&self, event: HostEvent) -> usize {
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                log::debug!("No listener for {:?}", event);
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.tx.subscribe()
    }

    /// Returns false when an earlier request is still pending.
    pub fn request_refresh(&self) -> bool {
        if self.refresh_requested.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.send(HostEvent::RefreshRequested);
        true
    }

    /// Called by the refresher before it reads the registry.
    pub fn clear_refresh_request(&self) {
        self.refresh_requested.store(false, Ordering::SeqCst);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Publish [`HostEvent::SignatureWarning`] after [`SIGNATURE_NOTICE_DELAY`].
pub fn schedule_signature_notice(events: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(SIGNATURE_NOTICE_DELAY).await;
        log::warn!("Some plugins were not loaded because their signature could not be verified");
        events.send(HostEvent::SignatureWarning);
    })
}
