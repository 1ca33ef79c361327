use super::dispatch::PluginHandle;
use super::instance_guard::InstanceLock;
use super::Guid;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseState {
    Running,
    ClosePending,
    Closed,
}

/// Host-side record of one loaded plugin.
pub struct PluginDescriptor {
    pub name: String,
    pub guid: Guid,
    pub requires_elevation: bool,
    pub has_click_handler: bool,
    handle: Arc<PluginHandle>,
    lock: Option<InstanceLock>,
    state: CloseState,
}

impl PluginDescriptor {
    /// `lock` is `None` for identities exempt from the instance guard.
    pub fn new(handle: PluginHandle, lock: Option<InstanceLock>) -> Self {
        Self {
            name: handle.name(),
            guid: handle.guid(),
            requires_elevation: handle.requires_elevation(),
            has_click_handler: handle.has_click_handler(),
            handle: Arc::new(handle),
            lock,
            state: CloseState::Running,
        }
    }

    pub fn handle(&self) -> &Arc<PluginHandle> {
        &self.handle
    }

    pub fn state(&self) -> CloseState {
        self.state
    }

    pub fn holds_lock(&self) -> bool {
        self.lock.as_ref().is_some_and(InstanceLock::is_held)
    }

    pub fn can_close(&self, prior_veto: bool) -> bool {
        self.handle.can_close(prior_veto)
    }

    /// Moves to `ClosePending` and gives up the instance lock. Repeat calls
    /// do nothing.
    pub fn begin_close(&mut self) {
        if self.state != CloseState::Running {
            return;
        }
        self.handle.begin_close();
        if let Some(lock) = self.lock.as_mut() {
            lock.release();
        }
        self.state = CloseState::ClosePending;
    }

    pub fn poll_closed(&mut self) -> bool {
        match self.state {
            CloseState::Closed => true,
            CloseState::Running => false,
            CloseState::ClosePending => {
                if self.handle.is_closed() {
                    log::debug!("Plugin {} closed", self.name);
                    self.state = CloseState::Closed;
                    true
                } else {
                    false
                }
            }
        }
    }
}

impl std::fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name)
            .field("guid", &self.guid)
            .field("requires_elevation", &self.requires_elevation)
            .field("has_click_handler", &self.has_click_handler)
            .field("state", &self.state)
            .finish()
    }
}
