//! Cross-process "one instance per plugin GUID" enforcement.
//!
//! Each identity maps to a named lock. The file backend takes an exclusive
//! non-blocking OS file lock on `{lock_dir}/{name}.lock`. The file itself
//! stays on disk; only the lock matters, and the kernel drops it with the
//! holder's handle, so a crashed host never wedges its plugins.

use super::Guid;
use std::collections::HashSet;
use std::fs::{File, OpenOptions, TryLockError};
use std::io;
use std::path::{Path, PathBuf};

/// A named, exclusive, non-blocking lock.
pub trait LockProvider: Send + Sync {
    /// `Ok(None)` when another holder owns `name`.
    fn try_acquire(&self, name: &str) -> io::Result<Option<InstanceLock>>;
}

pub trait LockHandle: Send {
    fn unlock(self: Box<Self>);
}

/// Ownership of a named lock. Released by [`InstanceLock::release`], or on
/// drop if that never happened.
pub struct InstanceLock {
    name: String,
    handle: Option<Box<dyn LockHandle>>,
}

impl InstanceLock {
    pub fn new(name: impl Into<String>, handle: Box<dyn LockHandle>) -> Self {
        Self {
            name: name.into(),
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_held(&self) -> bool {
        self.handle.is_some()
    }

    /// Returns false if the lock was already released.
    pub fn release(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.unlock();
                log::debug!("Released instance lock {}", self.name);
                true
            }
            None => false,
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for InstanceLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceLock")
            .field("name", &self.name)
            .field("held", &self.is_held())
            .finish()
    }
}

pub struct FileLockProvider {
    dir: PathBuf,
}

impl FileLockProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        let file_name: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || "{}-_.".contains(c) { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.lock", file_name))
    }
}

impl LockProvider for FileLockProvider {
    fn try_acquire(&self, name: &str) -> io::Result<Option<InstanceLock>> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.lock_path(name);

        match lock_file(&path)? {
            Some(handle) => Ok(Some(InstanceLock::new(name, Box::new(handle)))),
            None => Ok(None),
        }
    }
}

struct FileLock {
    file: File,
    path: PathBuf,
}

fn lock_file(path: &Path) -> io::Result<Option<FileLock>> {
    let file = OpenOptions::new().create(true).truncate(false).write(true).open(path)?;
    // Separate handles conflict even within one process.
    match file.try_lock() {
        Ok(()) => Ok(Some(FileLock { file, path: path.to_path_buf() })),
        Err(TryLockError::WouldBlock) => Ok(None),
        Err(TryLockError::Error(e)) => Err(e),
    }
}

impl LockHandle for FileLock {
    fn unlock(self: Box<Self>) {
        if let Err(e) = self.file.unlock() {
            log::warn!("Failed to unlock {}: {}", self.path.display(), e);
        }
        log::trace!("Unlocked {}", self.path.display());
    }
}

#[derive(Debug)]
pub enum GuardOutcome {
    Acquired(InstanceLock),
    /// The embedded plugin is never locked against itself.
    Exempt,
    /// Another process owns this identity.
    Held,
}

pub struct InstanceGuard {
    provider: Box<dyn LockProvider>,
    exempt: HashSet<Guid>,
}

impl InstanceGuard {
    pub fn new(provider: Box<dyn LockProvider>) -> Self {
        Self {
            provider,
            exempt: HashSet::new(),
        }
    }

    /// Identities that come from the embedded module. The same binary may
    /// also sit in the plugin directory and must not lock itself out.
    pub fn exempt(&mut self, guid: Guid) {
        self.exempt.insert(guid);
    }

    pub fn lock_name(guid: Guid) -> String {
        guid.canonical()
    }

    pub fn claim(&self, guid: Guid) -> io::Result<GuardOutcome> {
        if self.exempt.contains(&guid) {
            return Ok(GuardOutcome::Exempt);
        }

        match self.provider.try_acquire(&Self::lock_name(guid))? {
            Some(lock) => Ok(GuardOutcome::Acquired(lock)),
            None => Ok(GuardOutcome::Held),
        }
    }
}
