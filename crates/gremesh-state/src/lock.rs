//! Global mesh lock.
//!
//! A single named lock scoped to the tunnel record table. Holding it
//! serializes the check-then-create step of every attach event; readers do
//! not take it.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use tracing::trace;

use crate::error::{StateError, StateResult};

/// In-process advisory lock with timed acquisition.
#[derive(Debug, Default)]
pub struct MeshLock {
    held: Mutex<bool>,
    released: Condvar,
}

impl MeshLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait up to `timeout` for the lock.
    ///
    /// Returns [`StateError::LockTimeout`] if another holder keeps it for
    /// the whole window.
    pub fn acquire(&self, timeout: Duration) -> StateResult<MeshLockGuard<'_>> {
        let held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut held, _) = self
            .released
            .wait_timeout_while(held, timeout, |held| *held)
            .unwrap_or_else(PoisonError::into_inner);
        if *held {
            return Err(StateError::LockTimeout(timeout));
        }
        *held = true;
        trace!("mesh lock acquired");
        Ok(MeshLockGuard { lock: self })
    }

    /// Whether some caller currently holds the lock.
    pub fn is_held(&self) -> bool {
        *self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        *held = false;
        drop(held);
        self.released.notify_one();
        trace!("mesh lock released");
    }
}

/// Releases the [`MeshLock`] when dropped.
#[derive(Debug)]
#[must_use = "the mesh lock is released as soon as the guard is dropped"]
pub struct MeshLockGuard<'a> {
    lock: &'a MeshLock,
}

impl MeshLockGuard<'_> {
    /// Release explicitly. Equivalent to dropping the guard.
    pub fn release(self) {}
}

impl Drop for MeshLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
