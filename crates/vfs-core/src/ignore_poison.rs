//! Extension traits to ignore lock poisoning.
//!
//! Every lock in this crate guards state that stays consistent even if a holder panicked
//! (entry lists, staging buffers, task counters), so a poisoned lock is simply recovered.

use std::sync::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

pub(crate) trait IgnorePoison<T> {
    /// Locks the mutex, ignoring poison.
    fn lock_ignore_poison(&self) -> MutexGuard<'_, T>;
}

impl<T> IgnorePoison<T> for Mutex<T> {
    fn lock_ignore_poison(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub(crate) trait IgnorePoisonRw<T> {
    fn read_ignore_poison(&self) -> RwLockReadGuard<'_, T>;
    fn write_ignore_poison(&self) -> RwLockWriteGuard<'_, T>;
}

impl<T> IgnorePoisonRw<T> for RwLock<T> {
    fn read_ignore_poison(&self) -> RwLockReadGuard<'_, T> {
        self.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_ignore_poison(&self) -> RwLockWriteGuard<'_, T> {
        self.write().unwrap_or_else(|e| e.into_inner())
    }
}

pub(crate) trait CondvarIgnorePoison {
    /// Blocks while `condition` holds, ignoring poison.
    fn wait_while_ignore_poison<'a, T, F>(&self, guard: MutexGuard<'a, T>, condition: F) -> MutexGuard<'a, T>
    where
        F: FnMut(&mut T) -> bool;

    /// Like [`wait_while_ignore_poison`](Self::wait_while_ignore_poison) with an upper bound.
    /// Returns the guard and whether the wait timed out.
    fn wait_timeout_while_ignore_poison<'a, T, F>(
        &self,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
        condition: F,
    ) -> (MutexGuard<'a, T>, bool)
    where
        F: FnMut(&mut T) -> bool;
}

impl CondvarIgnorePoison for Condvar {
    fn wait_while_ignore_poison<'a, T, F>(&self, guard: MutexGuard<'a, T>, condition: F) -> MutexGuard<'a, T>
    where
        F: FnMut(&mut T) -> bool,
    {
        self.wait_while(guard, condition).unwrap_or_else(|e| e.into_inner())
    }

    fn wait_timeout_while_ignore_poison<'a, T, F>(
        &self,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
        condition: F,
    ) -> (MutexGuard<'a, T>, bool)
    where
        F: FnMut(&mut T) -> bool,
    {
        match self.wait_timeout_while(guard, timeout, condition) {
            Ok((guard, result)) => (guard, result.timed_out()),
            Err(e) => {
                let (guard, result) = e.into_inner();
                (guard, result.timed_out())
            }
        }
    }
}

/// Joins a worker thread unless we are running on it (a worker may drop the last handle
/// to its owner, and joining itself would deadlock).
pub(crate) fn join_unless_current(handle: std::thread::JoinHandle<()>) {
    if handle.thread().id() == std::thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        log::warn!("Worker thread panicked before join");
    }
}
