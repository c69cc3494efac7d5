use std::collections::HashMap;
use std::sync::Mutex;

use tokio::task::JoinHandle;

/// Poll timer registry, keyed by the task's immutable id — never by a
/// position, which would go stale the moment a task is removed.
///
/// One handle per task: tracking a new timer under an id aborts the
/// previous one, so a retry can never leave two pollers racing on the
/// same record. Dropping the registry aborts everything still running.
#[derive(Debug, Default)]
pub struct Poller {
    timers: Mutex<HashMap<uuid::Uuid, JoinHandle<()>>>,
}

impl Poller {
    pub fn new() -> Self {
        Poller::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<uuid::Uuid, JoinHandle<()>>> {
        self.timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register the poll timer for a task, superseding any previous one.
    pub fn track(&self, id: uuid::Uuid, handle: JoinHandle<()>) {
        if let Some(old) = self.lock().insert(id, handle) {
            old.abort();
        }
    }

    /// Abort and forget the timer for a task. Returns whether one existed.
    pub fn cancel(&self, id: &uuid::Uuid) -> bool {
        match self.lock().remove(id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, handle) in self.lock().drain() {
            handle.abort();
        }
    }

    /// Timers that are still live. Finished handles may linger in the map
    /// until their task is stopped or removed; they are not active.
    pub fn active_count(&self) -> usize {
        self.lock().values().filter(|h| !h.is_finished()).count()
    }

    pub fn is_active(&self, id: &uuid::Uuid) -> bool {
        self.lock().get(id).is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
