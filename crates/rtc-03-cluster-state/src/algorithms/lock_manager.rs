//! # Resource Lock Manager
//!
//! Per-resource mutual exclusion for create, delete and sync operations.
//!
//! - `try_acquire` fails immediately with `ResourceBusy`.
//! - `acquire_until` queues on the resource's `Notify` until the holder
//!   releases or the deadline passes (`LockTimeout`).
//! - `preempt` hands the lock to a resync regardless of the holder. The
//!   displaced guard notices through `ensure_valid`, and its release becomes
//!   a no-op.
//!
//! Every grant carries a generation drawn from a manager-wide counter, so a
//! guard can never release a lock granted after it, even across entry pruning.

use parking_lot::Mutex;
use shared_types::RoomId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::{ClusterError, ResourceState};

#[derive(Debug)]
struct LockEntry {
    state: ResourceState,
    generation: u64,
    notify: Arc<Notify>,
}

impl LockEntry {
    fn idle() -> Self {
        Self {
            state: ResourceState::Idle,
            generation: 0,
            notify: Arc::new(Notify::new()),
        }
    }
}

type LockTable = Arc<Mutex<HashMap<RoomId, LockEntry>>>;

/// Remove an idle entry nobody is waiting on.
fn prune(table: &mut HashMap<RoomId, LockEntry>, resource: &RoomId) {
    let unused = table
        .get(resource)
        .is_some_and(|entry| !entry.state.is_locked() && Arc::strong_count(&entry.notify) == 1);
    if unused {
        table.remove(resource);
    }
}

/// Lock table owned by the cluster state manager.
#[derive(Debug, Default)]
pub struct LockManager {
    table: LockTable,
    generations: AtomicU64,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock if it is free.
    pub fn try_acquire(&self, resource: &RoomId, intent: ResourceState) -> Result<LockGuard, ClusterError> {
        let mut table = self.table.lock();
        let entry = table.entry(resource.clone()).or_insert_with(LockEntry::idle);
        if entry.state.is_locked() {
            return Err(ClusterError::ResourceBusy {
                resource: resource.clone(),
                held: entry.state,
            });
        }
        Ok(self.grant(entry, resource, intent))
    }

    /// Wait for the lock until `deadline`.
    pub async fn acquire_until(
        &self,
        resource: &RoomId,
        intent: ResourceState,
        deadline: Instant,
    ) -> Result<LockGuard, ClusterError> {
        let started = Instant::now();
        // Holding a handle keeps the entry (and its wait queue) from being pruned.
        let notify = {
            let mut table = self.table.lock();
            let entry = table.entry(resource.clone()).or_insert_with(LockEntry::idle);
            Arc::clone(&entry.notify)
        };

        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_acquire(resource, intent) {
                Ok(guard) => return Ok(guard),
                Err(ClusterError::ResourceBusy { held, .. }) => {
                    debug!(resource = %resource, held = ?held, "Waiting for resource lock");
                }
                Err(e) => return Err(e),
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }

        drop(notify);
        prune(&mut self.table.lock(), resource);
        Err(ClusterError::LockTimeout {
            resource: resource.clone(),
            waited_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Take the lock for a resync, displacing any holder.
    pub fn preempt(&self, resource: &RoomId) -> LockGuard {
        let mut table = self.table.lock();
        let entry = table.entry(resource.clone()).or_insert_with(LockEntry::idle);
        if entry.state.is_locked() {
            debug!(resource = %resource, displaced = ?entry.state, "Resource lock preempted");
        }
        self.grant(entry, resource, ResourceState::LockedForSync)
    }

    /// Current state of a resource.
    pub fn state(&self, resource: &RoomId) -> ResourceState {
        self.table
            .lock()
            .get(resource)
            .map_or(ResourceState::Idle, |entry| entry.state)
    }

    /// Number of resources currently locked.
    pub fn locked_count(&self) -> usize {
        self.table
            .lock()
            .values()
            .filter(|entry| entry.state.is_locked())
            .count()
    }

    /// Number of entries in the table, locked or not.
    pub fn entry_count(&self) -> usize {
        self.table.lock().len()
    }

    fn grant(&self, entry: &mut LockEntry, resource: &RoomId, intent: ResourceState) -> LockGuard {
        debug_assert!(entry.state.can_transition_to(intent));
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        entry.state = intent;
        entry.generation = generation;
        LockGuard {
            table: Arc::clone(&self.table),
            resource: resource.clone(),
            generation,
            state: intent,
        }
    }
}

/// A held resource lock, released on drop.
#[derive(Debug)]
pub struct LockGuard {
    table: LockTable,
    resource: RoomId,
    generation: u64,
    state: ResourceState,
}

impl LockGuard {
    pub fn resource(&self) -> &RoomId {
        &self.resource
    }

    /// State this guard put the resource in.
    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// Whether this guard still owns the lock.
    pub fn is_valid(&self) -> bool {
        self.table
            .lock()
            .get(&self.resource)
            .is_some_and(|entry| entry.generation == self.generation)
    }

    /// Fail with `LockPreempted` if a resync took the lock over.
    pub fn ensure_valid(&self) -> Result<(), ClusterError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(ClusterError::LockPreempted {
                resource: self.resource.clone(),
            })
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        let Some(entry) = table.get_mut(&self.resource) else {
            return;
        };
        if entry.generation != self.generation {
            return;
        }
        entry.state = ResourceState::Idle;
        entry.notify.notify_waiters();
        prune(&mut table, &self.resource);
    }
}
