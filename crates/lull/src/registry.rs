//! In-flight task registry.
//!
//! The [`Registry`] maps every outstanding [`TaskId`] to the [`TaskHandle`]
//! used to cancel it, and keeps an atomic count alongside the map. Both are
//! mutated under the same lock so that `count() == len` whenever no retain or
//! release is in progress; the count itself is read without locking and is
//! only ever used as a liveness signal.

use crate::{
    error::{Error, Result},
    id::TaskId,
};
use parking_lot::Mutex;
use portable_atomic::{AtomicUsize, Ordering};
use std::{collections::HashMap, time::Instant};
use tokio_util::sync::CancellationToken;

/// Cancellation capability for one outstanding task.
#[derive(Clone, Debug)]
pub struct TaskHandle {
    id: TaskId,
    token: CancellationToken,
    registered_at: Instant,
}

impl TaskHandle {
    pub fn new(id: TaskId, token: CancellationToken) -> Self {
        Self {
            id,
            token,
            registered_at: Instant::now(),
        }
    }

    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Signals the running unit to stop at its next safe point.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Time since the task was registered.
    pub fn age(&self) -> core::time::Duration {
        self.registered_at.elapsed()
    }
}

/// Concurrent map of outstanding tasks plus their count.
#[derive(Debug, Default)]
pub struct Registry {
    outstanding: AtomicUsize,
    tasks: Mutex<HashMap<TaskId, TaskHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new outstanding task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateId`] if `id` is already registered. The
    /// existing entry is left untouched.
    pub fn retain(&self, id: TaskId, handle: TaskHandle) -> Result<()> {
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(&id) {
            #[cfg(feature = "tracing")]
            tracing::error!("retain: task {id} is already registered");
            return Err(Error::DuplicateId { id });
        }
        tasks.insert(id, handle);
        self.outstanding.fetch_add(1, Ordering::AcqRel);

        #[cfg(feature = "tracing")]
        tracing::trace!("retain: task {id} ({} outstanding)", tasks.len());
        Ok(())
    }

    /// Removes a task, returning its handle if it was still registered.
    ///
    /// Releasing an unknown id does nothing. A task that is cancelled and then
    /// finishes on its own is released twice; only the first call counts.
    pub fn release(&self, id: TaskId) -> Option<TaskHandle> {
        let mut tasks = self.tasks.lock();
        let handle = tasks.remove(&id)?;
        self.outstanding.fetch_sub(1, Ordering::AcqRel);

        #[cfg(feature = "tracing")]
        tracing::trace!("release: task {id} ({} outstanding)", tasks.len());
        Some(handle)
    }

    /// Number of outstanding tasks. May be stale by the time it is read.
    pub fn count(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.lock().contains_key(&id)
    }

    pub fn get(&self, id: TaskId) -> Option<TaskHandle> {
        self.tasks.lock().get(&id).cloned()
    }

    /// Snapshot of the outstanding ids, in ascending order.
    pub fn ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<_> = self.tasks.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Cancels every registered task and empties the registry.
    ///
    /// Returns how many tasks were cancelled. Only used during teardown.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<TaskHandle> = {
            let mut tasks = self.tasks.lock();
            let drained = tasks.drain().map(|(_, handle)| handle).collect();
            self.outstanding.store(0, Ordering::Release);
            drained
        };

        for handle in &drained {
            handle.cancel();
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("cancel_all: cancelled {} tasks", drained.len());
        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread::scope};

    fn handle(raw: u64) -> (TaskId, TaskHandle) {
        let id = TaskId::from_raw(raw);
        (id, TaskHandle::new(id, CancellationToken::new()))
    }

    #[test]
    fn retain_and_release_move_count_with_map() {
        let registry = Registry::new();
        let (a, ha) = handle(1);
        let (b, hb) = handle(2);

        registry.retain(a, ha).unwrap();
        registry.retain(b, hb).unwrap();
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.ids(), vec![a, b]);

        assert!(registry.release(a).is_some());
        assert_eq!(registry.count(), 1);
        assert!(!registry.contains(a));
        assert!(registry.contains(b));
    }

    #[test]
    fn duplicate_retain_is_rejected() {
        let registry = Registry::new();
        let (id, first) = handle(7);
        let (_, second) = handle(7);

        registry.retain(id, first).unwrap();
        assert_eq!(
            registry.retain(id, second),
            Err(Error::DuplicateId { id })
        );
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn release_is_idempotent() {
        let registry = Registry::new();
        let (id, h) = handle(3);
        registry.retain(id, h).unwrap();

        assert!(registry.release(id).is_some());
        assert!(registry.release(id).is_none());
        assert!(registry.release(TaskId::from_raw(999)).is_none());
        assert_eq!(registry.count(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn cancel_all_signals_and_clears() {
        let registry = Registry::new();
        let tokens: Vec<_> = (1..=3)
            .map(|raw| {
                let token = CancellationToken::new();
                let id = TaskId::from_raw(raw);
                registry
                    .retain(id, TaskHandle::new(id, token.clone()))
                    .unwrap();
                token
            })
            .collect();

        assert_eq!(registry.cancel_all(), 3);
        assert_eq!(registry.count(), 0);
        assert!(registry.ids().is_empty());
        assert!(tokens.iter().all(CancellationToken::is_cancelled));
    }

    #[test]
    fn concurrent_retain_release_keeps_count_consistent() {
        const THREADS: u64 = 8;
        const PER_THREAD: u64 = 512;

        let registry = Arc::new(Registry::new());
        scope(|s| {
            for t in 0..THREADS {
                let registry = Arc::clone(&registry);
                s.spawn(move || {
                    for i in 0..PER_THREAD {
                        let (id, h) = handle(t * PER_THREAD + i);
                        registry.retain(id, h).unwrap();
                        // Release every other id so some remain outstanding.
                        if i % 2 == 0 {
                            assert!(registry.release(id).is_some());
                        }
                    }
                });
            }
        });

        let expected = (THREADS * PER_THREAD / 2) as usize;
        assert_eq!(registry.count(), expected);
        assert_eq!(registry.ids().len(), expected);
    }
}
