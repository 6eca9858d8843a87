//! Asynchronous worker pool for dispatched units.
//!
//! This module defines the [`WorkerPool`] struct, which runs every submitted
//! unit as its own Tokio task. The default policy places no upper bound on
//! concurrency; a bounded policy gates execution behind a semaphore instead.
//!
//! All units share the pool's shutdown [`CancellationToken`]. Cancelling it
//! drops each unit at its next await point, which is the forced half of
//! teardown: a unit that never yields cannot be interrupted this way and is
//! left to finish on its own while its results are ignored.

use crate::{
    config::PoolPolicy,
    error::{Error, Result},
};
use core::time::Duration;
use std::sync::Arc;
use tokio::{
    runtime::Handle,
    sync::Semaphore,
    task::AbortHandle,
    time::timeout,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Handle to a unit running on the pool.
#[derive(Debug)]
pub struct UnitHandle {
    abort: AbortHandle,
}

impl UnitHandle {
    /// Aborts the unit at its next await point.
    pub fn abort(&self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// Executes submitted units concurrently on a Tokio runtime.
#[derive(Debug)]
pub struct WorkerPool {
    handle: Handle,
    shutdown_token: CancellationToken,
    tracker: TaskTracker,
    permits: Option<Arc<Semaphore>>,
}

impl WorkerPool {
    /// Creates a pool that spawns onto `handle`.
    pub fn new(handle: Handle, policy: PoolPolicy) -> Self {
        let permits = match policy {
            PoolPolicy::Unbounded => None,
            PoolPolicy::Bounded(limit) => Some(Arc::new(Semaphore::new(limit))),
        };

        #[cfg(feature = "tracing")]
        tracing::debug!("Worker pool created ({policy:?})");

        Self {
            handle,
            shutdown_token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            permits,
        }
    }

    /// Spawns `unit` onto the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolShutdown`] if [`Self::shutdown`] was already
    /// called.
    pub fn submit<F>(&self, unit: F) -> Result<UnitHandle>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_shutdown() {
            return Err(Error::PoolShutdown);
        }

        let shutdown_token = self.shutdown_token.clone();
        let permits = self.permits.clone();

        let task = async move {
            let _permit = match permits {
                Some(permits) => tokio::select! {
                    biased;
                    () = shutdown_token.cancelled() => return,
                    permit = permits.acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => return,
                    },
                },
                None => None,
            };

            tokio::select! {
                biased;
                () = shutdown_token.cancelled() => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("Unit interrupted by pool shutdown");
                }
                () = unit => {}
            }
        };

        let join = self.tracker.spawn_on(task, &self.handle);
        Ok(UnitHandle {
            abort: join.abort_handle(),
        })
    }

    /// Number of units that have not exited yet, queued ones included.
    pub fn active(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Refuses further submissions and interrupts every live unit.
    ///
    /// Returns immediately; use [`Self::wait`] to observe the units exiting.
    pub fn shutdown(&self) {
        if self.is_shutdown() {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Shutting down worker pool ({} active units)", self.active());

        self.shutdown_token.cancel();
        self.tracker.close();
    }

    /// Waits up to `limit` for every unit to exit after [`Self::shutdown`].
    ///
    /// Returns `false` if some unit was still running when the limit expired.
    pub async fn wait(&self, limit: Duration) -> bool {
        match timeout(limit, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Worker pool drain timed out ({} units still active)",
                    self.active()
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portable_atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    fn pool(policy: PoolPolicy) -> WorkerPool {
        WorkerPool::new(Handle::current(), policy)
    }

    #[tokio::test]
    async fn submitted_units_run() {
        let pool = pool(PoolPolicy::Unbounded);
        let (tx, rx) = oneshot::channel();
        pool.submit(async move {
            let _ = tx.send(7);
        })
        .unwrap();
        assert_eq!(rx.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn bounded_pool_caps_concurrency() {
        const UNITS: usize = 16;

        let pool = pool(PoolPolicy::Bounded(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..UNITS {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.shutdown_after_drain().await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn shutdown_interrupts_pending_units() {
        let pool = pool(PoolPolicy::Unbounded);
        let (tx, rx) = oneshot::channel::<()>();
        pool.submit(async move {
            // Never completes on its own; dropping it drops `tx`.
            std::future::pending::<()>().await;
            drop(tx);
        })
        .unwrap();

        assert_eq!(pool.active(), 1);
        pool.shutdown();
        assert!(pool.wait(Duration::from_secs(1)).await);
        assert!(rx.await.is_err());
        assert_eq!(pool.active(), 0);
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let pool = pool(PoolPolicy::Unbounded);
        pool.shutdown();
        assert!(pool.is_shutdown());
        assert_eq!(pool.submit(async {}).unwrap_err(), Error::PoolShutdown);
    }

    #[tokio::test]
    async fn unit_handle_aborts_a_single_unit() {
        let pool = pool(PoolPolicy::Unbounded);
        let unit = pool.submit(std::future::pending()).unwrap();
        unit.abort();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(unit.is_finished());
        assert_eq!(pool.active(), 0);
    }

    impl WorkerPool {
        async fn shutdown_after_drain(&self) {
            self.tracker.close();
            self.tracker.wait().await;
        }
    }
}
