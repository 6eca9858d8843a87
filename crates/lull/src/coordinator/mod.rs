//! Dispatch coordinator.
//!
//! The [`Coordinator`] is the public face of the crate. It allocates task ids,
//! registers each task in the [`Registry`], runs it on the [`WorkerPool`] and
//! re-arms the [`IdleTimer`] every time a task is released. When the timer
//! fires with nothing outstanding, the coordinator shuts itself down and
//! wakes everyone waiting on [`Coordinator::terminated`].
//!
//! ## Ordering
//!
//! A unit always releases its id *before* re-arming the timer, so a fire can
//! never observe a count that the release was about to clear. The fire itself
//! re-reads the count instead of trusting the state at scheduling time: a
//! dispatch that lands during the idle window simply makes the fire a no-op,
//! and the next release schedules a fresh countdown.
//!
//! A dispatch retains its id and submits its unit under the pool lock, which
//! teardown also takes before shutting the pool down. Every accepted task is
//! therefore either released by its own unit or dropped with the pool, and in
//! both cases publishes exactly one [`TaskEvent`].

mod state;

pub use state::Lifecycle;

use crate::{
    config::{AutoCloseConfig, CoordinatorConfig, PoolPolicy},
    error::{Error, Result},
    handler::{Handler, TaskContext, TaskEvent, TaskOutcome},
    id::{IdSource, TaskId},
    pool::WorkerPool,
    registry::{Registry, TaskHandle},
    telemetry::{
        add_inflight, increment_auto_closes, increment_dispatched, increment_failures,
        record_task_duration,
    },
    timer::IdleTimer,
};
use core::{fmt, marker::PhantomData, time::Duration};
use futures::FutureExt;
use parking_lot::Mutex;
use state::LifecycleCell;
use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{Arc, Weak},
    time::Instant,
};
use tokio::{runtime::Handle, sync::broadcast};
use tokio_util::sync::CancellationToken;

/// Accepts work, runs it concurrently and closes itself once idle.
///
/// Cloning is cheap; every clone drives the same coordinator.
pub struct Coordinator<R, H> {
    inner: Arc<Inner<R, H>>,
}

struct Inner<R, H> {
    handler: H,
    runtime: Handle,
    ids: Box<dyn IdSource>,
    registry: Registry,
    timer: IdleTimer,
    pool: Mutex<Option<Arc<WorkerPool>>>,
    pool_policy: PoolPolicy,
    drain_timeout: Duration,
    auto_close: Mutex<AutoCloseConfig>,
    lifecycle: LifecycleCell,
    terminated: CancellationToken,
    events: broadcast::Sender<TaskEvent>,
    _request: PhantomData<fn(R)>,
}

impl<R, H> Clone for Coordinator<R, H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R, H> fmt::Debug for Coordinator<R, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("state", &self.inner.lifecycle.load())
            .field("outstanding", &self.inner.registry.count())
            .field("auto_close", &*self.inner.auto_close.lock())
            .finish_non_exhaustive()
    }
}

impl<R, H> Coordinator<R, H>
where
    R: Send + 'static,
    H: Handler<R>,
{
    /// Creates a coordinator bound to the current Tokio runtime.
    ///
    /// Nothing is spawned until [`Self::init`] or the first dispatch.
    ///
    /// # Errors
    ///
    /// - [`Error::NoRuntime`] if called outside a Tokio runtime.
    /// - [`Error::InvalidConfig`] if `config` fails validation.
    pub fn new(handler: H, config: CoordinatorConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        Self::with_runtime(handler, config, runtime)
    }

    /// Creates a coordinator that spawns onto `runtime`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` fails validation.
    pub fn with_runtime(handler: H, config: CoordinatorConfig, runtime: Handle) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.events_capacity);

        #[cfg(feature = "tracing")]
        tracing::debug!("Coordinator created with {config:?}");

        Ok(Self {
            inner: Arc::new(Inner {
                handler,
                timer: IdleTimer::new(runtime.clone()),
                runtime,
                ids: config.ids.build(),
                registry: Registry::new(),
                pool: Mutex::new(None),
                pool_policy: config.pool,
                drain_timeout: config.drain_timeout,
                auto_close: Mutex::new(config.auto_close),
                lifecycle: LifecycleCell::new(),
                terminated: CancellationToken::new(),
                events,
                _request: PhantomData,
            }),
        })
    }

    /// Activates the coordinator and starts the first idle countdown.
    ///
    /// A coordinator that is never handed any work still closes itself after
    /// one idle period. Calling this more than once is harmless.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] once shutdown has begun.
    pub fn init(&self) -> Result<()> {
        self.inner.activate()
    }

    /// Submits `request` and returns its id without waiting for it to run.
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] if shutdown has begun.
    /// - [`Error::DuplicateId`] if the id source repeated an outstanding id.
    pub fn dispatch(&self, request: R) -> Result<TaskId> {
        let inner = &self.inner;
        inner.activate()?;

        // Held until the unit is on the pool: teardown takes the pool under
        // this lock, so it either sees the unit or rejected the dispatch.
        let mut slot = inner.pool.lock();
        let pool = inner.ensure_pool(&mut slot)?;

        let id = inner.ids.next_id();
        let token = CancellationToken::new();
        inner
            .registry
            .retain(id, TaskHandle::new(id, token.clone()))?;
        increment_dispatched();
        add_inflight(1);

        #[cfg(feature = "tracing")]
        tracing::debug!("Dispatching task {id}");

        // The guard is moved into the unit, so a unit dropped before its
        // first poll still releases and reports.
        let guard = ReleaseGuard::new(Arc::clone(inner), id);
        if let Err(_e) = pool.submit(run_unit(guard, request, token)) {
            #[cfg(feature = "tracing")]
            tracing::debug!("Task {id} rejected by the pool: {_e}");
            return Err(Error::ShuttingDown);
        }
        Ok(id)
    }

    /// Requests cooperative cancellation of task `id` and releases it.
    ///
    /// The count drops immediately, without waiting for the task to notice.
    /// Returns `false` if the task had already finished or was never known.
    pub fn cancel(&self, id: TaskId) -> bool {
        let inner = &self.inner;
        let Some(handle) = inner.registry.release(id) else {
            #[cfg(feature = "tracing")]
            tracing::trace!("cancel: task {id} is not outstanding");
            return false;
        };
        handle.cancel();
        add_inflight(-1);

        #[cfg(feature = "tracing")]
        tracing::debug!("Cancelled task {id} after {:?}", handle.age());

        inner.rearm();
        true
    }

    /// Current auto-close settings.
    pub fn auto_close(&self) -> AutoCloseConfig {
        *self.inner.auto_close.lock()
    }

    /// Enables or disables auto-close and re-evaluates the idle timer.
    ///
    /// Disabling cancels a pending countdown; enabling starts a fresh one
    /// from now, whatever the number of outstanding tasks.
    pub fn set_auto_close_enabled(&self, enabled: bool) {
        self.inner.update_auto_close(|config| config.enabled = enabled);
    }

    /// Changes the idle period and restarts the countdown from now.
    pub fn set_auto_close_duration(&self, idle: Duration) {
        self.inner.update_auto_close(|config| config.idle = idle);
    }

    /// Replaces both auto-close settings at once.
    pub fn set_auto_close(&self, auto_close: AutoCloseConfig) {
        self.inner.update_auto_close(|config| *config = auto_close);
    }

    /// Tears the coordinator down.
    ///
    /// Cancels the idle timer and every outstanding task, interrupts the pool
    /// and waits up to the configured drain timeout for units to exit. Only
    /// the first call does the work and returns `true`; later or concurrent
    /// calls wait for that teardown to finish and return `false`.
    pub async fn shutdown(&self) -> bool {
        self.inner.shutdown().await
    }

    /// Resolves once the coordinator is [`Lifecycle::Terminated`].
    pub async fn terminated(&self) {
        self.inner.terminated.cancelled().await;
    }

    pub fn state(&self) -> Lifecycle {
        self.inner.lifecycle.load()
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.is_cancelled()
    }

    /// Number of outstanding tasks.
    pub fn outstanding(&self) -> usize {
        self.inner.registry.count()
    }

    /// Ids of the outstanding tasks, in ascending order.
    pub fn outstanding_ids(&self) -> Vec<TaskId> {
        self.inner.registry.ids()
    }

    /// Whether an idle countdown is currently pending.
    pub fn idle_countdown_pending(&self) -> bool {
        self.inner.timer.is_pending()
    }

    /// Subscribes to the completion event of every task dispatched from now
    /// on.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }
}

impl<R, H> Inner<R, H>
where
    R: Send + 'static,
    H: Handler<R>,
{
    fn activate(self: &Arc<Self>) -> Result<()> {
        match self.lifecycle.activate() {
            Ok(true) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Coordinator active");
                self.rearm();
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(_) => Err(Error::ShuttingDown),
        }
    }

    /// Returns the live pool in `slot`, creating it on first use or after it
    /// was shut down while the coordinator is still active.
    fn ensure_pool<'a>(&self, slot: &'a mut Option<Arc<WorkerPool>>) -> Result<&'a WorkerPool> {
        // Checked under the pool lock: shutdown flips the lifecycle before
        // taking this lock, so no pool can be created after teardown.
        if !self.lifecycle.load().accepts_work() {
            return Err(Error::ShuttingDown);
        }
        if slot.as_ref().is_none_or(|pool| pool.is_shutdown()) {
            *slot = Some(Arc::new(WorkerPool::new(self.runtime.clone(), self.pool_policy)));
        }
        slot.as_deref().ok_or(Error::PoolShutdown)
    }

    async fn shutdown(&self) -> bool {
        if !self.lifecycle.begin_shutdown() {
            self.terminated.cancelled().await;
            return false;
        }
        self.teardown().await;
        true
    }

    /// Runs after this caller moved the lifecycle into `ShuttingDown`.
    async fn teardown(&self) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Shutting down coordinator ({} tasks outstanding)",
            self.registry.count()
        );

        self.timer.close();

        let cancelled = self.registry.cancel_all();
        add_inflight(-(cancelled as i64));

        let pool = self.pool.lock().take();
        if let Some(pool) = pool {
            pool.shutdown();
            pool.wait(self.drain_timeout).await;
        }

        self.lifecycle.finish();
        self.terminated.cancel();

        #[cfg(feature = "tracing")]
        tracing::info!("Coordinator terminated");
    }

    fn update_auto_close(self: &Arc<Self>, update: impl FnOnce(&mut AutoCloseConfig)) {
        let mut config = self.auto_close.lock();
        update(&mut config);

        #[cfg(feature = "tracing")]
        tracing::debug!("Auto-close set to {:?}", *config);

        if self.lifecycle.load() == Lifecycle::Active {
            self.schedule_idle(&config);
        }
    }

    /// Re-evaluates the idle timer after a release.
    fn rearm(self: &Arc<Self>) {
        let config = self.auto_close.lock();
        if self.lifecycle.load() == Lifecycle::Active {
            self.schedule_idle(&config);
        }
    }

    /// Must be called with the auto-close lock held so that concurrent
    /// updates reach the timer in the order they were applied.
    fn schedule_idle(self: &Arc<Self>, config: &AutoCloseConfig) {
        let weak = Arc::downgrade(self);
        self.timer.reset(config, move || on_idle(weak));
    }
}

/// Idle timer callback: terminate if nothing is outstanding.
async fn on_idle<R, H>(weak: Weak<Inner<R, H>>)
where
    R: Send + 'static,
    H: Handler<R>,
{
    let Some(inner) = weak.upgrade() else {
        return;
    };

    // Decided under the auto-close lock so that a setter racing this fire
    // either lands first and is honoured, or finds shutdown under way.
    let closing = {
        let config = inner.auto_close.lock();
        if config.schedule_after().is_none() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Idle timer fired after auto-close was turned off");
            return;
        }

        let outstanding = inner.registry.count();
        if outstanding > 0 {
            #[cfg(feature = "tracing")]
            tracing::debug!("Idle timer fired with {outstanding} tasks outstanding; staying up");
            return;
        }
        inner.lifecycle.begin_shutdown()
    };

    if closing {
        #[cfg(feature = "tracing")]
        tracing::info!("Idle period elapsed with no outstanding tasks; closing");
        inner.teardown().await;
        increment_auto_closes();
    }
}

/// Body of every dispatched task. Whatever way it exits, including being
/// dropped by the pool before it ever runs, `guard` releases the id.
async fn run_unit<R, H>(mut guard: ReleaseGuard<R, H>, request: R, token: CancellationToken)
where
    R: Send + 'static,
    H: Handler<R>,
{
    // Cancelled while waiting for a pool slot.
    if token.is_cancelled() {
        return;
    }

    let id = guard.id;
    let ctx = TaskContext::new(id, token.clone());
    let result = AssertUnwindSafe(guard.inner.handler.handle(request, ctx))
        .catch_unwind()
        .await;

    guard.outcome = match result {
        _ if token.is_cancelled() => TaskOutcome::Cancelled,
        Ok(Ok(())) => TaskOutcome::Completed,
        Ok(Err(e)) => {
            #[cfg(feature = "tracing")]
            tracing::warn!("Task {id} failed: {e}");
            increment_failures();
            TaskOutcome::Failed(e.to_string())
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            #[cfg(feature = "tracing")]
            tracing::error!("Task {id} panicked: {message}");
            increment_failures();
            TaskOutcome::Panicked(message)
        }
    };
}

/// Releases a task, re-arms the idle timer and publishes its [`TaskEvent`]
/// however its unit exits.
struct ReleaseGuard<R, H>
where
    R: Send + 'static,
    H: Handler<R>,
{
    inner: Arc<Inner<R, H>>,
    id: TaskId,
    started: Instant,
    outcome: TaskOutcome,
}

impl<R, H> ReleaseGuard<R, H>
where
    R: Send + 'static,
    H: Handler<R>,
{
    fn new(inner: Arc<Inner<R, H>>, id: TaskId) -> Self {
        Self {
            inner,
            id,
            started: Instant::now(),
            outcome: TaskOutcome::Cancelled,
        }
    }
}

impl<R, H> Drop for ReleaseGuard<R, H>
where
    R: Send + 'static,
    H: Handler<R>,
{
    fn drop(&mut self) {
        let id = self.id;
        if self.inner.registry.release(id).is_some() {
            add_inflight(-1);
            record_task_duration(self.started.elapsed().as_secs_f64() * 1_000.0);
        }
        self.inner.rearm();

        #[cfg(feature = "tracing")]
        tracing::debug!("Task {id} finished: {:?}", self.outcome);

        let outcome = core::mem::replace(&mut self.outcome, TaskOutcome::Cancelled);
        // No subscribers is not an error.
        let _ = self.inner.events.send(TaskEvent { id, outcome });
    }
}

impl<R, H> Drop for Inner<R, H> {
    fn drop(&mut self) {
        self.timer.close();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
