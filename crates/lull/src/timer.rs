//! Rearm-able idle timer.
//!
//! There is exactly one [`IdleTimer`] per coordinator. Each [`reset`] cancels
//! whatever fire is pending and, if auto-close is enabled, schedules a new one
//! relative to now. The timer itself knows nothing about outstanding tasks:
//! the callback supplied to `reset` re-checks the registry when it fires.
//!
//! [`reset`]: IdleTimer::reset

use crate::config::AutoCloseConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{runtime::Handle, task::AbortHandle, time::sleep};

#[derive(Debug, Default)]
struct TimerState {
    /// Bumped on every reset/cancel; a fire only proceeds if it still matches.
    generation: u64,
    pending: Option<AbortHandle>,
    closed: bool,
}

impl TimerState {
    fn disarm(&mut self) -> bool {
        self.generation = self.generation.wrapping_add(1);
        match self.pending.take() {
            Some(pending) => {
                pending.abort();
                true
            }
            None => false,
        }
    }

    /// Claims the fire for `generation`, clearing the pending slot.
    fn claim(&mut self, generation: u64) -> bool {
        if self.closed || self.generation != generation {
            return false;
        }
        self.pending = None;
        true
    }
}

/// A single deferred trigger that fires after a quiescence period.
#[derive(Debug)]
pub struct IdleTimer {
    handle: Handle,
    state: Arc<Mutex<TimerState>>,
}

impl IdleTimer {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            state: Arc::new(Mutex::new(TimerState::default())),
        }
    }

    /// Cancels any pending fire and schedules `on_fire` after the configured
    /// idle period, if auto-close is enabled with a positive duration.
    ///
    /// Returns `true` if a new fire was scheduled. After [`Self::close`] this
    /// never schedules anything.
    pub fn reset<F, Fut>(&self, config: &AutoCloseConfig, on_fire: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.state.lock();
        state.disarm();

        if state.closed {
            return false;
        }
        let Some(delay) = config.schedule_after() else {
            #[cfg(feature = "tracing")]
            tracing::trace!("Idle timer disarmed (auto-close off)");
            return false;
        };

        let generation = state.generation;
        let shared = Arc::clone(&self.state);
        let task = self.handle.spawn(async move {
            sleep(delay).await;
            // The lock is released before the callback runs so that the
            // callback may reset or close this timer itself.
            let claimed = shared.lock().claim(generation);
            if claimed {
                #[cfg(feature = "tracing")]
                tracing::debug!("Idle timer fired after {delay:?}");
                on_fire().await;
            }
        });
        state.pending = Some(task.abort_handle());

        #[cfg(feature = "tracing")]
        tracing::trace!("Idle timer armed for {delay:?}");
        true
    }

    /// Cancels any pending fire. Returns `true` if one was pending.
    pub fn cancel(&self) -> bool {
        self.state.lock().disarm()
    }

    /// Cancels any pending fire and refuses all future resets.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.disarm();
        state.closed = true;
    }

    /// Whether a fire is scheduled and has not been claimed yet.
    pub fn is_pending(&self) -> bool {
        self.state.lock().pending.is_some()
    }
}
