//! Lifecycle hooks for hosts that own a worker.
//!
//! A host typically creates the worker when the first trigger arrives,
//! forwards every subsequent trigger as a request and tears the worker down
//! when it is told to, or when the worker reports that it closed itself.
//! [`WorkerService`] maps those three moments onto a [`Coordinator`].

use crate::{
    config::CoordinatorConfig,
    coordinator::Coordinator,
    error::{Error, Result},
    handler::Handler,
    id::TaskId,
};

/// A [`Coordinator`] behind the hooks a host drives.
#[derive(Debug)]
pub struct WorkerService<R, H> {
    coordinator: Coordinator<R, H>,
}

impl<R, H> Clone for WorkerService<R, H> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<R, H> WorkerService<R, H>
where
    R: Send + 'static,
    H: Handler<R>,
{
    /// # Errors
    ///
    /// See [`Coordinator::new`].
    pub fn new(handler: H, config: CoordinatorConfig) -> Result<Self> {
        Ok(Self::from_coordinator(Coordinator::new(handler, config)?))
    }

    pub const fn from_coordinator(coordinator: Coordinator<R, H>) -> Self {
        Self { coordinator }
    }

    /// Called once when the host brings the worker up. Starts the idle
    /// countdown.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] if the worker was already torn down.
    pub fn on_create(&self) -> Result<()> {
        #[cfg(feature = "tracing")]
        tracing::info!("Worker created");
        self.coordinator.init()
    }

    /// Forwards one request to the worker.
    ///
    /// Returns `None` if the worker no longer accepts work; the request is
    /// dropped and the host should route later triggers to a fresh worker.
    pub fn on_request(&self, request: R) -> Option<TaskId> {
        match self.coordinator.dispatch(request) {
            Ok(id) => Some(id),
            Err(Error::ShuttingDown) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Worker is shutting down; request dropped");
                None
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to dispatch request: {_e}");
                None
            }
        }
    }

    /// Called when the host destroys the worker. Returns `true` if this call
    /// performed the teardown, `false` if the worker had already closed.
    pub async fn on_terminate(&self) -> bool {
        #[cfg(feature = "tracing")]
        tracing::info!("Worker terminating");
        self.coordinator.shutdown().await
    }

    pub const fn coordinator(&self) -> &Coordinator<R, H> {
        &self.coordinator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AutoCloseConfig,
        coordinator::Lifecycle,
        handler::{TaskContext, TaskOutcome},
    };
    use core::{convert::Infallible, time::Duration};

    fn service(idle_ms: u64) -> WorkerService<Duration, impl Handler<Duration>> {
        let config = CoordinatorConfig::default()
            .with_auto_close(AutoCloseConfig::new(true, Duration::from_millis(idle_ms)));
        WorkerService::new(
            |work: Duration, ctx: TaskContext| async move {
                tokio::select! {
                    () = tokio::time::sleep(work) => {}
                    () = ctx.cancelled() => {}
                }
                Ok::<_, Infallible>(())
            },
            config,
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn requests_flow_until_the_worker_closes_itself() {
        let service = service(100);
        service.on_create().unwrap();
        let mut events = service.coordinator().subscribe();

        let id = service.on_request(Duration::from_millis(30)).unwrap();
        assert_eq!(events.recv().await.unwrap().outcome, TaskOutcome::Completed);
        assert_eq!(service.coordinator().outstanding(), 0);
        assert!(service.coordinator().outstanding_ids().is_empty());
        assert_eq!(id, TaskId::from_raw(1));

        service.coordinator().terminated().await;
        assert_eq!(service.on_request(Duration::ZERO), None);
        assert!(!service.on_terminate().await);
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_cancels_work_in_flight() {
        let service = service(100);
        service.on_create().unwrap();
        service.on_request(Duration::from_secs(60)).unwrap();
        tokio::task::yield_now().await;

        assert!(service.on_terminate().await);
        assert_eq!(service.coordinator().state(), Lifecycle::Terminated);
        assert_eq!(service.coordinator().outstanding(), 0);
        assert_eq!(service.on_create(), Err(Error::ShuttingDown));
    }
}
