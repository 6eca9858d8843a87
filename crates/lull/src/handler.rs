//! The work-execution callback supplied by the embedding application.

use crate::id::TaskId;
use core::fmt;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Executes one dispatched request.
///
/// Invoked on a pool task, concurrently with other invocations. Long-running
/// implementations should observe [`TaskContext::cancelled`] at safe points;
/// a handler that ignores it delays teardown until the coordinator's drain
/// timeout but never blocks it.
///
/// Any `Fn(R, TaskContext) -> impl Future<Output = Result<(), E>>` closure is
/// a handler.
pub trait Handler<R>: Send + Sync + 'static {
    type Error: fmt::Display + Send + 'static;

    fn handle(
        &self,
        request: R,
        ctx: TaskContext,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

impl<R, F, Fut, E> Handler<R> for F
where
    F: Fn(R, TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send,
    E: fmt::Display + Send + 'static,
{
    type Error = E;

    fn handle(&self, request: R, ctx: TaskContext) -> impl Future<Output = Result<(), E>> + Send {
        self(request, ctx)
    }
}

/// Per-task view handed to the [`Handler`].
#[derive(Clone, Debug)]
pub struct TaskContext {
    id: TaskId,
    token: CancellationToken,
}

impl TaskContext {
    pub(crate) fn new(id: TaskId, token: CancellationToken) -> Self {
        Self { id, token }
    }

    pub const fn id(&self) -> TaskId {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the task has been asked to stop.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// The underlying token, for handing to nested work.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// How a dispatched task ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// The handler returned an error.
    Failed(String),
    /// The handler panicked.
    Panicked(String),
    /// The task was cancelled, either explicitly or by teardown.
    Cancelled,
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::Panicked(message) => write!(f, "panicked: {message}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Completion signal published for every dispatched task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskEvent {
    pub id: TaskId,
    pub outcome: TaskOutcome,
}
