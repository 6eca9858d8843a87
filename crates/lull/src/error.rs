//! Error types for the dispatch coordinator.
//!
//! This module defines the central `Error` enum, which captures every failure
//! the coordinator can surface to its caller. Benign races (cancelling or
//! releasing a task that already finished) are deliberately absent: they are
//! no-ops, not errors.
//!
//! ## Error Cases
//! - `DuplicateId`: An id collided with an outstanding task. This is an
//!   invariant breach in the id source, not a runtime condition.
//! - `ShuttingDown`: A request arrived after shutdown began.
//! - `PoolShutdown`: A unit was submitted to a pool that no longer accepts
//!   work.
//! - `NoRuntime`: The coordinator was constructed outside a Tokio runtime.
//! - `InvalidConfig`: A configuration value failed validation.

use crate::id::TaskId;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for the dispatch coordinator.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The registry already holds a task with this id.
    #[error("Task id {id} is already registered")]
    DuplicateId { id: TaskId },

    /// The coordinator has started (or finished) shutting down.
    #[error("Coordinator is shutting down")]
    ShuttingDown,

    /// The worker pool refused the unit because it was shut down.
    #[error("Worker pool is shut down")]
    PoolShutdown,

    /// No Tokio runtime was available when the coordinator was created.
    #[error("No Tokio runtime is available on this thread")]
    NoRuntime,

    /// A configuration value was rejected.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}
