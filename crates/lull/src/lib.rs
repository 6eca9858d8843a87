//! An auto-closing multi-task worker.
//!
//! A [`Coordinator`] accepts requests, runs each one on a [`WorkerPool`],
//! tracks what is still outstanding in a [`Registry`] and shuts itself down
//! once nothing has been outstanding for the configured idle period.

mod config;
mod coordinator;
mod error;
mod handler;
mod id;
mod pool;
mod registry;
mod service;
mod telemetry;
mod timer;

pub use crate::config::*;
pub use crate::coordinator::*;
pub use crate::error::*;
pub use crate::handler::*;
pub use crate::id::*;
pub use crate::pool::*;
pub use crate::registry::*;
pub use crate::service::*;
#[cfg(feature = "metrics")]
pub use crate::telemetry::init_metric_handles;
pub use crate::timer::*;
