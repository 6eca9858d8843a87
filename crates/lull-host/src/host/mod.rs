//! Host-side plumbing around a [`lull::WorkerService`].
//!
//! ## Structure
//!
//! - [`config`] - CLI arguments and their validation.
//! - [`command`] - the stdin line protocol.
//! - [`job`] - the demo jobs and their handler.
//! - [`telemetry`] - logging and OpenTelemetry exporters.

pub mod command;
pub mod config;
pub mod job;
pub mod telemetry;
