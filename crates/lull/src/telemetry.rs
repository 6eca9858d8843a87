//! Optional OpenTelemetry metrics for the coordinator.
//!
//! With the `metrics` feature, the embedding binary installs a meter provider
//! and hands a [`Meter`] to [`init_metric_handles`]; the coordinator then
//! records into the handles below. Without the feature every recorder is an
//! empty function.
//!
//! [`Meter`]: opentelemetry::metrics::Meter

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(feature = "metrics")]
static TASKS_DISPATCHED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static TASKS_INFLIGHT: OnceLock<UpDownCounter<i64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static TASK_FAILURES: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static TASK_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static AUTO_CLOSES: OnceLock<Counter<u64>> = OnceLock::new();

/// Registers the coordinator's instruments on `meter`.
///
/// Only the first call has any effect.
#[cfg(feature = "metrics")]
pub fn init_metric_handles(meter: Meter) {
    let _ = TASKS_DISPATCHED.set(
        meter
            .u64_counter("tasks_dispatched")
            .with_description("Total dispatched tasks")
            .build(),
    );

    let _ = TASKS_INFLIGHT.set(
        meter
            .i64_up_down_counter("tasks_inflight")
            .with_description("Tasks retained in the registry")
            .build(),
    );

    let _ = TASK_FAILURES.set(
        meter
            .u64_counter("task_failures")
            .with_description("Tasks whose handler errored or panicked")
            .build(),
    );

    let _ = TASK_DURATION_MS.set(
        meter
            .f64_histogram("task_duration")
            .with_unit("ms")
            .with_description("Time from dispatch to release")
            .build(),
    );

    let _ = AUTO_CLOSES.set(
        meter
            .u64_counter("auto_closes")
            .with_description("Coordinators terminated by the idle timer")
            .build(),
    );
}

#[cfg(feature = "metrics")]
pub(crate) fn increment_dispatched() {
    if let Some(counter) = TASKS_DISPATCHED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn increment_dispatched() {}

#[cfg(feature = "metrics")]
pub(crate) fn add_inflight(delta: i64) {
    if let Some(counter) = TASKS_INFLIGHT.get() {
        counter.add(delta, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn add_inflight(_delta: i64) {}

#[cfg(feature = "metrics")]
pub(crate) fn increment_failures() {
    if let Some(counter) = TASK_FAILURES.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn increment_failures() {}

#[cfg(feature = "metrics")]
pub(crate) fn record_task_duration(duration_ms: f64) {
    if let Some(histogram) = TASK_DURATION_MS.get() {
        histogram.record(duration_ms, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_task_duration(_duration_ms: f64) {}

#[cfg(feature = "metrics")]
pub(crate) fn increment_auto_closes() {
    if let Some(counter) = AUTO_CLOSES.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn increment_auto_closes() {}
