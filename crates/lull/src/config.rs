//! Runtime configuration for the dispatch coordinator.
//!
//! [`AutoCloseConfig`] is the only part that changes after construction: the
//! coordinator's owner may toggle it at any time and every change reschedules
//! the idle timer. Everything else is fixed when the coordinator is built.

use crate::{
    error::{Error, Result},
    id::{ClockIds, IdSource, SequentialIds},
};
use core::time::Duration;

/// Idle period after which an untouched worker closes itself: five minutes.
pub const DEFAULT_IDLE: Duration = Duration::from_secs(300);

/// How long shutdown waits for interrupted units to exit.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Capacity of the task event broadcast channel.
pub const DEFAULT_EVENTS_CAPACITY: usize = 64;

/// Controls whether, and after how long, an idle coordinator terminates.
///
/// A zero `idle` duration never schedules a fire, which makes it equivalent
/// to `enabled: false`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AutoCloseConfig {
    pub enabled: bool,
    #[cfg_attr(feature = "serde", serde(with = "duration_millis"))]
    pub idle: Duration,
}

impl AutoCloseConfig {
    pub const fn new(enabled: bool, idle: Duration) -> Self {
        Self { enabled, idle }
    }

    pub const fn disabled() -> Self {
        Self::new(false, DEFAULT_IDLE)
    }

    /// Returns the delay to schedule, or `None` if no fire should be pending.
    pub fn schedule_after(&self) -> Option<Duration> {
        (self.enabled && !self.idle.is_zero()).then_some(self.idle)
    }
}

impl Default for AutoCloseConfig {
    fn default() -> Self {
        Self::new(true, DEFAULT_IDLE)
    }
}

/// Concurrency policy of the worker pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PoolPolicy {
    /// Every submitted unit starts immediately.
    #[default]
    Unbounded,
    /// At most `n` units execute at once; the rest wait for a permit.
    Bounded(usize),
}

/// Which [`IdSource`] the coordinator allocates task ids from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum IdStrategy {
    #[default]
    Sequential,
    Clock,
}

impl IdStrategy {
    pub(crate) fn build(self) -> Box<dyn IdSource> {
        match self {
            Self::Sequential => Box::new(SequentialIds::new()),
            Self::Clock => Box::new(ClockIds::new()),
        }
    }
}

/// Construction-time settings for a [`Coordinator`].
///
/// [`Coordinator`]: crate::Coordinator
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CoordinatorConfig {
    pub auto_close: AutoCloseConfig,
    pub pool: PoolPolicy,
    #[cfg_attr(feature = "serde", serde(with = "duration_millis"))]
    pub drain_timeout: Duration,
    pub events_capacity: usize,
    pub ids: IdStrategy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            auto_close: AutoCloseConfig::default(),
            pool: PoolPolicy::default(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            events_capacity: DEFAULT_EVENTS_CAPACITY,
            ids: IdStrategy::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Rejects settings the coordinator cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if:
    /// - the pool is bounded to zero units, or
    /// - the event channel has zero capacity.
    pub fn validate(&self) -> Result<()> {
        if self.pool == PoolPolicy::Bounded(0) {
            return Err(Error::InvalidConfig {
                reason: "a bounded pool needs at least one slot".to_string(),
            });
        }
        if self.events_capacity == 0 {
            return Err(Error::InvalidConfig {
                reason: "events_capacity must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn with_auto_close(mut self, auto_close: AutoCloseConfig) -> Self {
        self.auto_close = auto_close;
        self
    }

    pub fn with_pool(mut self, pool: PoolPolicy) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn with_events_capacity(mut self, events_capacity: usize) -> Self {
        self.events_capacity = events_capacity;
        self
    }

    pub fn with_ids(mut self, ids: IdStrategy) -> Self {
        self.ids = ids;
        self
    }
}

#[cfg(feature = "serde")]
mod duration_millis {
    use core::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_auto_close_is_five_minutes() {
        let config = AutoCloseConfig::default();
        assert!(config.enabled);
        assert_eq!(config.idle, Duration::from_secs(300));
        assert_eq!(config.schedule_after(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn disabled_or_zero_never_schedules() {
        assert_eq!(AutoCloseConfig::disabled().schedule_after(), None);
        assert_eq!(
            AutoCloseConfig::new(true, Duration::ZERO).schedule_after(),
            None
        );
    }

    #[test]
    fn validate_rejects_empty_bounded_pool() {
        let config = CoordinatorConfig::default().with_pool(PoolPolicy::Bounded(0));
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig { .. })
        ));
        assert!(
            CoordinatorConfig::default()
                .with_pool(PoolPolicy::Bounded(4))
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn validate_rejects_zero_event_capacity() {
        let config = CoordinatorConfig {
            events_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserializes_partial_config_over_defaults() {
        let config: CoordinatorConfig = serde_json::from_str(
            r#"{"auto_close":{"enabled":false,"idle":1500},"pool":{"bounded":4}}"#,
        )
        .unwrap();

        assert_eq!(
            config.auto_close,
            AutoCloseConfig::new(false, Duration::from_millis(1500))
        );
        assert_eq!(config.pool, PoolPolicy::Bounded(4));
        assert_eq!(config.drain_timeout, DEFAULT_DRAIN_TIMEOUT);
        assert_eq!(config.ids, IdStrategy::Sequential);
    }
}
