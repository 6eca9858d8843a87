use core::fmt;
use portable_atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier assigned to every dispatched task.
///
/// Ids are unique among outstanding tasks and strictly increasing for a given
/// [`IdSource`], so they double as a rough dispatch order in logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct TaskId(u64);

impl TaskId {
    /// Wraps a raw id.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw integer value.
    pub const fn to_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TaskId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// A source of unique, monotonically increasing [`TaskId`]s.
///
/// Implementations must be safe to call from many threads at once and must
/// never hand out the same id twice.
pub trait IdSource: Send + Sync {
    /// Returns the next id.
    fn next_id(&self) -> TaskId;
}

/// A lock-free counter starting at 1.
///
/// This is the default source: it is cheap, dense and cannot collide.
#[derive(Debug)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl SequentialIds {
    pub const fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates a counter whose first id is `first`.
    pub const fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdSource for SequentialIds {
    fn next_id(&self) -> TaskId {
        TaskId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Ids derived from wall-clock milliseconds since the Unix epoch.
///
/// Two dispatches in the same millisecond (or a clock that steps backwards)
/// would collide on a raw timestamp, so every id is bumped to at least one
/// past the previously issued id. The result stays close to the wall clock
/// under light load and never repeats.
///
/// The bump saturates: once an id of `u64::MAX` has been issued every later
/// id is `u64::MAX` too, and the registry rejects the repeat as
/// [`Error::DuplicateId`](crate::Error::DuplicateId) instead of wrapping.
#[derive(Debug, Default)]
pub struct ClockIds {
    last: AtomicU64,
}

impl ClockIds {
    pub const fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    fn now_millis() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64)
    }

    fn next_after(&self, now: u64) -> u64 {
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last.saturating_add(1));
            match self.last.compare_exchange_weak(
                last,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }
}

impl IdSource for ClockIds {
    fn next_id(&self) -> TaskId {
        TaskId(self.next_after(Self::now_millis()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashSet, sync::Arc, thread::scope};

    #[test]
    fn sequential_ids_start_at_one_and_increase() {
        let ids = SequentialIds::new();
        assert_eq!(ids.next_id(), TaskId::from_raw(1));
        assert_eq!(ids.next_id(), TaskId::from_raw(2));
        assert_eq!(ids.next_id(), TaskId::from_raw(3));
    }

    #[test]
    fn clock_ids_never_repeat_within_a_millisecond() {
        let ids = ClockIds::new();
        let a = ids.next_after(500);
        let b = ids.next_after(500);
        let c = ids.next_after(499);
        assert_eq!(a, 500);
        assert_eq!(b, 501);
        assert_eq!(c, 502);
        assert_eq!(ids.next_after(1_000), 1_000);
    }

    #[test]
    fn clock_ids_saturate_instead_of_wrapping() {
        let ids = ClockIds {
            last: AtomicU64::new(u64::MAX - 1),
        };
        assert_eq!(ids.next_after(5), u64::MAX);
        assert_eq!(ids.next_after(5), u64::MAX);
        assert_eq!(ids.next_after(u64::MAX), u64::MAX);
    }

    #[test]
    fn clock_ids_track_the_wall_clock() {
        let before = ClockIds::now_millis();
        let id = ClockIds::new().next_id().to_raw();
        assert!(id >= before);
    }

    fn run_unique_across_threads(source: Arc<dyn IdSource>) {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 1024;

        let seen = parking_lot::Mutex::new(HashSet::with_capacity(THREADS * PER_THREAD));
        scope(|s| {
            for _ in 0..THREADS {
                let source = Arc::clone(&source);
                let seen = &seen;
                s.spawn(move || {
                    let local: Vec<_> = (0..PER_THREAD).map(|_| source.next_id()).collect();
                    let mut seen = seen.lock();
                    for id in local {
                        assert!(seen.insert(id), "duplicate id {id}");
                    }
                });
            }
        });
        assert_eq!(seen.lock().len(), THREADS * PER_THREAD);
    }

    #[test]
    fn sequential_ids_unique_across_threads() {
        run_unique_across_threads(Arc::new(SequentialIds::new()));
    }

    #[test]
    fn clock_ids_unique_across_threads() {
        run_unique_across_threads(Arc::new(ClockIds::new()));
    }

    #[test]
    fn task_id_displays_raw_value() {
        assert_eq!(TaskId::from(42).to_string(), "42");
    }
}
