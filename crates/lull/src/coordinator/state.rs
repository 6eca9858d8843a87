use core::fmt;
use portable_atomic::{AtomicU8, Ordering};

/// Lifecycle of a [`Coordinator`].
///
/// `Created → Active → ShuttingDown → Terminated`. `Active` is entered on
/// [`init`] or implicitly on the first dispatch; `ShuttingDown` is entered
/// exactly once; `Terminated` is absorbing.
///
/// [`Coordinator`]: crate::Coordinator
/// [`init`]: crate::Coordinator::init
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Lifecycle {
    Created = 0,
    Active = 1,
    ShuttingDown = 2,
    Terminated = 3,
}

impl Lifecycle {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Active,
            2 => Self::ShuttingDown,
            _ => Self::Terminated,
        }
    }

    /// Whether new work may still be dispatched.
    pub const fn accepts_work(self) -> bool {
        matches!(self, Self::Created | Self::Active)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Active => "active",
            Self::ShuttingDown => "shutting down",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Atomic cell holding a [`Lifecycle`].
#[derive(Debug)]
pub(crate) struct LifecycleCell(AtomicU8);

impl LifecycleCell {
    pub(crate) const fn new() -> Self {
        Self(AtomicU8::new(Lifecycle::Created as u8))
    }

    pub(crate) fn load(&self) -> Lifecycle {
        Lifecycle::from_u8(self.0.load(Ordering::Acquire))
    }

    /// `Created → Active`. Returns `Ok(true)` if this call made the
    /// transition, `Ok(false)` if already active, and `Err` with the current
    /// state once shutdown has begun.
    pub(crate) fn activate(&self) -> Result<bool, Lifecycle> {
        match self.0.compare_exchange(
            Lifecycle::Created as u8,
            Lifecycle::Active as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(true),
            Err(raw) => match Lifecycle::from_u8(raw) {
                Lifecycle::Active => Ok(false),
                other => Err(other),
            },
        }
    }

    /// Enters `ShuttingDown` from `Created` or `Active`. Only one caller ever
    /// observes `true`.
    pub(crate) fn begin_shutdown(&self) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                Lifecycle::from_u8(raw)
                    .accepts_work()
                    .then_some(Lifecycle::ShuttingDown as u8)
            })
            .is_ok()
    }

    pub(crate) fn finish(&self) {
        self.0.store(Lifecycle::Terminated as u8, Ordering::Release);
    }
}
