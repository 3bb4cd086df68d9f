//! Release triggers and per-session release statistics.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Which call path asked for a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseTrigger {
    /// Explicit, program-directed disposal.
    Disposal,
    /// The owning value became unreachable and was dropped, possibly on
    /// a thread unrelated to the one that used it.
    Finalization,
}

impl ReleaseTrigger {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ReleaseTrigger::Disposal => "disposal",
            ReleaseTrigger::Finalization => "finalization",
        }
    }

    pub(crate) const fn to_tag(self) -> u8 {
        match self {
            ReleaseTrigger::Disposal => 1,
            ReleaseTrigger::Finalization => 2,
        }
    }

    pub(crate) const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(ReleaseTrigger::Disposal),
            2 => Some(ReleaseTrigger::Finalization),
            _ => None,
        }
    }
}

impl fmt::Display for ReleaseTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compact, lock-free storage for "was this released, and by whom".
///
/// Zero means not released. Claiming is a single compare-exchange, so
/// exactly one caller observes the transition. All accesses are `SeqCst`
/// because callers pair the flag with a second atomic.
#[derive(Debug, Default)]
pub struct ReleaseFlag(AtomicU8);

impl ReleaseFlag {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    /// Claim the release. Returns `true` for exactly one caller.
    pub fn claim(&self, trigger: ReleaseTrigger) -> bool {
        self.0
            .compare_exchange(0, trigger.to_tag(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Whether a release has been claimed.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.get().is_some()
    }

    /// The trigger that claimed the release, if any.
    #[must_use]
    pub fn get(&self) -> Option<ReleaseTrigger> {
        ReleaseTrigger::from_tag(self.0.load(Ordering::SeqCst))
    }
}

/// Snapshot of a session root's release activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseStats {
    /// Native unbind calls that completed without error.
    pub unbound: u64,
    /// Child releases that were queued instead of unbound.
    pub deferred: u64,
    /// Queued entries unbound by a drain.
    pub drained: u64,
    /// Child releases unbound on the spot because the root was finalizing.
    pub immediate: u64,
    /// Unbind calls that returned an error or panicked.
    pub failures: u64,
    /// Entries waiting in the deferred queue when the snapshot was taken.
    pub pending: u64,
}

impl ReleaseStats {
    /// Total unbind attempts, successful or not.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.unbound + self.failures
    }
}
