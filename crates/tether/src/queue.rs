//! Deferred release queue.
//!
//! Child releases that arrive while their session is still active cannot
//! call into the engine on the spot: the engine is non-reentrant per
//! session and the release may come from a thread that does not own the
//! session. Such releases are parked here and unbound on the next drain.
//!
//! The queue and the root's `finalizing` flag share one mutex. A separate
//! atomic mirrors the entry count so callers can skip the lock when there
//! is nothing to drain; that check may be stale and only ever costs a
//! missed drain opportunity.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tether_core::{NativeRef, ResourceKind, Unbind};

/// A child release waiting for the next drain.
pub(crate) struct PendingRelease {
    pub(crate) kind: ResourceKind,
    pub(crate) native: NativeRef,
    pub(crate) unbinder: Arc<dyn Unbind>,
}

impl std::fmt::Debug for PendingRelease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRelease")
            .field("kind", &self.kind)
            .field("native", &self.native)
            .finish_non_exhaustive()
    }
}

struct QueueState {
    entries: Vec<PendingRelease>,
    finalizing: bool,
}

/// Mutex-guarded list of deferred releases plus the finalizing flag.
pub(crate) struct DeferredReleaseQueue {
    state: Mutex<QueueState>,

    /// Fast check for pending entries (avoids the lock on the hot path)
    pending: AtomicUsize,

    /// Lock-free mirror of `QueueState::finalizing`, written under the lock
    finalizing: AtomicBool,
}

impl DeferredReleaseQueue {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                entries: Vec::with_capacity(capacity),
                finalizing: false,
            }),
            pending: AtomicUsize::new(0),
            finalizing: AtomicBool::new(false),
        }
    }

    /// Acquire the queue lock.
    ///
    /// Unbind calls are made with this guard held, and they are wrapped in
    /// `catch_unwind`, so a poisoned lock can only come from a bug in this
    /// crate; the state is still consistent and is recovered.
    pub(crate) fn lock(&self) -> QueueGuard<'_> {
        QueueGuard {
            state: self.state.lock().unwrap_or_else(PoisonError::into_inner),
            queue: self,
        }
    }

    /// Whether any entries are waiting. Lock-free and possibly stale.
    #[inline]
    pub(crate) fn has_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire) > 0
    }

    /// Number of waiting entries. Lock-free and possibly stale.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Whether the owning root has begun finalizing. Lock-free.
    #[inline]
    pub(crate) fn is_finalizing(&self) -> bool {
        self.finalizing.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for DeferredReleaseQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredReleaseQueue")
            .field("pending", &self.len())
            .field("finalizing", &self.is_finalizing())
            .finish()
    }
}

/// Exclusive access to the queue entries and the finalizing flag.
pub(crate) struct QueueGuard<'a> {
    state: MutexGuard<'a, QueueState>,
    queue: &'a DeferredReleaseQueue,
}

impl QueueGuard<'_> {
    pub(crate) fn is_finalizing(&self) -> bool {
        self.state.finalizing
    }

    /// Flip `finalizing` to true. Returns `false` if it already was.
    pub(crate) fn begin_finalizing(&mut self) -> bool {
        if self.state.finalizing {
            return false;
        }
        self.state.finalizing = true;
        self.queue.finalizing.store(true, Ordering::Release);
        true
    }

    /// Park a release. Only valid while the root is not finalizing.
    pub(crate) fn push(&mut self, entry: PendingRelease) {
        debug_assert!(
            !self.state.finalizing,
            "deferred release queued after finalization began"
        );
        self.state.entries.push(entry);
        self.queue.pending.fetch_add(1, Ordering::Release);
    }

    /// Remove every entry, oldest first.
    pub(crate) fn take_all(&mut self) -> Vec<PendingRelease> {
        let entries = std::mem::take(&mut self.state.entries);
        self.queue.pending.store(0, Ordering::Release);
        entries
    }

    pub(crate) fn len(&self) -> usize {
        self.state.entries.len()
    }
}
