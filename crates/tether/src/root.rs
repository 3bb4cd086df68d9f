//! Session roots.
//!
//! A root owns one native session and the deferred release queue for every
//! handle created under it. Its lifecycle is
//!
//! ```text
//! Active ──release()/last drop──▶ Finalizing ──(queue drained, self unbound)──▶ Released
//! ```
//!
//! Every native unbind that concerns a root's family happens with the
//! root's queue lock held: queued child releases, child releases that
//! arrive once the root is finalizing, and the root's own unbind. The
//! root's own unbind therefore always follows the unbind of every child
//! that reached the root before it.

use crate::binding::{self, Attach, Binding, Claim};
use crate::queue::{DeferredReleaseQueue, PendingRelease};
use crate::release::{ReleaseCounters, unbind_contained};
use std::sync::Arc;
use tether_core::{
    Error, NativeRef, ReleaseStats, ReleaseTrigger, ResourceKind, Result, SessionConfig, Unbind,
};

pub(crate) struct RootShared {
    binding: Binding,
    unbinder: Arc<dyn Unbind>,
    queue: DeferredReleaseQueue,
    counters: ReleaseCounters,
    config: SessionConfig,
}

impl RootShared {
    fn label(&self) -> &str {
        self.config.label.as_deref().unwrap_or("session")
    }

    /// The root-release protocol: finalize, drain, unbind self.
    fn release_root(&self, trigger: ReleaseTrigger) {
        if self.binding.is_released() {
            return;
        }

        let mut guard = self.queue.lock();
        guard.begin_finalizing();
        let native = match self.binding.claim(trigger) {
            Claim::Claimed(native) => native,
            // Another caller ran the whole protocol while we waited.
            Claim::AlreadyReleased => return,
        };

        let drained = guard.take_all();
        for entry in &drained {
            unbind_contained(
                self.label(),
                entry.kind,
                entry.native,
                entry.unbinder.as_ref(),
                &self.counters,
            );
        }
        self.counters.record_drained(drained.len());

        if !native.is_null() {
            unbind_contained(
                self.label(),
                ResourceKind::Session,
                native,
                self.unbinder.as_ref(),
                &self.counters,
            );
        }
        drop(guard);

        tracing::debug!(
            session = self.label(),
            trigger = %trigger,
            drained = drained.len(),
            bound = !native.is_null(),
            "Session root released"
        );
    }

    fn request_child_release(
        &self,
        kind: ResourceKind,
        native: NativeRef,
        unbinder: &Arc<dyn Unbind>,
        trigger: ReleaseTrigger,
    ) {
        let mut guard = self.queue.lock();
        if guard.is_finalizing() {
            unbind_contained(self.label(), kind, native, unbinder.as_ref(), &self.counters);
            self.counters.record_immediate();
            tracing::trace!(
                session = self.label(),
                kind = %kind,
                trigger = %trigger,
                "Unbound child of finalizing session"
            );
        } else {
            guard.push(PendingRelease {
                kind,
                native,
                unbinder: Arc::clone(unbinder),
            });
            self.counters.record_deferred();
            tracing::trace!(
                session = self.label(),
                kind = %kind,
                trigger = %trigger,
                pending = guard.len(),
                "Deferred child release"
            );
        }
    }

    fn drain_pending(&self) -> usize {
        if !self.queue.has_pending() {
            return 0;
        }

        let mut guard = self.queue.lock();
        if guard.is_finalizing() {
            // Root release drains and clears the queue itself.
            return 0;
        }
        let entries = guard.take_all();
        for entry in &entries {
            unbind_contained(
                self.label(),
                entry.kind,
                entry.native,
                entry.unbinder.as_ref(),
                &self.counters,
            );
        }
        self.counters.record_drained(entries.len());
        drop(guard);

        tracing::debug!(
            session = self.label(),
            count = entries.len(),
            "Drained deferred releases"
        );
        entries.len()
    }

    /// Unbind a session reference that could not be attached.
    fn unbind_orphan(&self, native: NativeRef) {
        let _guard = self.queue.lock();
        unbind_contained(
            self.label(),
            ResourceKind::Session,
            native,
            self.unbinder.as_ref(),
            &self.counters,
        );
    }
}

impl Drop for RootShared {
    fn drop(&mut self) {
        self.release_root(ReleaseTrigger::Finalization);
    }
}

/// The ownership anchor for a family of handles.
///
/// Cloning is cheap and yields another reference to the same session.
/// Child handles keep their root alive, so the root is finalized by drop
/// only after its last clone and its last child are gone; an explicit
/// [`release`](Self::release) may happen earlier, after which remaining
/// children are unbound as soon as they are released.
#[derive(Clone)]
pub struct SessionRoot {
    shared: Arc<RootShared>,
}

impl SessionRoot {
    /// Create a root with the default configuration.
    pub fn new(unbinder: Arc<dyn Unbind>) -> Self {
        Self::with_config(unbinder, SessionConfig::default())
    }

    /// Create a root with the given configuration.
    pub fn with_config(unbinder: Arc<dyn Unbind>, config: SessionConfig) -> Self {
        let shared = RootShared {
            binding: Binding::new(),
            unbinder,
            queue: DeferredReleaseQueue::with_capacity(config.queue_capacity),
            counters: ReleaseCounters::default(),
            config,
        };
        tracing::trace!(session = shared.label(), "Session root created");
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Attach the session's native reference.
    ///
    /// The factory is not called if the root is already bound or released.
    pub fn bind<F>(&self, factory: F) -> Result<()>
    where
        F: FnOnce() -> Result<NativeRef>,
    {
        let shared = &self.shared;
        shared.binding.check_bindable(ResourceKind::Session)?;

        let native = factory()?;
        if native.is_null() {
            return Err(binding::null_reference(ResourceKind::Session));
        }

        match shared.binding.attach(native) {
            Attach::Bound => Ok(()),
            Attach::Occupied(orphan) => {
                shared.unbind_orphan(orphan);
                Err(Error::AlreadyBound {
                    kind: ResourceKind::Session,
                })
            }
            Attach::Orphaned(orphan) => {
                shared.unbind_orphan(orphan);
                Err(self.released_error())
            }
            Attach::Surrendered => Err(self.released_error()),
        }
    }

    /// The session's native reference, for a native call.
    pub fn native(&self) -> Result<NativeRef> {
        self.shared.binding.get(ResourceKind::Session)
    }

    /// Release the session (program-directed disposal). Idempotent.
    ///
    /// Drains the deferred queue, then unbinds the session itself. Never
    /// fails; unbind errors are logged and counted.
    pub fn release(&self) {
        self.shared.release_root(ReleaseTrigger::Disposal);
    }

    /// Unbind every deferred child release now.
    ///
    /// Returns the number of entries drained. Does nothing once the root is
    /// finalizing. Call this only from a thread allowed to make native calls
    /// on this session.
    pub fn drain_pending(&self) -> usize {
        self.shared.drain_pending()
    }

    pub fn is_released(&self) -> bool {
        self.shared.binding.is_released()
    }

    /// Whether the root has stopped accepting program-directed work.
    pub fn is_finalizing(&self) -> bool {
        self.shared.queue.is_finalizing()
    }

    pub fn kind(&self) -> ResourceKind {
        ResourceKind::Session
    }

    pub fn is_read_only(&self) -> bool {
        self.shared.config.read_only
    }

    pub fn label(&self) -> &str {
        self.shared.label()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Number of deferred releases waiting. May be stale.
    pub fn pending_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Snapshot of release activity for this session.
    pub fn stats(&self) -> ReleaseStats {
        self.shared.counters.snapshot(self.shared.queue.len())
    }

    /// Whether two roots are the same session.
    pub fn ptr_eq(&self, other: &SessionRoot) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn request_child_release(
        &self,
        kind: ResourceKind,
        native: NativeRef,
        unbinder: &Arc<dyn Unbind>,
        trigger: ReleaseTrigger,
    ) {
        self.shared
            .request_child_release(kind, native, unbinder, trigger);
    }

    pub(crate) fn drain_on_create(&self) {
        if self.shared.config.drain_on_create {
            self.shared.drain_pending();
        }
    }

    fn released_error(&self) -> Error {
        binding::use_after_release(ResourceKind::Session, self.shared.binding.released_by())
    }
}

impl std::fmt::Debug for SessionRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRoot")
            .field("label", &self.label())
            .field("released", &self.is_released())
            .field("queue", &self.shared.queue)
            .finish()
    }
}
