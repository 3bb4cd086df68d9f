//! Child resource handles.

use crate::binding::{self, Attach, Binding, Claim};
use crate::root::SessionRoot;
use std::sync::Arc;
use tether_core::{Error, NativeRef, ReleaseTrigger, ResourceKind, Result, Unbind};

/// Anything a child handle can be created under.
///
/// Implemented by [`SessionRoot`] (yields itself) and [`Handle`] (yields
/// its own root), so ownership never chains deeper than root → child.
pub trait Owner {
    /// The ultimate session root.
    fn session_root(&self) -> &SessionRoot;
}

impl Owner for SessionRoot {
    fn session_root(&self) -> &SessionRoot {
        self
    }
}

impl Owner for Handle {
    fn session_root(&self) -> &SessionRoot {
        &self.root
    }
}

/// A non-root resource handle: owns one native reference of some kind and
/// releases it through its session root.
///
/// [`release`](Self::release) is program-directed disposal and may be
/// called any number of times. Dropping the handle is the finalization
/// trigger and may happen on any thread. Either way the reference is
/// handed to the root, which unbinds it on its next drain or, once the
/// root is finalizing, immediately.
pub struct Handle {
    kind: ResourceKind,
    binding: Binding,
    unbinder: Arc<dyn Unbind>,
    root: SessionRoot,
    read_only: bool,
}

impl Handle {
    /// Create an unbound handle under `parent`'s session root.
    ///
    /// Inherits the root's read-only policy. Gives the root a chance to
    /// drain its deferred queue.
    pub fn new(parent: &impl Owner, kind: ResourceKind, unbinder: Arc<dyn Unbind>) -> Self {
        let read_only = parent.session_root().is_read_only();
        Self::with_policy(parent, kind, unbinder, read_only)
    }

    /// Create an unbound handle with an explicit read-only policy.
    pub fn with_policy(
        parent: &impl Owner,
        kind: ResourceKind,
        unbinder: Arc<dyn Unbind>,
        read_only: bool,
    ) -> Self {
        debug_assert_ne!(kind, ResourceKind::Session, "sessions are always roots");
        let root = parent.session_root().clone();
        root.drain_on_create();
        Self {
            kind,
            binding: Binding::new(),
            unbinder,
            root,
            read_only,
        }
    }

    /// Attach the native reference produced by `factory`.
    ///
    /// The factory is not called if the handle is already bound, already
    /// released, or its session is closed. A reference produced by the
    /// factory that loses a race with a concurrent release is released
    /// through the root like any other.
    pub fn bind<F>(&self, factory: F) -> Result<()>
    where
        F: FnOnce() -> Result<NativeRef>,
    {
        self.binding.check_bindable(self.kind)?;
        if self.root.is_finalizing() {
            return Err(Error::SessionClosed { kind: self.kind });
        }

        let native = factory()?;
        if native.is_null() {
            return Err(binding::null_reference(self.kind));
        }

        match self.binding.attach(native) {
            Attach::Bound => Ok(()),
            Attach::Occupied(orphan) => {
                self.hand_to_root(orphan, ReleaseTrigger::Disposal);
                Err(Error::AlreadyBound { kind: self.kind })
            }
            Attach::Orphaned(orphan) => {
                self.hand_to_root(orphan, ReleaseTrigger::Disposal);
                Err(self.released_error())
            }
            Attach::Surrendered => Err(self.released_error()),
        }
    }

    /// The native reference, for a native call.
    ///
    /// Fails with `UseAfterRelease` once released and with `SessionClosed`
    /// once the root has begun finalizing.
    pub fn native(&self) -> Result<NativeRef> {
        let native = self.binding.get(self.kind)?;
        if self.root.is_finalizing() {
            return Err(Error::SessionClosed { kind: self.kind });
        }
        Ok(native)
    }

    /// Release the handle (program-directed disposal). Idempotent.
    pub fn release(&self) {
        self.release_with(ReleaseTrigger::Disposal);
    }

    fn release_with(&self, trigger: ReleaseTrigger) {
        match self.binding.claim(trigger) {
            Claim::AlreadyReleased => {}
            // Abandoned between construction and bind: nothing to unbind.
            Claim::Claimed(native) if native.is_null() => {
                tracing::trace!(kind = %self.kind, trigger = %trigger, "Released unbound handle");
            }
            Claim::Claimed(native) => self.hand_to_root(native, trigger),
        }
    }

    fn hand_to_root(&self, native: NativeRef, trigger: ReleaseTrigger) {
        self.root
            .request_child_release(self.kind, native, &self.unbinder, trigger);
    }

    fn released_error(&self) -> Error {
        binding::use_after_release(self.kind, self.binding.released_by())
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// The session root this handle belongs to.
    pub fn root(&self) -> &SessionRoot {
        &self.root
    }

    pub fn is_released(&self) -> bool {
        self.binding.is_released()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.release_with(ReleaseTrigger::Finalization);
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("kind", &self.kind)
            .field("session", &self.root.label())
            .field("released", &self.is_released())
            .field("read_only", &self.read_only)
            .finish()
    }
}
