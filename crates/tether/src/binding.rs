//! The native reference slot shared by roots and child handles.
//!
//! A slot moves through `unbound -> bound -> released`, with `unbound ->
//! released` allowed for handles abandoned between construction and bind.
//! Release is claimed by flipping the release flag and then swapping the
//! reference out for the sentinel; bind stores the reference and then
//! re-checks the flag. Both sides use `SeqCst` so that at least one of them
//! observes the other, and the swap on the reference hands the value to
//! exactly one of them.

use std::sync::atomic::{AtomicUsize, Ordering};
use tether_core::{
    BindError, Error, NativeRef, ReleaseFlag, ReleaseTrigger, ResourceKind, UseAfterRelease,
};

/// Result of attaching a freshly created reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Attach {
    Bound,
    /// Another bind got there first; the new reference is ours to release.
    Occupied(NativeRef),
    /// A release was claimed concurrently and the reference came back to us.
    Orphaned(NativeRef),
    /// A release was claimed concurrently and took the reference with it.
    Surrendered,
}

/// Outcome of claiming a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Claim {
    /// This caller owns the release. The reference may be the sentinel.
    Claimed(NativeRef),
    AlreadyReleased,
}

#[derive(Debug, Default)]
pub(crate) struct Binding {
    native: AtomicUsize,
    released: ReleaseFlag,
}

impl Binding {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Check that a bind may proceed, before any native work is done.
    pub(crate) fn check_bindable(&self, kind: ResourceKind) -> Result<(), Error> {
        if let Some(trigger) = self.released.get() {
            return Err(use_after_release(kind, Some(trigger)));
        }
        if self.native.load(Ordering::SeqCst) != 0 {
            return Err(Error::AlreadyBound { kind });
        }
        Ok(())
    }

    pub(crate) fn attach(&self, native: NativeRef) -> Attach {
        debug_assert!(!native.is_null());
        if self
            .native
            .compare_exchange(0, native.raw(), Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Attach::Occupied(native);
        }
        if self.released.is_set() {
            let back = NativeRef::new(self.native.swap(0, Ordering::SeqCst));
            return if back.is_null() {
                Attach::Surrendered
            } else {
                Attach::Orphaned(back)
            };
        }
        Attach::Bound
    }

    pub(crate) fn claim(&self, trigger: ReleaseTrigger) -> Claim {
        if !self.released.claim(trigger) {
            return Claim::AlreadyReleased;
        }
        Claim::Claimed(NativeRef::new(self.native.swap(0, Ordering::SeqCst)))
    }

    /// The bound reference, for a native call.
    pub(crate) fn get(&self, kind: ResourceKind) -> Result<NativeRef, Error> {
        if let Some(trigger) = self.released.get() {
            return Err(use_after_release(kind, Some(trigger)));
        }
        let native = NativeRef::new(self.native.load(Ordering::SeqCst));
        if native.is_null() {
            // A release may have slipped in after the flag check.
            if let Some(trigger) = self.released.get() {
                return Err(use_after_release(kind, Some(trigger)));
            }
            return Err(Error::NotBound { kind });
        }
        Ok(native)
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released.is_set()
    }

    pub(crate) fn released_by(&self) -> Option<ReleaseTrigger> {
        self.released.get()
    }
}

pub(crate) fn null_reference(kind: ResourceKind) -> Error {
    Error::Bind(BindError::new(kind, "factory returned the null reference"))
}

pub(crate) fn use_after_release(kind: ResourceKind, released_by: Option<ReleaseTrigger>) -> Error {
    Error::UseAfterRelease(UseAfterRelease { kind, released_by })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_then_claim() {
        let binding = Binding::new();
        assert!(matches!(
            binding.get(ResourceKind::Table),
            Err(Error::NotBound { .. })
        ));
        assert_eq!(binding.attach(NativeRef::new(9)), Attach::Bound);
        assert_eq!(binding.get(ResourceKind::Table).unwrap(), NativeRef::new(9));
        assert_eq!(
            binding.claim(ReleaseTrigger::Disposal),
            Claim::Claimed(NativeRef::new(9))
        );
        assert_eq!(
            binding.claim(ReleaseTrigger::Finalization),
            Claim::AlreadyReleased
        );
        assert_eq!(binding.released_by(), Some(ReleaseTrigger::Disposal));
    }

    #[test]
    fn test_claim_before_bind_yields_sentinel() {
        let binding = Binding::new();
        assert_eq!(
            binding.claim(ReleaseTrigger::Finalization),
            Claim::Claimed(NativeRef::NULL)
        );
        let err = binding.check_bindable(ResourceKind::Query).unwrap_err();
        assert!(err.is_use_after_release());
    }

    #[test]
    fn test_second_attach_is_occupied() {
        let binding = Binding::new();
        assert_eq!(binding.attach(NativeRef::new(1)), Attach::Bound);
        assert!(matches!(
            binding.check_bindable(ResourceKind::List),
            Err(Error::AlreadyBound { .. })
        ));
        assert_eq!(
            binding.attach(NativeRef::new(2)),
            Attach::Occupied(NativeRef::new(2))
        );
        assert_eq!(binding.get(ResourceKind::List).unwrap(), NativeRef::new(1));
    }

    #[test]
    fn test_attach_after_claim_is_orphaned() {
        let binding = Binding::new();
        binding.claim(ReleaseTrigger::Disposal);
        assert_eq!(
            binding.attach(NativeRef::new(4)),
            Attach::Orphaned(NativeRef::new(4))
        );
        assert!(binding.get(ResourceKind::Schema).unwrap_err().is_use_after_release());
    }
}
