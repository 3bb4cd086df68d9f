//! Contained native unbind calls and release counters.
//!
//! Release can run on a thread that has no way to observe or handle a
//! failure, so nothing raised by an [`Unbind`] implementation, error or
//! panic, ever leaves this module. Failures are logged and counted.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use tether_core::{NativeRef, ReleaseStats, ResourceKind, Unbind};

/// Per-root release counters.
#[derive(Debug, Default)]
pub(crate) struct ReleaseCounters {
    unbound: AtomicU64,
    deferred: AtomicU64,
    drained: AtomicU64,
    immediate: AtomicU64,
    failures: AtomicU64,
}

impl ReleaseCounters {
    pub(crate) fn record_deferred(&self) {
        self.deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_drained(&self, count: usize) {
        self.drained.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_immediate(&self) {
        self.immediate.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, pending: usize) -> ReleaseStats {
        ReleaseStats {
            unbound: self.unbound.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            immediate: self.immediate.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            pending: pending as u64,
        }
    }
}

/// Invoke `unbinder` on `native`, swallowing any error or panic.
///
/// Returns whether the unbind completed cleanly.
pub(crate) fn unbind_contained(
    session: &str,
    kind: ResourceKind,
    native: NativeRef,
    unbinder: &dyn Unbind,
    counters: &ReleaseCounters,
) -> bool {
    debug_assert!(!native.is_null(), "unbind of the null sentinel");

    match panic::catch_unwind(AssertUnwindSafe(|| unbinder.unbind_native(native))) {
        Ok(Ok(())) => {
            counters.unbound.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(session, kind = %kind, native = %native, "Unbound native resource");
            true
        }
        Ok(Err(err)) => {
            counters.failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                session,
                kind = %kind,
                native = %native,
                error = %err,
                "Native unbind failed; resource abandoned"
            );
            false
        }
        Err(payload) => {
            counters.failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                session,
                kind = %kind,
                native = %native,
                panic = panic_message(payload.as_ref()),
                "Native unbind panicked; resource abandoned"
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::NativeError;

    #[test]
    fn test_success_is_counted() {
        let counters = ReleaseCounters::default();
        let ok = |_: NativeRef| Ok::<(), NativeError>(());
        assert!(unbind_contained(
            "test",
            ResourceKind::Table,
            NativeRef::new(1),
            &ok,
            &counters
        ));
        let stats = counters.snapshot(0);
        assert_eq!(stats.unbound, 1);
        assert_eq!(stats.failures, 0);
    }

    #[test]
    fn test_error_is_contained() {
        let counters = ReleaseCounters::default();
        let failing = |_: NativeRef| -> Result<(), NativeError> { Err(NativeError::with_code(5, "busy")) };
        assert!(!unbind_contained(
            "test",
            ResourceKind::Query,
            NativeRef::new(2),
            &failing,
            &counters
        ));
        assert_eq!(counters.snapshot(0).failures, 1);
    }

    #[test]
    fn test_panic_is_contained() {
        let counters = ReleaseCounters::default();
        let panicking = |_: NativeRef| -> Result<(), NativeError> { panic!("engine exploded") };
        assert!(!unbind_contained(
            "test",
            ResourceKind::List,
            NativeRef::new(3),
            &panicking,
            &counters
        ));
        let stats = counters.snapshot(2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.unbound, 0);
        assert_eq!(stats.pending, 2);
    }

    #[test]
    fn test_panic_message_variants() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let other: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
