//! A recording engine for tests.
//!
//! [`RecordingEngine`] hands out fresh references and records every unbind
//! in call order, so tests can assert exactly-once and ordering properties
//! without a real native engine. Unbinds of chosen references can be made
//! to fail or to panic.

use crate::handle::{Handle, Owner};
use crate::root::SessionRoot;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tether_core::{NativeError, NativeRef, ResourceKind, SessionConfig, Unbind};

/// One observed unbind call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnbindRecord {
    pub kind: ResourceKind,
    pub native: NativeRef,
}

#[derive(Debug, Default)]
pub struct RecordingEngine {
    next: AtomicUsize,
    records: Mutex<Vec<UnbindRecord>>,
    failing: Mutex<HashSet<NativeRef>>,
    panicking: Mutex<HashSet<NativeRef>>,
}

impl RecordingEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next: AtomicUsize::new(0x1000),
            ..Default::default()
        })
    }

    /// A fresh, never-before-seen reference.
    pub fn allocate(&self) -> NativeRef {
        NativeRef::new(self.next.fetch_add(0x10, Ordering::Relaxed))
    }

    /// The unbinder for resources of `kind`.
    pub fn unbinder(self: &Arc<Self>, kind: ResourceKind) -> Arc<dyn Unbind> {
        Arc::new(KindUnbinder {
            engine: Arc::clone(self),
            kind,
        })
    }

    /// A root bound to a fresh reference.
    pub fn bound_root(self: &Arc<Self>) -> SessionRoot {
        self.bound_root_with(SessionConfig::default())
    }

    pub fn bound_root_with(self: &Arc<Self>, config: SessionConfig) -> SessionRoot {
        let root = SessionRoot::with_config(self.unbinder(ResourceKind::Session), config);
        let native = self.allocate();
        root.bind(|| Ok(native))
            .expect("binding a fresh root cannot fail");
        root
    }

    /// A child of `parent` bound to a fresh reference.
    pub fn bound_child(self: &Arc<Self>, parent: &impl Owner, kind: ResourceKind) -> Handle {
        let handle = Handle::new(parent, kind, self.unbinder(kind));
        let native = self.allocate();
        handle
            .bind(|| Ok(native))
            .expect("binding a fresh child cannot fail");
        handle
    }

    /// Make every unbind of `native` return an error.
    pub fn fail_on(&self, native: NativeRef) {
        lock(&self.failing).insert(native);
    }

    /// Make every unbind of `native` panic.
    pub fn panic_on(&self, native: NativeRef) {
        lock(&self.panicking).insert(native);
    }

    /// Every unbind so far, in call order (including failed ones).
    pub fn records(&self) -> Vec<UnbindRecord> {
        lock(&self.records).clone()
    }

    pub fn unbind_count(&self, native: NativeRef) -> usize {
        lock(&self.records)
            .iter()
            .filter(|r| r.native == native)
            .count()
    }

    /// Call-order position of the first unbind of `native`.
    pub fn position(&self, native: NativeRef) -> Option<usize> {
        lock(&self.records).iter().position(|r| r.native == native)
    }

    fn unbind(&self, kind: ResourceKind, native: NativeRef) -> Result<(), NativeError> {
        lock(&self.records).push(UnbindRecord { kind, native });
        if lock(&self.panicking).contains(&native) {
            panic!("injected unbind panic for {}", native);
        }
        if lock(&self.failing).contains(&native) {
            return Err(NativeError::new(format!("injected failure for {}", native)));
        }
        Ok(())
    }
}

struct KindUnbinder {
    engine: Arc<RecordingEngine>,
    kind: ResourceKind,
}

impl Unbind for KindUnbinder {
    fn unbind_native(&self, native: NativeRef) -> Result<(), NativeError> {
        self.engine.unbind(self.kind, native)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
