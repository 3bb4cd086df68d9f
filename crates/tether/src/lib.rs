//! Session-rooted native resource handles.
//!
//! Tether binds application-side wrappers to resources owned by a native
//! engine that is reachable only through a non-reentrant FFI. The engine
//! forbids concurrent calls on resources of one session, while the wrappers
//! may be released explicitly or dropped from arbitrary threads in any
//! order. Tether guarantees every native resource is unbound exactly once,
//! never concurrently with other unbinds of the same session, and a
//! session only after every child that reached it first.
//!
//! # Ownership
//!
//! ```text
//!                ┌──────────────────────────────┐
//!                │ SessionRoot                  │
//!                │ ├── native session ref       │
//!                │ └── queue lock               │
//!                │     ├── DeferredReleaseQueue │
//!                │     └── finalizing flag      │
//!                └──────────────────────────────┘
//!                   ▲          ▲            ▲
//!          Handle (query) Handle (table) Handle (results)
//! ```
//!
//! The topology is a star: a handle created under another handle is owned
//! by that handle's root.
//!
//! # Release
//!
//! Releasing a child, by [`Handle::release`] or by dropping it, hands its
//! reference to the root. While the root is active the reference is
//! queued and unbound by the next drain: when another child is created,
//! when [`SessionRoot::drain_pending`] is called, or when the root itself
//! is released. Once the root is finalizing, children are unbound on the
//! spot. Unbind failures and panics are logged and counted, never
//! propagated.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tether::{Handle, SessionRoot, ResourceKind};
//!
//! let root = SessionRoot::new(Arc::new(close_session));
//! root.bind(|| engine.open_session())?;
//!
//! let query = Handle::new(&root, ResourceKind::Query, Arc::new(free_query));
//! query.bind(|| engine.compile(root.native()?, "age > 30"))?;
//! engine.run(query.native()?)?;
//!
//! drop(query);   // queued
//! root.release(); // query unbound, then the session
//! ```

mod binding;
pub mod handle;
mod queue;
mod release;
pub mod root;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use handle::{Handle, Owner};
pub use root::SessionRoot;
pub use tether_core::{
    BindError, Error, NativeError, NativeRef, ReleaseStats, ReleaseTrigger, ResourceKind, Result,
    SessionConfig, Unbind, UseAfterRelease,
};

use std::sync::Arc;

/// Operations shared by roots and child handles.
pub trait Resource {
    fn kind(&self) -> ResourceKind;

    /// Attach the native reference produced by `factory`.
    fn bind<F>(&self, factory: F) -> Result<()>
    where
        F: FnOnce() -> Result<NativeRef>;

    /// The native reference, for a native call.
    fn native(&self) -> Result<NativeRef>;

    /// Program-directed release. Idempotent and infallible.
    fn release(&self);

    fn is_released(&self) -> bool;

    fn is_read_only(&self) -> bool;
}

impl Resource for SessionRoot {
    fn kind(&self) -> ResourceKind {
        SessionRoot::kind(self)
    }

    fn bind<F>(&self, factory: F) -> Result<()>
    where
        F: FnOnce() -> Result<NativeRef>,
    {
        SessionRoot::bind(self, factory)
    }

    fn native(&self) -> Result<NativeRef> {
        SessionRoot::native(self)
    }

    fn release(&self) {
        SessionRoot::release(self);
    }

    fn is_released(&self) -> bool {
        SessionRoot::is_released(self)
    }

    fn is_read_only(&self) -> bool {
        SessionRoot::is_read_only(self)
    }
}

impl Resource for Handle {
    fn kind(&self) -> ResourceKind {
        Handle::kind(self)
    }

    fn bind<F>(&self, factory: F) -> Result<()>
    where
        F: FnOnce() -> Result<NativeRef>,
    {
        Handle::bind(self, factory)
    }

    fn native(&self) -> Result<NativeRef> {
        Handle::native(self)
    }

    fn release(&self) {
        Handle::release(self);
    }

    fn is_released(&self) -> bool {
        Handle::is_released(self)
    }

    fn is_read_only(&self) -> bool {
        Handle::is_read_only(self)
    }
}

/// Create an unbound session root.
pub fn create_root(unbinder: Arc<dyn Unbind>) -> SessionRoot {
    SessionRoot::new(unbinder)
}

/// Create an unbound child under `parent`'s ultimate root.
pub fn create_child(parent: &impl Owner, kind: ResourceKind, unbinder: Arc<dyn Unbind>) -> Handle {
    Handle::new(parent, kind, unbinder)
}

/// Attach a native reference to a root or child.
pub fn bind_handle<R, F>(handle: &R, factory: F) -> Result<()>
where
    R: Resource,
    F: FnOnce() -> Result<NativeRef>,
{
    handle.bind(factory)
}

/// The native reference of a root or child; fails fast once released.
pub fn use_handle<R: Resource>(handle: &R) -> Result<NativeRef> {
    handle.native()
}

/// Release a root or child. Safe to call from disposal and drop paths
/// alike, any number of times.
pub fn release_handle<R: Resource>(handle: &R) {
    handle.release();
}
