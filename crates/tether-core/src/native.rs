//! Native resource references and the unbind seam.
//!
//! The engine hands out opaque, pointer-sized identifiers. Tether never
//! interprets them; it only stores them, hands them back for native calls
//! and passes each one to exactly one [`Unbind`] call.

use std::fmt;

/// Opaque identifier for a resource owned by the native engine.
///
/// Zero is the sentinel meaning "no resource": a handle that was never
/// bound, or one whose release has been claimed, carries [`NativeRef::NULL`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NativeRef(usize);

impl NativeRef {
    /// The "no resource" sentinel.
    pub const NULL: NativeRef = NativeRef(0);

    /// Wrap a raw identifier returned by the engine.
    #[must_use]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Wrap an FFI pointer. A null pointer becomes [`NativeRef::NULL`].
    #[must_use]
    pub fn from_ptr<T>(ptr: *mut T) -> Self {
        Self(ptr as usize)
    }

    /// Recover the FFI pointer this reference was created from.
    #[must_use]
    pub fn as_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// The raw identifier.
    #[must_use]
    pub const fn raw(self) -> usize {
        self.0
    }

    /// Whether this is the sentinel.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for NativeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("NativeRef(NULL)")
        } else {
            write!(f, "NativeRef({:#x})", self.0)
        }
    }
}

impl fmt::Display for NativeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The closed set of native resource kinds.
///
/// Every kind shares the same root/queue machinery; only the unbind call
/// differs, and that is supplied separately through [`Unbind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// A compiled query.
    Query,
    /// A table accessor.
    Table,
    /// A list/collection accessor.
    List,
    /// A materialized or lazy result set.
    Results,
    /// A schema description.
    Schema,
    /// A session. Always the kind of a root.
    Session,
}

impl ResourceKind {
    /// Lowercase name used in logs and serialized stats.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Query => "query",
            ResourceKind::Table => "table",
            ResourceKind::List => "list",
            ResourceKind::Results => "results",
            ResourceKind::Schema => "schema",
            ResourceKind::Session => "session",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reported by a native call.
///
/// Returned by [`Unbind`] implementations, where release paths log it and
/// move on, and by engine bindings for ordinary calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    /// Engine result code, when the engine reports one.
    pub code: Option<i32>,
    pub message: String,
}

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: i32, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for NativeError {}

/// The one native call that permanently frees a resource.
///
/// Implementations may be invoked from any thread, including the thread
/// dropping the last reference to an unrelated part of the program, so
/// they must not touch anything beyond the engine and the reference given.
/// They run while the owning root's queue lock is held and must not drop
/// or release handles of the same root.
pub trait Unbind: Send + Sync {
    fn unbind_native(&self, native: NativeRef) -> Result<(), NativeError>;
}

impl<F> Unbind for F
where
    F: Fn(NativeRef) -> Result<(), NativeError> + Send + Sync,
{
    fn unbind_native(&self, native: NativeRef) -> Result<(), NativeError> {
        self(native)
    }
}
