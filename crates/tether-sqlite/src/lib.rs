//! SQLite binding for Tether.
//!
// FFI bindings require unsafe code - this is expected for engine bindings
#![allow(unsafe_code)]
//!
//! This crate drives libsqlite3 through Tether's session roots: a
//! connection is a [`SessionRoot`](tether::SessionRoot) and every prepared
//! statement is a child [`Handle`](tether::Handle). Statements may be
//! dropped on any thread, in any order relative to their session; each is
//! finalized exactly once and always before its connection is closed.
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_sqlite::{SqliteConfig, SqliteSession};
//!
//! let session = SqliteSession::open(&SqliteConfig::memory())?;
//! session.execute("CREATE TABLE t (x INTEGER)")?;
//! assert_eq!(session.execute("INSERT INTO t VALUES (1), (2)")?, 2);
//!
//! let mut count = session.prepare("SELECT x FROM t")?;
//! assert_eq!(count.step_all()?, 2);
//! ```
//!
//! # Thread Safety
//!
//! Connections are opened in serialized mode (`SQLITE_OPEN_FULLMUTEX`),
//! and finalize/close calls for one session are serialized by its root.
//! Using a statement while another thread closes its session is a race the
//! caller must avoid.

pub mod ffi;
pub mod session;
pub mod statement;

pub use session::{CloseConnection, OpenMode, SqliteConfig, SqliteSession};
pub use statement::{FinalizeStatement, SqliteStatement};

/// Re-export the SQLite library version.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}

/// Re-export the SQLite library version number.
pub fn sqlite_version_number() -> i32 {
    ffi::version_number()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_version() {
        let version = sqlite_version();
        assert!(
            version.starts_with('3'),
            "Expected SQLite 3.x, got {}",
            version
        );
    }

    #[test]
    fn test_sqlite_version_number() {
        let num = sqlite_version_number();
        assert!(
            num >= 3_000_000,
            "Expected SQLite 3.x.x (>= 3000000), got {}",
            num
        );
    }
}
