//! SQLite sessions rooted in a [`SessionRoot`].
//!
//! A [`SqliteSession`] owns one `sqlite3*` connection through a session
//! root whose unbinder is `sqlite3_close_v2`. Every statement prepared on
//! the session is a child handle of that root, so statements dropped on
//! any thread are finalized through the root's deferred queue and always
//! before the connection is closed.
//!
//! ```rust,ignore
//! use tether_sqlite::SqliteSession;
//!
//! let session = SqliteSession::open_memory()?;
//! session.execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
//! session.execute("INSERT INTO users (name) VALUES ('Alice')")?;
//!
//! let mut stmt = session.prepare("SELECT * FROM users")?;
//! assert_eq!(stmt.step_all()?, 1);
//! drop(stmt);       // queued for finalization
//! session.close();  // statement finalized, then the connection closed
//! ```

// Allow casts in FFI code where we need to match C types exactly
#![allow(clippy::cast_lossless)]
#![allow(clippy::borrow_as_ptr)] // FFI requires raw pointers

use crate::ffi;
use crate::statement::{FinalizeStatement, SqliteStatement};
use std::ffi::{CString, c_int};
use std::ptr;
use std::sync::Arc;
use tether::{Handle, Owner, SessionRoot};
use tether_core::{
    BindError, NativeError, NativeRef, ReleaseStats, ResourceKind, Result, SessionConfig, Unbind,
};

/// How the database file is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    /// The database must already exist.
    ReadWrite,
    #[default]
    ReadWriteCreate,
}

impl OpenMode {
    /// Connections are always serialized: statements may be finalized from
    /// whichever thread drops them.
    fn to_sqlite_flags(self) -> c_int {
        let mode = match self {
            OpenMode::ReadOnly => ffi::SQLITE_OPEN_READONLY,
            OpenMode::ReadWrite => ffi::SQLITE_OPEN_READWRITE,
            OpenMode::ReadWriteCreate => ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE,
        };
        mode | ffi::SQLITE_OPEN_FULLMUTEX
    }
}

/// Configuration for opening SQLite sessions.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:".
    pub path: String,
    pub mode: OpenMode,
    /// Busy timeout in milliseconds; 0 leaves SQLite's default.
    pub busy_timeout_ms: u32,
    /// Handle policy for the session root and its statements.
    pub session: SessionConfig,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self::file(":memory:")
    }
}

impl SqliteConfig {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: OpenMode::default(),
            busy_timeout_ms: 5000,
            session: SessionConfig::default(),
        }
    }

    pub fn memory() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: OpenMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    /// Set the handle policy for the session.
    pub fn session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Open read-only and mark the session and its statements read-only.
    pub fn read_only(mut self) -> Self {
        self.mode = OpenMode::ReadOnly;
        self.session.read_only = true;
        self
    }
}

/// Unbinder for connections.
///
/// `sqlite3_close_v2` turns a connection with unfinalized statements into a
/// zombie that is freed by the last finalize, so statements unbound after
/// their session remain safe to finalize.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloseConnection;

impl Unbind for CloseConnection {
    fn unbind_native(&self, native: NativeRef) -> std::result::Result<(), NativeError> {
        let db: *mut ffi::sqlite3 = native.as_ptr();
        // SAFETY: the root hands each connection to its unbinder exactly once
        let rc = unsafe { ffi::sqlite3_close_v2(db) };
        if rc == ffi::SQLITE_OK {
            Ok(())
        } else {
            Err(NativeError::with_code(rc, ffi::error_string(rc)))
        }
    }
}

/// A SQLite connection owned by a session root.
///
/// Cloning the session's [`SessionRoot`] (directly, or by preparing
/// statements) keeps the connection alive; it is closed by
/// [`close`](Self::close) or once the session and every statement are gone.
#[derive(Debug)]
pub struct SqliteSession {
    root: SessionRoot,
    path: String,
}

impl SqliteSession {
    /// Open a new SQLite session with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let root = SessionRoot::with_config(Arc::new(CloseConnection), config.session.clone());
        root.bind(|| open_connection(config))?;

        tracing::debug!(
            session = root.label(),
            path = %config.path,
            sqlite = ffi::version(),
            "Opened SQLite session"
        );

        Ok(Self {
            root,
            path: config.path.clone(),
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open a file-based database.
    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(&SqliteConfig::file(path))
    }

    /// Get the database path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The session root owning the connection.
    pub fn root(&self) -> &SessionRoot {
        &self.root
    }

    /// Compile `sql` into a statement owned by this session.
    ///
    /// On a read-only session, statements that would write are rejected.
    pub fn prepare(&self, sql: &str) -> Result<SqliteStatement> {
        let handle = Handle::new(&self.root, ResourceKind::Query, Arc::new(FinalizeStatement));
        let db: *mut ffi::sqlite3 = self.root.native()?.as_ptr();
        handle.bind(|| prepare_statement(db, sql))?;

        let statement = SqliteStatement::new(handle, sql);
        if statement.is_read_only() && !statement.is_reader()? {
            return Err(BindError::new(
                ResourceKind::Query,
                "statement writes to a read-only session",
            )
            .into());
        }

        tracing::trace!(session = self.root.label(), sql, "Prepared statement");
        Ok(statement)
    }

    /// Run a one-shot statement and return the number of rows it changed.
    pub fn execute(&self, sql: &str) -> Result<u64> {
        let mut statement = self.prepare(sql)?;
        statement.step_all()?;
        let db: *mut ffi::sqlite3 = self.root.native()?.as_ptr();
        // SAFETY: db is bound to a live root
        let changes = unsafe { ffi::sqlite3_changes(db) };
        statement.release();
        Ok(u64::try_from(changes).unwrap_or(0))
    }

    /// Finalize outstanding released statements now.
    pub fn drain_pending(&self) -> usize {
        self.root.drain_pending()
    }

    /// Close the session. Idempotent.
    ///
    /// Released statements are finalized first; statements still held are
    /// finalized when they are dropped and fail with `SessionClosed` if used.
    pub fn close(&self) {
        self.root.release();
    }

    pub fn is_closed(&self) -> bool {
        self.root.is_released()
    }

    pub fn stats(&self) -> ReleaseStats {
        self.root.stats()
    }
}

impl Owner for SqliteSession {
    fn session_root(&self) -> &SessionRoot {
        &self.root
    }
}

fn open_connection(config: &SqliteConfig) -> Result<NativeRef> {
    let c_path = CString::new(config.path.as_str()).map_err(|_| {
        BindError::new(ResourceKind::Session, "Invalid path: contains null byte")
    })?;

    let mut db: *mut ffi::sqlite3 = ptr::null_mut();
    let flags = config.mode.to_sqlite_flags();

    // SAFETY: We pass valid pointers and check the return value
    let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

    if rc != ffi::SQLITE_OK {
        let msg = if db.is_null() {
            ffi::error_string(rc).to_string()
        } else {
            // SAFETY: db is valid; it was never handed to a root
            unsafe {
                let msg = ffi::errmsg(db);
                ffi::sqlite3_close_v2(db);
                msg
            }
        };

        return Err(BindError::with_code(
            ResourceKind::Session,
            rc,
            format!("Failed to open database: {}", msg),
        )
        .into());
    }

    if config.busy_timeout_ms > 0 {
        let timeout = c_int::try_from(config.busy_timeout_ms).unwrap_or(c_int::MAX);
        // SAFETY: db is valid
        unsafe {
            ffi::sqlite3_busy_timeout(db, timeout);
        }
    }

    Ok(NativeRef::from_ptr(db))
}

fn prepare_statement(db: *mut ffi::sqlite3, sql: &str) -> Result<NativeRef> {
    let c_sql = CString::new(sql)
        .map_err(|_| BindError::new(ResourceKind::Query, "SQL contains null byte"))?;
    let n_bytes = c_int::try_from(c_sql.as_bytes().len())
        .map_err(|_| BindError::new(ResourceKind::Query, "SQL is too long"))?;

    let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();

    // SAFETY: All pointers are valid
    let rc = unsafe {
        ffi::sqlite3_prepare_v2(db, c_sql.as_ptr(), n_bytes, &mut stmt, ptr::null_mut())
    };

    if rc != ffi::SQLITE_OK {
        // SAFETY: db is valid
        let msg = unsafe { ffi::errmsg(db) };
        return Err(BindError::with_code(ResourceKind::Query, rc, msg).into());
    }
    if stmt.is_null() {
        return Err(BindError::new(ResourceKind::Query, "SQL contains no statement").into());
    }

    Ok(NativeRef::from_ptr(stmt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_mode_flags() {
        let flags = OpenMode::default().to_sqlite_flags();
        assert_ne!(flags & ffi::SQLITE_OPEN_READWRITE, 0);
        assert_ne!(flags & ffi::SQLITE_OPEN_CREATE, 0);
        assert_ne!(flags & ffi::SQLITE_OPEN_FULLMUTEX, 0);

        let flags = OpenMode::ReadOnly.to_sqlite_flags();
        assert_ne!(flags & ffi::SQLITE_OPEN_READONLY, 0);
        assert_eq!(flags & ffi::SQLITE_OPEN_READWRITE, 0);
        assert_ne!(flags & ffi::SQLITE_OPEN_FULLMUTEX, 0);
    }

    #[test]
    fn test_config_builders() {
        let config = SqliteConfig::file("app.db").busy_timeout(250);
        assert_eq!(config.path, "app.db");
        assert_eq!(config.busy_timeout_ms, 250);
        assert!(!config.session.read_only);

        let config = SqliteConfig::memory().read_only();
        assert_eq!(config.mode, OpenMode::ReadOnly);
        assert!(config.session.read_only);
    }

    #[test]
    fn test_open_memory() {
        let session = SqliteSession::open_memory().unwrap();
        assert_eq!(session.path(), ":memory:");
        assert!(!session.is_closed());
        assert!(!session.root().native().unwrap().is_null());
    }

    #[test]
    fn test_open_failure_is_bind_error() {
        let config = SqliteConfig::file("/nonexistent/dir/db.sqlite").mode(OpenMode::ReadWrite);
        let err = SqliteSession::open(&config).unwrap_err();
        match err {
            tether_core::Error::Bind(e) => {
                assert_eq!(e.kind, ResourceKind::Session);
                assert!(e.code.is_some());
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_close_is_idempotent() {
        let session = SqliteSession::open_memory().unwrap();
        session.close();
        session.close();
        assert!(session.is_closed());
        assert_eq!(session.stats().unbound, 1);
        assert_eq!(session.stats().failures, 0);
    }
}
