//! Prepared statements as child handles of a session.

use crate::ffi;
use std::ffi::c_int;
use tether::Handle;
use tether_core::{NativeError, NativeRef, Result, Unbind};

/// Unbinder for prepared statements.
///
/// The code returned by `sqlite3_finalize` repeats the last step error, not
/// a failure to free, so finalization always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct FinalizeStatement;

impl Unbind for FinalizeStatement {
    fn unbind_native(&self, native: NativeRef) -> std::result::Result<(), NativeError> {
        let stmt: *mut ffi::sqlite3_stmt = native.as_ptr();
        // SAFETY: the root hands each statement to its unbinder exactly once
        unsafe {
            ffi::sqlite3_finalize(stmt);
        }
        Ok(())
    }
}

/// A compiled statement owned by a [`SqliteSession`](crate::SqliteSession).
///
/// Dropping the statement releases it on whatever thread drops it; the
/// finalize call itself happens on the session's next drain.
#[derive(Debug)]
pub struct SqliteStatement {
    handle: Handle,
    sql: String,
}

impl SqliteStatement {
    pub(crate) fn new(handle: Handle, sql: &str) -> Self {
        Self {
            handle,
            sql: sql.to_string(),
        }
    }

    /// The SQL text this statement was compiled from.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// The underlying handle.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn is_read_only(&self) -> bool {
        self.handle.is_read_only()
    }

    /// Number of columns in the result set.
    pub fn column_count(&self) -> Result<usize> {
        let stmt = self.raw()?;
        // SAFETY: stmt is bound and not released
        let count = unsafe { ffi::sqlite3_column_count(stmt) };
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Run the statement to completion and return the number of rows it
    /// produced. The statement is reset afterwards and can be run again.
    pub fn step_all(&mut self) -> Result<u64> {
        let stmt = self.raw()?;
        let mut rows = 0u64;
        loop {
            // SAFETY: stmt is bound and not released; &mut self keeps other
            // steps of this statement out
            let rc = unsafe { ffi::sqlite3_step(stmt) };
            match rc {
                ffi::SQLITE_ROW => rows += 1,
                ffi::SQLITE_DONE => break,
                _ => {
                    let err = step_error(stmt, rc);
                    // SAFETY: stmt is valid
                    unsafe { ffi::sqlite3_reset(stmt) };
                    tracing::trace!(sql = %self.sql, code = rc, "Statement step failed");
                    return Err(err.into());
                }
            }
        }

        // SAFETY: stmt is valid
        unsafe { ffi::sqlite3_reset(stmt) };
        Ok(rows)
    }

    /// Release the statement now. It is finalized by the session's next
    /// drain, or immediately if the session is already closed.
    pub fn release(self) {
        self.handle.release();
    }

    /// Whether the statement only reads from the database.
    pub(crate) fn is_reader(&self) -> Result<bool> {
        let stmt = self.raw()?;
        // SAFETY: stmt is bound and not released
        Ok(unsafe { ffi::sqlite3_stmt_readonly(stmt) } != 0)
    }

    fn raw(&self) -> Result<*mut ffi::sqlite3_stmt> {
        Ok(self.handle.native()?.as_ptr())
    }
}

fn step_error(stmt: *mut ffi::sqlite3_stmt, rc: c_int) -> NativeError {
    // SAFETY: stmt is valid, so is the connection it belongs to
    let message = unsafe {
        let db = ffi::sqlite3_db_handle(stmt);
        ffi::errmsg(db)
    };
    NativeError::with_code(rc, message)
}
