//! Error types for handle operations.
//!
//! Only the *use* and *bind* paths return errors. Release never does: a
//! failing unbind is logged and counted, never handed back to the caller.

use crate::native::{NativeError, ResourceKind};
use crate::stats::ReleaseTrigger;
use std::fmt;

/// The primary error type for all Tether operations.
#[derive(Debug)]
pub enum Error {
    /// A handle was used after its release was claimed
    UseAfterRelease(UseAfterRelease),
    /// A child handle was used after its session root began finalizing
    SessionClosed { kind: ResourceKind },
    /// A native reference was already attached to the handle
    AlreadyBound { kind: ResourceKind },
    /// A handle was used before a native reference was attached
    NotBound { kind: ResourceKind },
    /// The native reference factory failed
    Bind(BindError),
    /// A native call outside the release path failed
    Native(NativeError),
    /// Configuration errors
    Config(ConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UseAfterRelease {
    pub kind: ResourceKind,
    /// Which path released the handle, if the handle was ever released
    /// (a handle whose root closed reports `None`).
    pub released_by: Option<ReleaseTrigger>,
}

#[derive(Debug)]
pub struct BindError {
    pub kind: ResourceKind,
    /// Engine result code, when available.
    pub code: Option<i32>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Whether this error reports use of a released handle.
    pub fn is_use_after_release(&self) -> bool {
        matches!(self, Error::UseAfterRelease(_) | Error::SessionClosed { .. })
    }

    /// The resource kind involved, when the error is tied to a handle.
    pub fn kind(&self) -> Option<ResourceKind> {
        match self {
            Error::UseAfterRelease(e) => Some(e.kind),
            Error::SessionClosed { kind }
            | Error::AlreadyBound { kind }
            | Error::NotBound { kind } => Some(*kind),
            Error::Bind(e) => Some(e.kind),
            Error::Native(_) | Error::Config(_) => None,
        }
    }
}

impl BindError {
    pub fn new(kind: ResourceKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_code(kind: ResourceKind, code: i32, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: Some(code),
            message: message.into(),
            source: None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UseAfterRelease(e) => write!(f, "{}", e),
            Error::SessionClosed { kind } => {
                write!(f, "{} handle used after its session was closed", kind)
            }
            Error::AlreadyBound { kind } => {
                write!(f, "{} handle is already bound to a native resource", kind)
            }
            Error::NotBound { kind } => {
                write!(f, "{} handle is not bound to a native resource", kind)
            }
            Error::Bind(e) => write!(f, "{}", e),
            Error::Native(e) => write!(f, "native call failed: {}", e),
            Error::Config(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Bind(e) => e
                .source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn std::error::Error + 'static)),
            Error::Native(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for UseAfterRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.released_by {
            Some(trigger) => write!(
                f,
                "{} handle used after release (released by {})",
                self.kind, trigger
            ),
            None => write!(f, "{} handle used after release", self.kind),
        }
    }
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(
                f,
                "failed to bind {} handle (code {}): {}",
                self.kind, code, self.message
            ),
            None => write!(f, "failed to bind {} handle: {}", self.kind, self.message),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Configuration error: {}", self.message)
    }
}

impl From<UseAfterRelease> for Error {
    fn from(err: UseAfterRelease) -> Self {
        Error::UseAfterRelease(err)
    }
}

impl From<BindError> for Error {
    fn from(err: BindError) -> Self {
        Error::Bind(err)
    }
}

impl From<NativeError> for Error {
    fn from(err: NativeError) -> Self {
        Error::Native(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(ConfigError {
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

/// Result type alias for Tether operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_use_after_release_display() {
        let err = Error::from(UseAfterRelease {
            kind: ResourceKind::Results,
            released_by: Some(ReleaseTrigger::Disposal),
        });
        assert!(err.is_use_after_release());
        assert_eq!(err.kind(), Some(ResourceKind::Results));
        assert_eq!(
            err.to_string(),
            "results handle used after release (released by disposal)"
        );
    }

    #[test]
    fn test_session_closed_counts_as_use_after_release() {
        let err = Error::SessionClosed {
            kind: ResourceKind::List,
        };
        assert!(err.is_use_after_release());
        assert!(!Error::AlreadyBound { kind: ResourceKind::List }.is_use_after_release());
    }

    #[test]
    fn test_bind_error_display() {
        let err = Error::from(BindError::with_code(ResourceKind::Query, 1, "syntax"));
        assert_eq!(
            err.to_string(),
            "failed to bind query handle (code 1): syntax"
        );
        assert!(err.source().is_none());
    }

    #[test]
    fn test_native_error_source() {
        let err = Error::from(NativeError::new("busy"));
        assert!(err.source().is_some());
        assert_eq!(err.kind(), None);
    }
}
