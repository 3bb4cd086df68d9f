//! Core types and traits for Tether.
//!
//! This crate provides the leaf abstractions shared by the handle machinery
//! and the engine bindings:
//!
//! - [`NativeRef`] - opaque, pointer-sized identifier handed out by the engine
//! - [`ResourceKind`] - the closed set of native resource kinds
//! - [`Unbind`] - the single native call that frees a resource
//! - [`Error`] - errors surfaced from the use and bind paths
//! - [`SessionConfig`] - per-session configuration
//! - [`ReleaseStats`] / [`ReleaseTrigger`] - release bookkeeping

pub mod config;
pub mod error;
pub mod native;
pub mod stats;

pub use config::SessionConfig;
pub use error::{BindError, ConfigError, Error, Result, UseAfterRelease};
pub use native::{NativeError, NativeRef, ResourceKind, Unbind};
pub use stats::{ReleaseFlag, ReleaseStats, ReleaseTrigger};
