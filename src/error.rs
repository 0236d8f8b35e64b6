// src/error.rs

//! Error types for the wheelhouse mirror
//!
//! One crate-wide error enum. Variants map onto the retry policy: transient
//! network failures and checksum mismatches are retryable, 404/410 is
//! terminal for the resource, local IO and configuration errors fail the
//! run. `exit_code` maps errors to the process exit codes of the CLI.

use thiserror::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file missing, unreadable, or invalid
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Filesystem or storage backend failure
    #[error("I/O error: {0}")]
    IoError(String),

    /// Destination ran out of space during a write
    #[error("disk full: {0}")]
    IoFull(String),

    /// Permission denied by the storage backend
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A path that was expected to exist does not
    #[error("not found: {0}")]
    NotFound(String),

    /// A path that was expected to be absent already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Transient network failure (connect reset, 5xx, timeout, partial read)
    #[error("download error: {0}")]
    DownloadError(String),

    /// Upstream answered 404/410: the resource is gone for good
    #[error("gone upstream: {0}")]
    UpstreamNotFound(String),

    /// Upstream served metadata older than the serial we were promised
    #[error("stale metadata for {package}: expected serial {expected}, got {got}")]
    StaleMetadata {
        package: String,
        expected: u64,
        got: u64,
    },

    /// Downloaded bytes do not match the declared digest
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Upstream response could not be decoded
    #[error("parse error: {0}")]
    ParseError(String),

    /// A filter plugin failed to load (bad regex, unknown name)
    #[error("filter error: {0}")]
    FilterError(String),

    /// Another process holds the mirror lock
    #[error("mirror locked: {0}")]
    LockContention(String),

    /// The run was cancelled (interrupt or stop-on-error)
    #[error("cancelled")]
    Cancelled,

    /// One or more projects failed during the run
    #[error("{0} package(s) failed to sync")]
    SyncIncomplete(usize),
}

impl Error {
    /// Whether the operation that produced this error may be retried.
    ///
    /// Retry applies to transient network classes and to checksum
    /// mismatches (a torn CDN response fixes itself on re-fetch). Stale
    /// metadata has its own bounded retry loop in the pipeline.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::DownloadError(_) | Error::ChecksumMismatch { .. } | Error::StaleMetadata { .. }
        )
    }

    /// Whether this error means the remote resource is permanently gone.
    pub fn is_gone(&self) -> bool {
        matches!(self, Error::UpstreamNotFound(_))
    }

    /// Process exit code for this error.
    ///
    /// 1 = partial failure, 2 = usage/configuration, 3 = lock contention.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ConfigError(_) | Error::FilterError(_) | Error::ParseError(_) => 2,
            Error::LockContention(_) => 3,
            _ => 1,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::NotFound => Error::NotFound(e.to_string()),
            ErrorKind::AlreadyExists => Error::AlreadyExists(e.to_string()),
            ErrorKind::PermissionDenied => Error::PermissionDenied(e.to_string()),
            ErrorKind::StorageFull => Error::IoFull(e.to_string()),
            _ => Error::IoError(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::ParseError(format!("JSON: {e}"))
    }
}
