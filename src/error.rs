//! Typed errors returned across the SourceManager boundary.
//!
//! Internal plumbing (I/O, git2, URL parsing) is threaded through with
//! [`anyhow::Context`] until it crosses into one of these variants; callers
//! of the facade only ever see [`SourceManagerError`].

use std::path::PathBuf;

use crate::identifier::ProjectIdentifier;

/// Every error kind enumerated in the design: `Released`,
/// `CouldNotCreateLock`, `Unreachable`, `SourceFailure`, `CacheCorrupt`,
/// `NoSuchVersion`, `UnreachableMetadata`, `MalformedMetadata`, `NoMatch`,
/// `Cancelled`, `AnalyzerFailure`, `BadInput`.
#[derive(Debug, thiserror::Error)]
pub enum SourceManagerError {
    /// Returned by any facade operation invoked after `Release` has begun.
    #[error("source manager has been released")]
    Released,

    /// The cache lock file could not be created exclusively, meaning
    /// another instance may already hold the cache directory.
    #[error("could not create cache lock file at {path}: {source}")]
    CouldNotCreateLock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A network-bound operation failed because the remote was not
    /// reachable (as opposed to a VCS-level protocol failure).
    #[error("{source_id}: unreachable during {operation}: {message}")]
    Unreachable {
        source_id: String,
        operation: &'static str,
        message: String,
    },

    /// The underlying VCS adapter reported a failure that was not a
    /// reachability problem.
    #[error("{source_id}: source failure during {operation}: {message}")]
    SourceFailure {
        source_id: String,
        operation: &'static str,
        message: String,
    },

    /// The on-disk cache for a source was corrupt and the one self-heal
    /// attempt (delete and reclone) also failed.
    #[error("{source_id}: local cache corrupt and self-heal failed: {message}")]
    CacheCorrupt { source_id: String, message: String },

    /// The requested version does not exist for this source.
    #[error("{source_id}: no such version: {version}")]
    NoSuchVersion { source_id: String, version: String },

    /// The deduction coordinator's metadata probe could not reach the host.
    #[error("could not reach metadata endpoint for {path}: {message}")]
    UnreachableMetadata { path: String, message: String },

    /// The deduction coordinator's metadata probe returned a response that
    /// could not be parsed as a source-import announcement.
    #[error("malformed metadata response for {path}: {message}")]
    MalformedMetadata { path: String, message: String },

    /// No static rule matched the import path and no probe was available
    /// (or the probe returned no usable announcement).
    #[error("no deduction rule matches import path {path}")]
    NoMatch { path: String },

    /// The operation's combined context was cancelled before completion.
    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },

    /// The injected project analyzer failed to derive a manifest/lock.
    #[error("{source_id}: analyzer failed at {version}: {message}")]
    AnalyzerFailure {
        source_id: String,
        version: String,
        message: String,
    },

    /// The caller supplied an argument that violates a documented
    /// precondition (e.g. a non-empty export destination).
    #[error("bad input: {0}")]
    BadInput(String),
}

impl SourceManagerError {
    pub(crate) fn unreachable(
        id: &ProjectIdentifier,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        SourceManagerError::Unreachable {
            source_id: id.to_string(),
            operation,
            message: message.into(),
        }
    }

    pub(crate) fn source_failure(
        id: &ProjectIdentifier,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        SourceManagerError::SourceFailure {
            source_id: id.to_string(),
            operation,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SourceManagerError>;
