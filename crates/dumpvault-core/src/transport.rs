// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Port for the remote store the pipeline ships archives to.
//!
//! The pipeline only ever needs these primitives; the wire protocol behind them
//! belongs to the adapter. Implementations are expected to issue one remote call per
//! method and never retry internally: timeouts and the run deadline are applied by
//! the caller.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use crate::config::Credentials;

/// One raw entry from a non-recursive directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Entry name as reported by the store. May carry a path prefix.
    pub name: String,
    /// Stored object size in bytes.
    pub size_bytes: u64,
}

impl RemoteEntry {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            name: name.into(),
            size_bytes,
        }
    }
}

/// Errors surfaced by [`Transport`] implementations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The store could not be reached.
    #[error("connect to {host} failed: {reason}")]
    Connect {
        /// Host or root the transport tried to reach.
        host: String,
        /// Adapter-specific reason.
        reason: String,
    },
    /// The store rejected the credentials.
    #[error("authentication as {user:?} failed: {reason}")]
    Auth {
        /// User name presented.
        user: String,
        /// Adapter-specific reason.
        reason: String,
    },
    /// An operation was issued before `connect`.
    #[error("transport is not connected")]
    NotConnected,
    /// The remote path is malformed or escapes the store root.
    #[error("invalid remote path {0:?}")]
    InvalidPath(String),
    /// I/O failure while performing `op` on `path`.
    #[error("{op} {path} failed: {source}")]
    Io {
        /// Primitive that failed (`list`, `delete`, ...).
        op: &'static str,
        /// Remote (or local, for uploads) path involved.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The store answered `op` on `path` with a refusal or an unexpected reply.
    #[error("{op} {path} refused: {reason}")]
    Refused {
        /// Primitive that was refused.
        op: &'static str,
        /// Remote path involved.
        path: String,
        /// Reply as reported by the adapter.
        reason: String,
    },
    /// The operation did not finish inside its time budget.
    #[error("{op} timed out after {after:?}")]
    TimedOut {
        /// Primitive that timed out.
        op: &'static str,
        /// Budget that was exhausted.
        after: Duration,
    },
    /// Catch-all error variant.
    #[error("other: {0}")]
    Other(String),
}

/// Primitive remote operations required by the pipeline.
///
/// Methods return `Send` futures so a pipeline can be driven from a multi-threaded
/// runtime; adapters can implement them with plain `async fn`.
pub trait Transport: Send + Sync {
    /// Open a session against `host`.
    fn connect(&mut self, host: &str) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Authenticate the open session.
    fn authenticate(
        &mut self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns `true` when `path` exists and is a directory.
    fn exists(&self, path: &str) -> impl Future<Output = Result<bool, TransportError>> + Send;

    /// Create directory `path`.
    fn mkdir(&self, path: &str) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Non-recursive listing of `dir`.
    fn list(
        &self,
        dir: &str,
    ) -> impl Future<Output = Result<Vec<RemoteEntry>, TransportError>> + Send;

    /// Remove the object at `path`.
    fn delete(&self, path: &str) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Upload the local file at `local` into `remote_dir`, keeping its file name.
    fn upload(
        &self,
        local: &Path,
        remote_dir: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Join a remote directory and an entry name with `/`.
pub fn remote_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_owned()
    } else if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}
