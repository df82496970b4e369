// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ports for the external collaborators that produce dumps and archives.

use std::future::Future;
use std::path::{Path, PathBuf};

/// Failure of the dump producer for one data source.
#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    /// The producer could not be started.
    #[error("cannot start dump of {name}: {source}")]
    Spawn {
        /// Data source being dumped.
        name: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Writing the dump file failed.
    #[error("dump io on {}: {source}", .path.display())]
    Io {
        /// Dump file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The producer ran and reported failure.
    #[error("dump of {name} failed ({status}): {stderr}")]
    Failed {
        /// Data source being dumped.
        name: String,
        /// Exit status as reported by the OS.
        status: String,
        /// Captured diagnostic output, possibly truncated.
        stderr: String,
    },
    /// Catch-all error variant.
    #[error("other: {0}")]
    Other(String),
}

/// Failure of the archiver.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The archiver could not be started.
    #[error("cannot start archiver {program}: {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Local I/O around the archive failed.
    #[error("archive io on {}: {source}", .path.display())]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The archiver ran and reported failure.
    #[error("archiver failed ({status}): {stderr}")]
    Failed {
        /// Exit status as reported by the OS.
        status: String,
        /// Captured diagnostic output, possibly truncated.
        stderr: String,
    },
    /// The archiver reported success but left no archive behind.
    #[error("archiver produced no file at {}", .0.display())]
    Missing(PathBuf),
    /// Catch-all error variant.
    #[error("other: {0}")]
    Other(String),
}

/// Produces one raw dump per data source.
///
/// Dumps for different sources share no state and may run concurrently.
pub trait DumpProducer: Send + Sync {
    /// Dump `source` into the file at `out`, creating or truncating it.
    fn dump(&self, source: &str, out: &Path)
        -> impl Future<Output = Result<(), DumpError>> + Send;
}

/// Bundles dump files into a single archive.
pub trait Archiver: Send + Sync {
    /// Write an archive at `archive` containing every file in `inputs`.
    fn package(
        &self,
        inputs: &[PathBuf],
        archive: &Path,
    ) -> impl Future<Output = Result<(), ArchiveError>> + Send;
}
