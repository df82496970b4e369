// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Pipeline stages and the terminal failure type.

use std::fmt;
use std::path::PathBuf;

use crate::collab::{ArchiveError, DumpError};
use crate::name::NameError;
use crate::transport::TransportError;

/// States of one backup run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Nothing has happened yet.
    Init,
    /// Workspace locked and cleared, transport connected, remote directory present.
    WorkspacePrepared,
    /// Every configured source has been dumped.
    Dumped,
    /// Dumps bundled into one archive; raw dumps removed.
    Packaged,
    /// Remote inventory listed.
    InventoryRead,
    /// Planned deletions executed (individual failures skipped).
    Evicted,
    /// Archive(s) uploaded.
    Uploaded,
    /// Local archive files removed. Terminal success.
    CleanedUp,
}

impl Stage {
    /// Stable lowercase label used in log records.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::WorkspacePrepared => "workspace_prepared",
            Self::Dumped => "dumped",
            Self::Packaged => "packaged",
            Self::InventoryRead => "inventory_read",
            Self::Evicted => "evicted",
            Self::Uploaded => "uploaded",
            Self::CleanedUp => "cleaned_up",
        }
    }

    /// Process exit status for a run that failed while trying to reach this stage.
    pub const fn exit_code(self) -> u8 {
        match self {
            Self::Init => 1,
            Self::WorkspacePrepared => 3,
            Self::Dumped => 4,
            Self::Packaged => 5,
            Self::InventoryRead => 6,
            Self::Evicted => 7,
            Self::Uploaded => 8,
            Self::CleanedUp => 9,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run stopped.
#[derive(Debug, thiserror::Error)]
pub enum FailureCause {
    /// Another run holds the workspace lock.
    #[error("workspace is locked by another run ({})", .0.display())]
    WorkspaceBusy(PathBuf),
    /// Local workspace I/O failed.
    #[error("workspace io on {}: {source}", .path.display())]
    Workspace {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The dump producer failed.
    #[error(transparent)]
    Dump(#[from] DumpError),
    /// The archiver failed.
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    /// The archive name could not be rendered.
    #[error(transparent)]
    Name(#[from] NameError),
    /// A remote operation failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// An operator asked the run to stop.
    #[error("cancelled")]
    Cancelled,
    /// The per-run deadline elapsed.
    #[error("run deadline exceeded")]
    DeadlineExceeded,
}

/// Terminal failure of a run: the stage it was trying to reach and why it could not.
#[derive(Debug, thiserror::Error)]
#[error("stage {stage} failed: {cause}")]
pub struct RunError {
    /// Stage the run was trying to reach.
    pub stage: Stage,
    /// Underlying cause.
    #[source]
    pub cause: FailureCause,
}

impl RunError {
    /// Pair a stage with a cause.
    pub fn new(stage: Stage, cause: impl Into<FailureCause>) -> Self {
        Self {
            stage,
            cause: cause.into(),
        }
    }

    /// Process exit status for this failure. Cancellation maps to 130 regardless of stage.
    pub fn exit_code(&self) -> u8 {
        match self.cause {
            FailureCause::Cancelled => 130,
            _ => self.stage.exit_code(),
        }
    }
}
