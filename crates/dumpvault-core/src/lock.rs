// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Advisory lock giving one run exclusive ownership of the local workspace.
//!
//! Clearing the workspace would destroy another run's in-flight files, so a run must
//! hold this lock before touching anything in the directory. The lock is a file
//! created with `create_new`; a crashed run leaves it behind and an operator removes
//! it by hand.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

/// File name of the lock inside the workspace.
pub const LOCK_FILE_NAME: &str = ".dumpvault.lock";

/// Held workspace lock. Released on drop.
#[derive(Debug)]
pub struct WorkspaceLock {
    path: PathBuf,
}

impl WorkspaceLock {
    /// Take the lock in `dir`. Fails with `AlreadyExists` while another run holds it.
    pub fn acquire(dir: &Path) -> io::Result<Self> {
        let path = dir.join(LOCK_FILE_NAME);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        let lock = Self { path };
        writeln!(file, "{}", std::process::id())?;
        Ok(lock)
    }

    /// Location of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), %err, "failed to release workspace lock");
        }
    }
}
