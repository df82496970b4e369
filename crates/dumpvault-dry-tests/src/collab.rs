// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Dump producer and archiver fakes that write small real files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dumpvault_core::collab::{ArchiveError, Archiver, DumpError, DumpProducer};
use tokio::io::AsyncWriteExt;

/// Writes `-- dump of <source>` into each dump file.
#[derive(Clone, Default)]
pub struct FakeDumper {
    inner: Arc<Mutex<DumperInner>>,
}

#[derive(Default)]
struct DumperInner {
    failing: HashSet<String>,
    dumped: Vec<String>,
}

impl FakeDumper {
    /// Dumper that succeeds for every source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make dumps of `source` fail after writing a partial file.
    pub fn fail_source(&self, source: &str) {
        self.lock().failing.insert(source.to_owned());
    }

    /// Sources dumped successfully, in completion order.
    pub fn dumped(&self) -> Vec<String> {
        self.lock().dumped.clone()
    }

    fn lock(&self) -> MutexGuard<'_, DumperInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DumpProducer for FakeDumper {
    async fn dump(&self, source: &str, out: &Path) -> Result<(), DumpError> {
        let io = |e| DumpError::Io {
            path: out.to_path_buf(),
            source: e,
        };
        tokio::fs::write(out, format!("-- dump of {source}\n"))
            .await
            .map_err(io)?;
        let failing = self.lock().failing.contains(source);
        if failing {
            return Err(DumpError::Failed {
                name: source.to_owned(),
                status: "exit status: 2".into(),
                stderr: "simulated dump failure".into(),
            });
        }
        self.lock().dumped.push(source.to_owned());
        Ok(())
    }
}

/// Appends its inputs to the archive file, updating an existing archive in place
/// the way `zip` does.
#[derive(Clone, Default)]
pub struct FakeArchiver {
    inner: Arc<Mutex<ArchiverInner>>,
}

#[derive(Default)]
struct ArchiverInner {
    fail: bool,
    packaged: Vec<(PathBuf, Vec<PathBuf>)>,
}

impl FakeArchiver {
    /// Archiver that always succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make packaging fail after writing a partial archive.
    pub fn set_fail(&self, fail: bool) {
        self.lock().fail = fail;
    }

    /// Every `(archive, inputs)` pair packaged so far.
    pub fn packaged(&self) -> Vec<(PathBuf, Vec<PathBuf>)> {
        self.lock().packaged.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ArchiverInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Archiver for FakeArchiver {
    async fn package(&self, inputs: &[PathBuf], archive: &Path) -> Result<(), ArchiveError> {
        let io = |path: &Path, e| ArchiveError::Io {
            path: path.to_path_buf(),
            source: e,
        };
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(archive)
            .await
            .map_err(|e| io(archive, e))?;
        let fail = self.lock().fail;
        if fail {
            return Err(ArchiveError::Failed {
                status: "exit status: 1".into(),
                stderr: "simulated archiver failure".into(),
            });
        }
        for input in inputs {
            let bytes = tokio::fs::read(input).await.map_err(|e| io(input, e))?;
            file.write_all(&bytes).await.map_err(|e| io(archive, e))?;
        }
        file.flush().await.map_err(|e| io(archive, e))?;
        self.lock()
            .packaged
            .push((archive.to_path_buf(), inputs.to_vec()));
        Ok(())
    }
}
