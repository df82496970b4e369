// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory remote store for pipeline tests.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dumpvault_core::config::Credentials;
use dumpvault_core::transport::{remote_path, RemoteEntry, Transport, TransportError};

/// One primitive call observed by [`InMemoryTransport`], in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    /// `connect(host)`
    Connect(String),
    /// `authenticate(credentials)`; carries the user name only.
    Authenticate(String),
    /// `exists(path)`
    Exists(String),
    /// `mkdir(path)`
    Mkdir(String),
    /// `list(dir)`
    List(String),
    /// `delete(path)`
    Delete(String),
    /// `upload(local, dir)`; carries the uploaded file name and target directory.
    Upload {
        /// File name of the uploaded local file.
        name: String,
        /// Target directory.
        dir: String,
    },
}

/// In-memory implementation of [`Transport`].
///
/// Directories and files live in maps keyed by full remote path. Clones share
/// state, so a test keeps one clone for assertions while the pipeline owns another.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    connected: bool,
    dirs: BTreeSet<String>,
    files: BTreeMap<String, u64>,
    calls: Vec<TransportCall>,
    fail_connect: bool,
    fail_auth: bool,
    fail_list: bool,
    fail_upload: bool,
    fail_deletes: HashSet<String>,
    stall_uploads: bool,
}

impl InMemoryTransport {
    /// Empty store with no directories.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with `dir` already present.
    pub fn with_dir(dir: &str) -> Self {
        let transport = Self::new();
        transport.lock().dirs.insert(dir.to_owned());
        transport
    }

    /// Place a file of `size_bytes` named `name` in `dir`, creating `dir` if needed.
    pub fn put(&self, dir: &str, name: &str, size_bytes: u64) {
        let mut inner = self.lock();
        inner.dirs.insert(dir.to_owned());
        inner.files.insert(remote_path(dir, name), size_bytes);
    }

    /// Sorted names of the files directly inside `dir`.
    pub fn names_in(&self, dir: &str) -> Vec<String> {
        entries_in(&self.lock(), dir)
            .into_iter()
            .map(|e| e.name)
            .collect()
    }

    /// Returns `true` if `dir` exists.
    pub fn has_dir(&self, dir: &str) -> bool {
        self.lock().dirs.contains(dir)
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock().calls.clone()
    }

    /// Names passed to `upload`, in order.
    pub fn uploads(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                TransportCall::Upload { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Paths passed to `delete`, in order.
    pub fn deletes(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                TransportCall::Delete(path) => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    /// Make `connect` fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.lock().fail_connect = fail;
    }

    /// Make `authenticate` fail.
    pub fn set_fail_auth(&self, fail: bool) {
        self.lock().fail_auth = fail;
    }

    /// Make `list` fail.
    pub fn set_fail_list(&self, fail: bool) {
        self.lock().fail_list = fail;
    }

    /// Make `upload` fail.
    pub fn set_fail_upload(&self, fail: bool) {
        self.lock().fail_upload = fail;
    }

    /// Make deleting the entry named `name` fail.
    pub fn fail_delete_of(&self, name: &str) {
        self.lock().fail_deletes.insert(name.to_owned());
    }

    /// Make `upload` never complete.
    pub fn set_stall_uploads(&self, stall: bool) {
        self.lock().stall_uploads = stall;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `call` and check the session is open.
    fn enter(&self, call: TransportCall) -> Result<MutexGuard<'_, Inner>, TransportError> {
        let mut inner = self.lock();
        inner.calls.push(call);
        if inner.connected {
            Ok(inner)
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

fn entries_in(inner: &Inner, dir: &str) -> Vec<RemoteEntry> {
    let prefix = remote_path(dir, "");
    inner
        .files
        .iter()
        .filter_map(|(path, size)| {
            let name = path.strip_prefix(&prefix)?;
            (!name.is_empty() && !name.contains('/')).then(|| RemoteEntry::new(name, *size))
        })
        .collect()
}

impl Transport for InMemoryTransport {
    async fn connect(&mut self, host: &str) -> Result<(), TransportError> {
        let mut inner = self.lock();
        inner.calls.push(TransportCall::Connect(host.to_owned()));
        if inner.fail_connect {
            return Err(TransportError::Connect {
                host: host.to_owned(),
                reason: "simulated connect failure".into(),
            });
        }
        inner.connected = true;
        Ok(())
    }

    async fn authenticate(&mut self, credentials: &Credentials) -> Result<(), TransportError> {
        let inner = self.enter(TransportCall::Authenticate(credentials.user.clone()))?;
        if inner.fail_auth {
            return Err(TransportError::Auth {
                user: credentials.user.clone(),
                reason: "simulated auth failure".into(),
            });
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, TransportError> {
        let inner = self.enter(TransportCall::Exists(path.to_owned()))?;
        Ok(inner.dirs.contains(path))
    }

    async fn mkdir(&self, path: &str) -> Result<(), TransportError> {
        let mut inner = self.enter(TransportCall::Mkdir(path.to_owned()))?;
        inner.dirs.insert(path.to_owned());
        Ok(())
    }

    async fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        let inner = self.enter(TransportCall::List(dir.to_owned()))?;
        if inner.fail_list {
            return Err(TransportError::Other("simulated list failure".into()));
        }
        if !inner.dirs.contains(dir) {
            return Err(TransportError::Other(format!("no such directory {dir}")));
        }
        Ok(entries_in(&inner, dir))
    }

    async fn delete(&self, path: &str) -> Result<(), TransportError> {
        let mut inner = self.enter(TransportCall::Delete(path.to_owned()))?;
        let name = path.rsplit_once('/').map_or(path, |(_, name)| name);
        if inner.fail_deletes.contains(name) {
            return Err(TransportError::Other(format!("simulated delete failure for {name}")));
        }
        match inner.files.remove(path) {
            Some(_) => Ok(()),
            None => Err(TransportError::Other(format!("no such file {path}"))),
        }
    }

    async fn upload(&self, local: &Path, remote_dir: &str) -> Result<(), TransportError> {
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TransportError::InvalidPath(local.display().to_string()))?;
        let stall = {
            let inner = self.enter(TransportCall::Upload {
                name: name.clone(),
                dir: remote_dir.to_owned(),
            })?;
            if inner.fail_upload {
                return Err(TransportError::Other("simulated upload failure".into()));
            }
            inner.stall_uploads
        };
        if stall {
            std::future::pending::<()>().await;
        }
        let size = tokio::fs::metadata(local)
            .await
            .map_err(|source| TransportError::Io {
                op: "upload",
                path: local.display().to_string(),
                source,
            })?
            .len();
        let mut inner = self.lock();
        if !inner.dirs.contains(remote_dir) {
            return Err(TransportError::Other(format!("no such directory {remote_dir}")));
        }
        inner.files.insert(remote_path(remote_dir, &name), size);
        Ok(())
    }
}
