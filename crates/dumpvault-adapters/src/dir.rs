// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Remote store backed by a mounted directory (local disk, NFS, SMB).

use std::io;
use std::path::{Component, Path, PathBuf};

use dumpvault_core::config::Credentials;
use dumpvault_core::transport::{RemoteEntry, Transport, TransportError};
use tracing::{debug, warn};

/// Suffix of in-flight upload files, stored as `.<name>.partial`.
///
/// Partials are listed like any other entry, so one left by a crashed upload
/// counts toward usage as an undatable entry until the next upload into the same
/// directory sweeps it.
pub const PARTIAL_SUFFIX: &str = ".partial";

pub(crate) fn is_partial(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX)
}

/// [`Transport`] over a directory tree. `connect(host)` treats `host` as the root.
#[derive(Debug, Default)]
pub struct DirTransport {
    root: Option<PathBuf>,
}

impl DirTransport {
    /// Unconnected transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Root chosen by `connect`, if any.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Map a remote path onto the root. Leading `/` is relative to the root; `..` is refused.
    fn resolve(&self, path: &str) -> Result<PathBuf, TransportError> {
        let root = self.root.as_ref().ok_or(TransportError::NotConnected)?;
        let relative = Path::new(path.trim_start_matches('/'));
        let mut resolved = root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return Err(TransportError::InvalidPath(path.to_owned())),
            }
        }
        Ok(resolved)
    }
}

fn io_err<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> TransportError + 'a {
    move |source| TransportError::Io {
        op,
        path: path.display().to_string(),
        source,
    }
}

impl Transport for DirTransport {
    async fn connect(&mut self, host: &str) -> Result<(), TransportError> {
        let root = PathBuf::from(host);
        match tokio::fs::metadata(&root).await {
            Ok(meta) if meta.is_dir() => {
                debug!(root = %root.display(), "directory store opened");
                self.root = Some(root);
                Ok(())
            }
            Ok(_) => Err(TransportError::Connect {
                host: host.to_owned(),
                reason: "not a directory".into(),
            }),
            Err(err) => Err(TransportError::Connect {
                host: host.to_owned(),
                reason: err.to_string(),
            }),
        }
    }

    async fn authenticate(&mut self, credentials: &Credentials) -> Result<(), TransportError> {
        if self.root.is_none() {
            return Err(TransportError::NotConnected);
        }
        if !credentials.user.is_empty() {
            debug!(user = %credentials.user, "directory store ignores credentials");
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, TransportError> {
        let target = self.resolve(path)?;
        match tokio::fs::metadata(&target).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_err("exists", &target)(err)),
        }
    }

    async fn mkdir(&self, path: &str) -> Result<(), TransportError> {
        let target = self.resolve(path)?;
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(io_err("mkdir", &target))
    }

    async fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        let target = self.resolve(dir)?;
        let mut entries = tokio::fs::read_dir(&target)
            .await
            .map_err(io_err("list", &target))?;
        let mut listed = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(io_err("list", &target))?
        {
            let meta = entry.metadata().await.map_err(io_err("list", &target))?;
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            listed.push(RemoteEntry::new(name, meta.len()));
        }
        Ok(listed)
    }

    async fn delete(&self, path: &str) -> Result<(), TransportError> {
        let target = self.resolve(path)?;
        tokio::fs::remove_file(&target)
            .await
            .map_err(io_err("delete", &target))
    }

    async fn upload(&self, local: &Path, remote_dir: &str) -> Result<(), TransportError> {
        let name = local
            .file_name()
            .ok_or_else(|| TransportError::InvalidPath(local.display().to_string()))?;
        let dir = self.resolve(remote_dir)?;
        let target = dir.join(name);
        let mut partial_name = std::ffi::OsString::from(".");
        partial_name.push(name);
        partial_name.push(PARTIAL_SUFFIX);
        let partial = dir.join(partial_name);
        sweep_partials(&dir).await?;

        let copied = match tokio::fs::copy(local, &partial).await {
            Ok(_) => tokio::fs::rename(&partial, &target)
                .await
                .map_err(io_err("upload", &target)),
            Err(err) => Err(io_err("upload", local)(err)),
        };
        if copied.is_err() {
            if let Err(err) = tokio::fs::remove_file(&partial).await {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!(path = %partial.display(), %err, "partial upload left behind");
                }
            }
        }
        copied
    }
}

/// Remove partials left in `dir` by interrupted uploads.
async fn sweep_partials(dir: &Path) -> Result<(), TransportError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(io_err("upload", dir))?;
    while let Some(entry) = entries.next_entry().await.map_err(io_err("upload", dir))? {
        let name = entry.file_name();
        if !is_partial(&name.to_string_lossy()) {
            continue;
        }
        let path = entry.path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "removed stale partial upload"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %path.display(), %err, "cannot remove stale partial upload"),
        }
    }
    Ok(())
}
