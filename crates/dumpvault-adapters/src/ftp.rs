// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Remote store reached over plain FTP (passive mode, binary transfers).

use std::path::Path;

use dumpvault_core::config::Credentials;
use dumpvault_core::transport::{remote_path, RemoteEntry, Transport, TransportError};
use suppaftp::list::File;
use suppaftp::types::FileType;
use suppaftp::{AsyncFtpStream, FtpError};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::dir::{is_partial, PARTIAL_SUFFIX};

/// Control port used when `host` names none.
pub const DEFAULT_PORT: u16 = 21;

/// Login used when the configured user is empty.
const ANONYMOUS: &str = "anonymous";

struct Session {
    stream: AsyncFtpStream,
    /// Working directory right after login; `exists` returns here after each `CWD` check.
    home: String,
}

/// [`Transport`] over one FTP control connection.
///
/// Every primitive maps onto a single command (`MKD`, `LIST`, `DELE`, ...), except
/// `upload`, which sweeps stale partials, stores into `.<name>.partial` and renames
/// into place.
#[derive(Default)]
pub struct FtpTransport {
    session: Mutex<Option<Session>>,
}

impl std::fmt::Debug for FtpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpTransport").finish_non_exhaustive()
    }
}

impl FtpTransport {
    /// Unconnected transport.
    pub fn new() -> Self {
        Self::default()
    }
}

/// `host`, or `host:21` when no port is given.
fn address(host: &str) -> String {
    match host.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => host.to_owned(),
        _ => format!("{host}:{DEFAULT_PORT}"),
    }
}

fn refused<'a>(op: &'static str, path: &'a str) -> impl FnOnce(FtpError) -> TransportError + 'a {
    move |err| match err {
        FtpError::ConnectionError(source) => TransportError::Io {
            op,
            path: path.to_owned(),
            source,
        },
        other => TransportError::Refused {
            op,
            path: path.to_owned(),
            reason: other.to_string(),
        },
    }
}

/// Regular files from `LIST` output. Directories, links and lines the parser does
/// not recognise (`total 12`, banners) are skipped.
fn parse_listing(dir: &str, lines: &[String]) -> Vec<RemoteEntry> {
    lines
        .iter()
        .map(|line| line.trim_end())
        .filter(|line| !line.is_empty())
        .filter_map(|line| match line.parse::<File>() {
            Ok(file) if file.is_file() => Some(RemoteEntry::new(
                file.name(),
                u64::try_from(file.size()).unwrap_or(u64::MAX),
            )),
            Ok(_) => None,
            Err(err) => {
                debug!(dir, line, error = ?err, "skipping unrecognised listing line");
                None
            }
        })
        .collect()
}

impl Session {
    async fn list(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        let lines = self
            .stream
            .list(Some(dir))
            .await
            .map_err(refused("list", dir))?;
        Ok(parse_listing(dir, &lines))
    }

    async fn sweep_partials(&mut self, dir: &str) -> Result<(), TransportError> {
        for entry in self.list(dir).await? {
            if !is_partial(&entry.name) {
                continue;
            }
            let path = remote_path(dir, &entry.name);
            match self.stream.rm(path.as_str()).await {
                Ok(()) => debug!(path = %path, "removed stale partial upload"),
                Err(err) => warn!(path = %path, %err, "cannot remove stale partial upload"),
            }
        }
        Ok(())
    }
}

impl Transport for FtpTransport {
    async fn connect(&mut self, host: &str) -> Result<(), TransportError> {
        let addr = address(host);
        let stream = AsyncFtpStream::connect(addr.as_str())
            .await
            .map_err(|err| TransportError::Connect {
                host: host.to_owned(),
                reason: err.to_string(),
            })?;
        debug!(%addr, "ftp control connection open");
        *self.session.get_mut() = Some(Session {
            stream,
            home: String::from("/"),
        });
        Ok(())
    }

    async fn authenticate(&mut self, credentials: &Credentials) -> Result<(), TransportError> {
        let session = self
            .session
            .get_mut()
            .as_mut()
            .ok_or(TransportError::NotConnected)?;
        let user = if credentials.user.is_empty() {
            ANONYMOUS
        } else {
            credentials.user.as_str()
        };
        session
            .stream
            .login(user, credentials.password.as_str())
            .await
            .map_err(|err| TransportError::Auth {
                user: user.to_owned(),
                reason: err.to_string(),
            })?;
        session
            .stream
            .transfer_type(FileType::Binary)
            .await
            .map_err(refused("type", ""))?;
        session.home = session.stream.pwd().await.map_err(refused("pwd", ""))?;
        debug!(user, home = %session.home, "ftp session authenticated");
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, TransportError> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(TransportError::NotConnected)?;
        match session.stream.cwd(path).await {
            Ok(()) => {
                session
                    .stream
                    .cwd(session.home.as_str())
                    .await
                    .map_err(refused("exists", path))?;
                Ok(true)
            }
            Err(FtpError::UnexpectedResponse(_)) => Ok(false),
            Err(err) => Err(refused("exists", path)(err)),
        }
    }

    async fn mkdir(&self, path: &str) -> Result<(), TransportError> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(TransportError::NotConnected)?;
        session
            .stream
            .mkdir(path)
            .await
            .map_err(refused("mkdir", path))
    }

    async fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(TransportError::NotConnected)?;
        session.list(dir).await
    }

    async fn delete(&self, path: &str) -> Result<(), TransportError> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(TransportError::NotConnected)?;
        session
            .stream
            .rm(path)
            .await
            .map_err(refused("delete", path))
    }

    async fn upload(&self, local: &Path, remote_dir: &str) -> Result<(), TransportError> {
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TransportError::InvalidPath(local.display().to_string()))?;
        let bytes = tokio::fs::read(local)
            .await
            .map_err(|source| TransportError::Io {
                op: "upload",
                path: local.display().to_string(),
                source,
            })?;
        let target = remote_path(remote_dir, &name);
        let partial = remote_path(remote_dir, &format!(".{name}{PARTIAL_SUFFIX}"));

        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(TransportError::NotConnected)?;
        session.sweep_partials(remote_dir).await?;

        let mut reader = bytes.as_slice();
        let stored = match session.stream.put_file(partial.as_str(), &mut reader).await {
            Ok(sent) => {
                debug!(path = %partial, bytes = sent, "stored");
                session
                    .stream
                    .rename(partial.as_str(), target.as_str())
                    .await
                    .map_err(refused("upload", &target))
            }
            Err(err) => Err(refused("upload", &partial)(err)),
        };
        if stored.is_err() {
            if let Err(err) = session.stream.rm(partial.as_str()).await {
                debug!(path = %partial, %err, "no partial upload to remove");
            }
        }
        stored
    }
}
