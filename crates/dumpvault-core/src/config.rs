// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Job configuration: storage port, serde shape, and one-shot validation.
//!
//! The on-disk document is [`RawJobConfig`], where every field is optional so that a
//! missing value can be reported by name. [`RawJobConfig::validate`] turns it into a
//! [`JobConfig`] exactly once at startup; nothing downstream ever falls back to a
//! default on its own.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use time::macros::format_description;
use time::UtcOffset;

use crate::name::NameCodec;
use crate::retention::RetentionPolicy;

/// Key under which the job document is stored.
pub const JOB_CONFIG_KEY: &str = "job";
/// Default storage ceiling: 100 MiB.
pub const DEFAULT_QUOTA_BYTES: u64 = 104_857_600;
/// Default scratch workspace, relative to the working directory.
pub const DEFAULT_LOCAL_DIR: &str = "temp";
/// Default archive extension.
pub const DEFAULT_ARCHIVE_EXT: &str = "zip";
/// Default offset for archive names.
pub const DEFAULT_UTC_OFFSET: &str = "+00:00";
/// Default per-operation timeout.
pub const DEFAULT_OPERATION_SECS: u64 = 60;
/// Default whole-run deadline.
pub const DEFAULT_RUN_DEADLINE_SECS: u64 = 3600;

/// Storage port for raw config blobs (keyed by logical name).
pub trait ConfigStore {
    /// Load a raw config blob. Returns `NotFound` when missing.
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Persist a raw config blob.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Error type for config operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Key not present in store.
    #[error("not found")]
    NotFound,
    /// I/O error while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization/deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// A required field is absent or blank.
    #[error("missing required field `{0}`")]
    Missing(&'static str),
    /// A field is present but unusable.
    #[error("invalid `{field}`: {reason}")]
    Invalid {
        /// Dotted field path.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },
    /// Catch-all error variant.
    #[error("other: {0}")]
    Other(String),
}

/// Thin service that serializes config values and delegates storage to a `ConfigStore`.
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Create a new service using the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Consume the service and return the inner store.
    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S> ConfigService<S>
where
    S: ConfigStore,
{
    /// Load and deserialize a config value for `key`. Returns `Ok(None)` if missing.
    pub fn load<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: DeserializeOwned,
    {
        match self.store.load_raw(key) {
            Ok(bytes) => {
                if bytes.is_empty() {
                    return Ok(None);
                }
                let value = serde_json::from_slice(&bytes)?;
                Ok(Some(value))
            }
            Err(ConfigError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Serialize and persist a config value for `key`.
    pub fn save<T>(&self, key: &str, value: &T) -> Result<(), ConfigError>
    where
        T: Serialize,
    {
        let data = serde_json::to_vec_pretty(value)?;
        self.store.save_raw(key, &data)
    }

    /// Load the job document and validate it. A missing document is an error here.
    pub fn load_job(&self) -> Result<JobConfig, ConfigError> {
        self.load::<RawJobConfig>(JOB_CONFIG_KEY)?
            .ok_or(ConfigError::NotFound)?
            .validate()
    }
}

/// User name and password for one endpoint.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Login name.
    pub user: String,
    /// Secret. Never rendered by `Debug`.
    pub password: String,
}

impl Credentials {
    /// Convenience constructor.
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &redacted(&self.password))
            .finish()
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<empty>"
    } else {
        "<redacted>"
    }
}

/// Connection info for the dump producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSource {
    /// Database host.
    pub host: String,
    /// Login for the dump producer.
    pub credentials: Credentials,
}

/// Transport backends known to the binary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteBackend {
    /// A mounted directory (local disk, NFS, SMB); `host` is its root path.
    #[default]
    Dir,
    /// A plain FTP server in passive mode; `host` is `name` or `name:port`.
    Ftp,
}

/// Connection info for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    /// Which adapter to build.
    pub backend: RemoteBackend,
    /// Host, `host:port` for [`RemoteBackend::Ftp`] or root path for [`RemoteBackend::Dir`].
    pub host: String,
    /// Login for the store.
    pub credentials: Credentials,
}

/// Time budgets applied by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Budget for each individual remote operation.
    pub operation: Duration,
    /// Budget for the whole run, all stages included.
    pub run_deadline: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            operation: Duration::from_secs(DEFAULT_OPERATION_SECS),
            run_deadline: Duration::from_secs(DEFAULT_RUN_DEADLINE_SECS),
        }
    }
}

/// External command template.
///
/// Arguments and environment values may contain `{placeholder}` tokens that the
/// adapter substitutes at run time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandSpec {
    /// Executable name or path.
    pub program: String,
    /// Argument templates.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment templates added to the child process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    /// `mysqldump` writing one database to stdout; the password travels via `MYSQL_PWD`.
    pub fn mysqldump() -> Self {
        Self {
            program: "mysqldump".into(),
            args: vec![
                "--host={host}".into(),
                "--user={user}".into(),
                "--single-transaction".into(),
                "--routines".into(),
                "{source}".into(),
            ],
            env: BTreeMap::from([("MYSQL_PWD".to_owned(), "{password}".to_owned())]),
        }
    }

    /// `zip` bundling every dump into the archive without directory prefixes.
    pub fn zip() -> Self {
        Self {
            program: "zip".into(),
            args: vec![
                "-j".into(),
                "-q".into(),
                "{archive}".into(),
                "{inputs}".into(),
            ],
            env: BTreeMap::new(),
        }
    }

    fn check(&self, field: &'static str) -> Result<(), ConfigError> {
        if self.program.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field,
                reason: "program must not be empty".into(),
            });
        }
        Ok(())
    }
}

/// Validated job configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConfig {
    /// Dump producer connection.
    pub data_source: DataSource,
    /// Sources to dump, in configured order, without duplicates.
    pub data_source_names: Vec<String>,
    /// Transport connection.
    pub remote: Remote,
    /// Target directory on the remote store.
    pub remote_dir: String,
    /// Scratch workspace, exclusively owned by one run.
    pub local_dir: PathBuf,
    /// Storage ceiling for `remote_dir`.
    pub quota_bytes: u64,
    /// Archive extension without the leading dot.
    pub archive_ext: String,
    /// Offset used to render archive names.
    pub utc_offset: UtcOffset,
    /// Time budgets.
    pub timeouts: Timeouts,
    /// Dump command template.
    pub dumper: CommandSpec,
    /// Archive command template.
    pub archiver: CommandSpec,
}

impl JobConfig {
    /// Name codec for this deployment.
    pub fn name_codec(&self) -> NameCodec {
        NameCodec::new(self.utc_offset, self.archive_ext.clone())
    }

    /// Retention policy for this deployment.
    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy::new(self.quota_bytes)
    }
}

/// Endpoint block as written in the config document.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEndpoint {
    /// Host name, address, or root path.
    pub host: Option<String>,
    /// Login name.
    pub user: Option<String>,
    /// Secret.
    pub password: Option<String>,
}

impl std::fmt::Debug for RawEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawEndpoint")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &self.password.as_deref().map(redacted))
            .finish()
    }
}

/// Remote block as written in the config document.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRemote {
    /// Backend selector; defaults to `dir`.
    pub backend: Option<RemoteBackend>,
    /// Host name, address, or root path.
    pub host: Option<String>,
    /// Login name.
    pub user: Option<String>,
    /// Secret.
    pub password: Option<String>,
}

impl std::fmt::Debug for RawRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawRemote")
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &self.password.as_deref().map(redacted))
            .finish()
    }
}

/// Timeout block as written in the config document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTimeouts {
    /// Per remote operation, in seconds.
    pub operation_secs: Option<u64>,
    /// Whole run, in seconds.
    pub run_deadline_secs: Option<u64>,
}

/// The config document as stored. Unknown fields are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawJobConfig {
    /// Dump producer connection.
    pub data_source: Option<RawEndpoint>,
    /// Sources to dump.
    #[serde(default)]
    pub data_source_names: Vec<String>,
    /// Transport connection.
    pub remote: Option<RawRemote>,
    /// Target directory on the remote store.
    pub remote_dir: Option<String>,
    /// Scratch workspace.
    pub local_dir: Option<PathBuf>,
    /// Storage ceiling in bytes.
    pub quota_bytes: Option<u64>,
    /// Archive extension.
    pub archive_ext: Option<String>,
    /// Offset for archive names, `±HH:MM`.
    pub utc_offset: Option<String>,
    /// Time budgets.
    pub timeouts: Option<RawTimeouts>,
    /// Dump command template.
    pub dumper: Option<CommandSpec>,
    /// Archive command template.
    pub archiver: Option<CommandSpec>,
}

impl RawJobConfig {
    /// Fully populated example document, written by `dumpvault init-config`.
    pub fn template() -> Self {
        Self {
            data_source: Some(RawEndpoint {
                host: Some("127.0.0.1".into()),
                user: Some("backup".into()),
                password: Some(String::new()),
            }),
            data_source_names: vec!["database1".into(), "database2".into()],
            remote: Some(RawRemote {
                backend: Some(RemoteBackend::Dir),
                host: Some("/mnt/backups".into()),
                user: Some(String::new()),
                password: Some(String::new()),
            }),
            remote_dir: Some("remote-folder-name".into()),
            local_dir: Some(PathBuf::from(DEFAULT_LOCAL_DIR)),
            quota_bytes: Some(DEFAULT_QUOTA_BYTES),
            archive_ext: Some(DEFAULT_ARCHIVE_EXT.into()),
            utc_offset: Some(DEFAULT_UTC_OFFSET.into()),
            timeouts: Some(RawTimeouts {
                operation_secs: Some(DEFAULT_OPERATION_SECS),
                run_deadline_secs: Some(DEFAULT_RUN_DEADLINE_SECS),
            }),
            dumper: Some(CommandSpec::mysqldump()),
            archiver: Some(CommandSpec::zip()),
        }
    }

    /// Check every field once and apply documented defaults.
    pub fn validate(self) -> Result<JobConfig, ConfigError> {
        let source = self
            .data_source
            .ok_or(ConfigError::Missing("data_source"))?;
        let data_source = DataSource {
            host: required(source.host, "data_source.host")?,
            credentials: Credentials {
                user: required(source.user, "data_source.user")?,
                password: source.password.unwrap_or_default(),
            },
        };

        let remote = self.remote.ok_or(ConfigError::Missing("remote"))?;
        let remote = Remote {
            backend: remote.backend.unwrap_or_default(),
            host: required(remote.host, "remote.host")?,
            credentials: Credentials {
                user: remote.user.unwrap_or_default(),
                password: remote.password.unwrap_or_default(),
            },
        };

        let local_dir = self
            .local_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_DIR));
        if local_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "local_dir",
                reason: "must not be empty".into(),
            });
        }

        let timeouts = self.timeouts.unwrap_or_default();
        let timeouts = Timeouts {
            operation: seconds(
                timeouts.operation_secs,
                DEFAULT_OPERATION_SECS,
                "timeouts.operation_secs",
            )?,
            run_deadline: seconds(
                timeouts.run_deadline_secs,
                DEFAULT_RUN_DEADLINE_SECS,
                "timeouts.run_deadline_secs",
            )?,
        };

        let dumper = self.dumper.unwrap_or_else(CommandSpec::mysqldump);
        dumper.check("dumper.program")?;
        let archiver = self.archiver.unwrap_or_else(CommandSpec::zip);
        archiver.check("archiver.program")?;

        Ok(JobConfig {
            data_source,
            data_source_names: source_names(self.data_source_names)?,
            remote,
            remote_dir: required(self.remote_dir, "remote_dir")?,
            local_dir,
            quota_bytes: self.quota_bytes.unwrap_or(DEFAULT_QUOTA_BYTES),
            archive_ext: extension(
                self.archive_ext
                    .unwrap_or_else(|| DEFAULT_ARCHIVE_EXT.to_owned()),
            )?,
            utc_offset: offset(self.utc_offset.as_deref().unwrap_or(DEFAULT_UTC_OFFSET))?,
            timeouts,
            dumper,
            archiver,
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(field)),
    }
}

fn seconds(value: Option<u64>, default: u64, field: &'static str) -> Result<Duration, ConfigError> {
    match value.unwrap_or(default) {
        0 => Err(ConfigError::Invalid {
            field,
            reason: "must be at least one second".into(),
        }),
        secs => Ok(Duration::from_secs(secs)),
    }
}

fn source_names(names: Vec<String>) -> Result<Vec<String>, ConfigError> {
    let mut seen = HashSet::new();
    for name in &names {
        if name.trim().is_empty() || name.contains(['/', '\\']) || name == ".." || name == "." {
            return Err(ConfigError::Invalid {
                field: "data_source_names",
                reason: format!("{name:?} is not usable as a file name"),
            });
        }
        if !seen.insert(name.as_str()) {
            return Err(ConfigError::Invalid {
                field: "data_source_names",
                reason: format!("{name:?} is listed twice"),
            });
        }
    }
    Ok(names)
}

fn extension(ext: String) -> Result<String, ConfigError> {
    let well_formed = !ext.is_empty()
        && ext.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'.')
        && !ext.starts_with('.')
        && !ext.ends_with('.')
        && !ext.contains("..");
    if well_formed {
        Ok(ext)
    } else {
        Err(ConfigError::Invalid {
            field: "archive_ext",
            reason: format!("{ext:?} must be dot-separated ASCII alphanumerics"),
        })
    }
}

fn offset(raw: &str) -> Result<UtcOffset, ConfigError> {
    UtcOffset::parse(
        raw,
        format_description!("[offset_hour sign:mandatory]:[offset_minute]"),
    )
    .map_err(|e| ConfigError::Invalid {
        field: "utc_offset",
        reason: format!("{raw:?}: {e}"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn minimal() -> RawJobConfig {
        serde_json::from_str(
            r#"{
                "data_source": { "host": "127.0.0.1", "user": "backup" },
                "data_source_names": ["shop", "blog"],
                "remote": { "host": "/mnt/backups" },
                "remote_dir": "site"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn minimal_document_gets_documented_defaults() {
        let job = minimal().validate().unwrap();
        assert_eq!(job.local_dir, PathBuf::from("temp"));
        assert_eq!(job.quota_bytes, 104_857_600);
        assert_eq!(job.archive_ext, "zip");
        assert_eq!(job.utc_offset, UtcOffset::UTC);
        assert_eq!(job.remote.backend, RemoteBackend::Dir);
        assert_eq!(job.timeouts, Timeouts::default());
        assert_eq!(job.dumper, CommandSpec::mysqldump());
        assert_eq!(job.archiver, CommandSpec::zip());
        assert_eq!(job.data_source_names, ["shop", "blog"]);
        assert_eq!(job.data_source.credentials.password, "");
    }

    #[test]
    fn ftp_backend_keeps_remote_credentials() {
        let raw: RawJobConfig = serde_json::from_str(
            r#"{
                "data_source": { "host": "127.0.0.1", "user": "backup" },
                "remote": { "backend": "ftp", "host": "ftp.example:2121", "user": "up", "password": "pw" },
                "remote_dir": "site"
            }"#,
        )
        .unwrap();
        let job = raw.validate().unwrap();
        assert_eq!(job.remote.backend, RemoteBackend::Ftp);
        assert_eq!(job.remote.host, "ftp.example:2121");
        assert_eq!(job.remote.credentials, Credentials::new("up", "pw"));
    }

    #[test]
    fn template_validates() {
        let job = RawJobConfig::template().validate().unwrap();
        assert_eq!(job.remote_dir, "remote-folder-name");
    }

    #[test]
    fn missing_required_fields_are_named() {
        let mut raw = minimal();
        raw.remote_dir = None;
        assert!(matches!(
            raw.validate(),
            Err(ConfigError::Missing("remote_dir"))
        ));

        let mut raw = minimal();
        raw.remote = Some(RawRemote::default());
        assert!(matches!(
            raw.validate(),
            Err(ConfigError::Missing("remote.host"))
        ));

        let mut raw = minimal();
        raw.data_source = Some(RawEndpoint {
            host: Some("   ".into()),
            ..RawEndpoint::default()
        });
        assert!(matches!(
            raw.validate(),
            Err(ConfigError::Missing("data_source.host"))
        ));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let parsed: Result<RawJobConfig, _> =
            serde_json::from_str(r#"{ "max_backup_size": 4 }"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn duplicate_and_path_like_sources_are_rejected() {
        let mut raw = minimal();
        raw.data_source_names = vec!["shop".into(), "shop".into()];
        assert!(matches!(
            raw.validate(),
            Err(ConfigError::Invalid {
                field: "data_source_names",
                ..
            })
        ));

        let mut raw = minimal();
        raw.data_source_names = vec!["../etc".into()];
        assert!(raw.validate().is_err());
    }

    #[test]
    fn offset_and_extension_are_checked() {
        let mut raw = minimal();
        raw.utc_offset = Some("+02:00".into());
        raw.archive_ext = Some("tar.gz".into());
        let job = raw.validate().unwrap();
        assert_eq!(job.utc_offset, UtcOffset::from_hms(2, 0, 0).unwrap());
        assert_eq!(job.name_codec().extension(), "tar.gz");

        let mut raw = minimal();
        raw.utc_offset = Some("2h".into());
        assert!(matches!(
            raw.validate(),
            Err(ConfigError::Invalid {
                field: "utc_offset",
                ..
            })
        ));

        for bad in ["", ".zip", "zip.", "z..ip", "zi p", "zip/x"] {
            let mut raw = minimal();
            raw.archive_ext = Some(bad.into());
            assert!(raw.validate().is_err(), "{bad:?} must be rejected");
        }
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let mut raw = minimal();
        raw.timeouts = Some(RawTimeouts {
            operation_secs: Some(0),
            run_deadline_secs: None,
        });
        assert!(matches!(
            raw.validate(),
            Err(ConfigError::Invalid {
                field: "timeouts.operation_secs",
                ..
            })
        ));
    }

    #[test]
    fn debug_output_never_contains_passwords() {
        let creds = Credentials::new("backup", "hunter2");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("backup"));
        assert!(!rendered.contains("hunter2"));

        let mut raw = minimal();
        raw.remote = Some(RawRemote {
            host: Some("/mnt".into()),
            password: Some("hunter2".into()),
            ..RawRemote::default()
        });
        assert!(!format!("{raw:?}").contains("hunter2"));
    }
}
