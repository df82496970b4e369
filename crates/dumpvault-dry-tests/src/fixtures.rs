// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Job configs and fixed clocks.

use std::path::Path;
use std::time::Duration;

use dumpvault_core::config::{
    CommandSpec, Credentials, DataSource, JobConfig, RawJobConfig, Remote, RemoteBackend,
    Timeouts,
};
use time::macros::datetime;
use time::{OffsetDateTime, UtcOffset};

/// Archive name produced by [`march_first_2024`] with the default codec.
pub const FIXED_ARCHIVE_NAME: &str = "db_2024-03-01_153045.zip";

/// Fixed clock: 2024-03-01 15:30:45 UTC.
pub fn march_first_2024() -> OffsetDateTime {
    datetime!(2024-03-01 15:30:45 UTC)
}

/// Validated job dumping `sources` into `local_dir` and shipping to `backups`.
pub fn job_config(local_dir: &Path, sources: &[&str], quota_bytes: u64) -> JobConfig {
    JobConfig {
        data_source: DataSource {
            host: "127.0.0.1".into(),
            credentials: Credentials::new("backup", "secret"),
        },
        data_source_names: sources.iter().map(|s| (*s).to_owned()).collect(),
        remote: Remote {
            backend: RemoteBackend::Dir,
            host: "store.example".into(),
            credentials: Credentials::new("uploader", "hunter2"),
        },
        remote_dir: "backups".into(),
        local_dir: local_dir.to_path_buf(),
        quota_bytes,
        archive_ext: "zip".into(),
        utc_offset: UtcOffset::UTC,
        timeouts: Timeouts {
            operation: Duration::from_secs(5),
            run_deadline: Duration::from_secs(60),
        },
        dumper: CommandSpec::mysqldump(),
        archiver: CommandSpec::zip(),
    }
}

/// Template document pointed at `local_dir`.
pub fn raw_job_config(local_dir: &Path) -> RawJobConfig {
    RawJobConfig {
        local_dir: Some(local_dir.to_path_buf()),
        ..RawJobConfig::template()
    }
}
