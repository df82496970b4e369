// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs, clippy::unwrap_used)]
use std::path::Path;
use std::time::Duration;

use dumpvault_core::{
    FailureCause, JobConfig, PlanStatus, Pipeline, RunError, Stage, StopSignal, TransportError,
};
use dumpvault_dry_tests::{
    job_config, march_first_2024, FakeArchiver, FakeDumper, InMemoryTransport, TransportCall,
    FIXED_ARCHIVE_NAME,
};
use time::macros::datetime;
use time::OffsetDateTime;

/// `"-- dump of db1\n"`
const DB1_ARCHIVE_BYTES: u64 = 15;

struct Harness {
    transport: InMemoryTransport,
    dumper: FakeDumper,
    archiver: FakeArchiver,
}

impl Harness {
    fn new(transport: InMemoryTransport) -> Self {
        Self {
            transport,
            dumper: FakeDumper::new(),
            archiver: FakeArchiver::new(),
        }
    }

    fn pipeline(&self, job: JobConfig) -> Pipeline<InMemoryTransport, FakeDumper, FakeArchiver> {
        Pipeline::new(
            job,
            self.transport.clone(),
            self.dumper.clone(),
            self.archiver.clone(),
        )
        .with_clock(march_first_2024)
    }
}

fn local_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn april_first_2024() -> OffsetDateTime {
    datetime!(2024-04-01 08:00:00 UTC)
}

#[tokio::test]
async fn first_run_creates_remote_dir_and_ships_archive() {
    let work = tempfile::tempdir().unwrap();
    let harness = Harness::new(InMemoryTransport::new());
    let job = job_config(work.path(), &["db1", "db2"], 1_000);

    let report = harness.pipeline(job).run().await.unwrap();

    assert_eq!(report.archive.as_deref(), Some(FIXED_ARCHIVE_NAME));
    assert_eq!(report.uploaded, vec![FIXED_ARCHIVE_NAME.to_owned()]);
    assert!(report.deleted.is_empty());
    assert_eq!(report.plan.status, PlanStatus::NotNeeded);
    assert!(harness.transport.has_dir("backups"));
    assert_eq!(
        harness.transport.names_in("backups"),
        vec![FIXED_ARCHIVE_NAME.to_owned()]
    );
    assert!(local_files(work.path()).is_empty());

    let calls = harness.transport.calls();
    assert_eq!(calls[0], TransportCall::Connect("store.example".into()));
    assert_eq!(calls[1], TransportCall::Authenticate("uploader".into()));
    assert!(calls.contains(&TransportCall::Mkdir("backups".into())));
    assert!(matches!(calls.last(), Some(TransportCall::Upload { .. })));

    let (archive, inputs) = harness.archiver.packaged().remove(0);
    assert_eq!(archive, work.path().join(FIXED_ARCHIVE_NAME));
    assert_eq!(
        inputs,
        vec![
            work.path().join("db1_dump.sql"),
            work.path().join("db2_dump.sql")
        ]
    );
}

#[tokio::test]
async fn oldest_archive_is_evicted_before_upload() {
    let work = tempfile::tempdir().unwrap();
    let transport = InMemoryTransport::new();
    transport.put("backups", "db_2023-02-01_000000.zip", 40);
    transport.put("backups", "db_2023-01-01_000000.zip", 50);
    let harness = Harness::new(transport);

    let report = harness
        .pipeline(job_config(work.path(), &["db1"], 100))
        .run()
        .await
        .unwrap();

    assert_eq!(report.archive_bytes, DB1_ARCHIVE_BYTES);
    assert_eq!(report.plan.status, PlanStatus::Satisfied);
    assert_eq!(report.deleted, vec!["db_2023-01-01_000000.zip".to_owned()]);
    assert_eq!(
        harness.transport.names_in("backups"),
        vec![
            "db_2023-02-01_000000.zip".to_owned(),
            FIXED_ARCHIVE_NAME.to_owned()
        ]
    );

    let calls = harness.transport.calls();
    let delete_at = calls
        .iter()
        .position(|c| matches!(c, TransportCall::Delete(_)))
        .unwrap();
    let upload_at = calls
        .iter()
        .position(|c| matches!(c, TransportCall::Upload { .. }))
        .unwrap();
    assert!(delete_at < upload_at);
}

#[tokio::test]
async fn failed_deletion_is_skipped_and_upload_proceeds() {
    let work = tempfile::tempdir().unwrap();
    let transport = InMemoryTransport::new();
    transport.put("backups", "db_2023-01-01_000000.zip", 50);
    transport.put("backups", "db_2023-02-01_000000.zip", 50);
    transport.put("backups", "db_2023-03-01_000000.zip", 50);
    transport.fail_delete_of("db_2023-01-01_000000.zip");
    let harness = Harness::new(transport);

    let report = harness
        .pipeline(job_config(work.path(), &["db1"], 70))
        .run()
        .await
        .unwrap();

    assert_eq!(
        report.plan.names,
        vec![
            "db_2023-01-01_000000.zip".to_owned(),
            "db_2023-02-01_000000.zip".to_owned()
        ]
    );
    assert_eq!(
        report.failed_deletions,
        vec!["db_2023-01-01_000000.zip".to_owned()]
    );
    assert_eq!(report.deleted, vec!["db_2023-02-01_000000.zip".to_owned()]);
    assert_eq!(report.uploaded, vec![FIXED_ARCHIVE_NAME.to_owned()]);
}

#[tokio::test]
async fn exhausted_retention_still_uploads() {
    let work = tempfile::tempdir().unwrap();
    let transport = InMemoryTransport::new();
    transport.put("backups", "db_2023-01-01_000000.zip", 5);
    let harness = Harness::new(transport);

    let report = harness
        .pipeline(job_config(work.path(), &["db1"], 10))
        .run()
        .await
        .unwrap();

    assert!(report.retention_exhausted());
    assert_eq!(
        report.plan.status,
        PlanStatus::Exhausted {
            shortfall_bytes: DB1_ARCHIVE_BYTES - 10
        }
    );
    assert_eq!(report.deleted, vec!["db_2023-01-01_000000.zip".to_owned()]);
    assert_eq!(report.uploaded, vec![FIXED_ARCHIVE_NAME.to_owned()]);
}

#[tokio::test]
async fn undatable_entries_are_never_deleted() {
    let work = tempfile::tempdir().unwrap();
    let transport = InMemoryTransport::new();
    transport.put("backups", "notes.txt", 500);
    transport.put("backups", "backup_old.zip", 500);
    let harness = Harness::new(transport);

    let report = harness
        .pipeline(job_config(work.path(), &["db1"], 100))
        .run()
        .await
        .unwrap();

    assert!(report.retention_exhausted());
    assert_eq!(report.undated_entries, 2);
    assert!(harness.transport.deletes().is_empty());
    assert_eq!(report.uploaded, vec![FIXED_ARCHIVE_NAME.to_owned()]);
}

#[tokio::test]
async fn remote_copy_of_the_same_archive_is_neither_counted_nor_evicted() {
    let work = tempfile::tempdir().unwrap();
    let transport = InMemoryTransport::new();
    transport.put("backups", FIXED_ARCHIVE_NAME, 5_000);
    let harness = Harness::new(transport);

    let report = harness
        .pipeline(job_config(work.path(), &["db1"], 100))
        .run()
        .await
        .unwrap();

    assert_eq!(report.plan.status, PlanStatus::NotNeeded);
    assert!(harness.transport.deletes().is_empty());
    assert_eq!(report.uploaded, vec![FIXED_ARCHIVE_NAME.to_owned()]);
}

#[tokio::test]
async fn dump_failure_stops_before_packaging_and_removes_dumps() {
    let work = tempfile::tempdir().unwrap();
    let harness = Harness::new(InMemoryTransport::new());
    harness.dumper.fail_source("db2");

    let err = harness
        .pipeline(job_config(work.path(), &["db1", "db2"], 1_000))
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Dumped);
    assert_eq!(err.exit_code(), 4);
    assert!(matches!(err.cause, FailureCause::Dump(_)));
    assert!(harness.archiver.packaged().is_empty());
    assert!(harness.transport.uploads().is_empty());
    assert!(local_files(work.path()).is_empty());
}

#[tokio::test]
async fn archiver_failure_leaves_no_partial_archive() {
    let work = tempfile::tempdir().unwrap();
    let harness = Harness::new(InMemoryTransport::new());
    harness.archiver.set_fail(true);

    let err = harness
        .pipeline(job_config(work.path(), &["db1"], 1_000))
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Packaged);
    assert_eq!(err.exit_code(), 5);
    assert!(local_files(work.path()).is_empty());
    assert!(!harness
        .transport
        .calls()
        .iter()
        .any(|c| matches!(c, TransportCall::List(_))));
}

#[tokio::test]
async fn listing_failure_keeps_local_archive() {
    let work = tempfile::tempdir().unwrap();
    let transport = InMemoryTransport::with_dir("backups");
    transport.set_fail_list(true);
    let harness = Harness::new(transport);

    let err = harness
        .pipeline(job_config(work.path(), &["db1"], 1_000))
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::InventoryRead);
    assert_eq!(err.exit_code(), 6);
    assert!(harness.transport.deletes().is_empty());
    assert!(harness.transport.uploads().is_empty());
    assert_eq!(local_files(work.path()), vec![FIXED_ARCHIVE_NAME.to_owned()]);
}

#[tokio::test]
async fn archive_from_failed_upload_ships_with_the_next_run() {
    let work = tempfile::tempdir().unwrap();
    let transport = InMemoryTransport::with_dir("backups");
    transport.set_fail_upload(true);
    let harness = Harness::new(transport);

    let err = harness
        .pipeline(job_config(work.path(), &["db1"], 1_000))
        .run()
        .await
        .unwrap_err();
    assert_eq!(err.stage, Stage::Uploaded);
    assert_eq!(err.exit_code(), 8);
    assert_eq!(local_files(work.path()), vec![FIXED_ARCHIVE_NAME.to_owned()]);

    harness.transport.set_fail_upload(false);
    let report = harness
        .pipeline(job_config(work.path(), &["db1"], 1_000))
        .with_clock(april_first_2024)
        .run()
        .await
        .unwrap();

    assert_eq!(report.carried_over, vec![FIXED_ARCHIVE_NAME.to_owned()]);
    assert_eq!(
        report.uploaded,
        vec![
            FIXED_ARCHIVE_NAME.to_owned(),
            "db_2024-04-01_080000.zip".to_owned()
        ]
    );
    assert_eq!(report.plan.incoming_bytes, 2 * DB1_ARCHIVE_BYTES);
    assert!(local_files(work.path()).is_empty());
}

#[tokio::test]
async fn leftover_with_the_fresh_name_is_replaced_not_merged() {
    let work = tempfile::tempdir().unwrap();
    std::fs::write(work.path().join(FIXED_ARCHIVE_NAME), vec![b'x'; 100]).unwrap();
    let harness = Harness::new(InMemoryTransport::with_dir("backups"));

    let report = harness
        .pipeline(job_config(work.path(), &["db1"], 1_000))
        .run()
        .await
        .unwrap();

    assert!(report.carried_over.is_empty());
    assert_eq!(report.archive_bytes, DB1_ARCHIVE_BYTES);
    assert_eq!(report.uploaded, vec![FIXED_ARCHIVE_NAME.to_owned()]);
    assert_eq!(report.plan.incoming_bytes, DB1_ARCHIVE_BYTES);
    assert!(local_files(work.path()).is_empty());
}

#[tokio::test]
async fn stale_workspace_files_are_cleared() {
    let work = tempfile::tempdir().unwrap();
    std::fs::write(work.path().join("junk.txt"), b"x").unwrap();
    std::fs::write(work.path().join("db1_dump.sql"), b"stale").unwrap();
    let harness = Harness::new(InMemoryTransport::new());

    let report = harness
        .pipeline(job_config(work.path(), &["db1"], 1_000))
        .run()
        .await
        .unwrap();

    assert!(report.carried_over.is_empty());
    assert_eq!(report.archive_bytes, DB1_ARCHIVE_BYTES);
    assert!(local_files(work.path()).is_empty());
}

#[tokio::test]
async fn connect_failure_fails_workspace_stage() {
    let work = tempfile::tempdir().unwrap();
    let transport = InMemoryTransport::new();
    transport.set_fail_connect(true);
    let harness = Harness::new(transport);

    let err = harness
        .pipeline(job_config(work.path(), &["db1"], 1_000))
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::WorkspacePrepared);
    assert_eq!(err.exit_code(), 3);
    assert!(matches!(
        err.cause,
        FailureCause::Transport(TransportError::Connect { .. })
    ));
    assert!(harness.dumper.dumped().is_empty());
}

#[tokio::test]
async fn held_lock_refuses_a_second_run() {
    let work = tempfile::tempdir().unwrap();
    std::fs::write(work.path().join(".dumpvault.lock"), b"1").unwrap();
    let harness = Harness::new(InMemoryTransport::new());

    let err = harness
        .pipeline(job_config(work.path(), &["db1"], 1_000))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err.cause, FailureCause::WorkspaceBusy(_)));
    assert!(harness.transport.calls().is_empty());
    assert!(work.path().join(".dumpvault.lock").exists());
}

#[tokio::test]
async fn triggered_stop_cancels_before_any_work() {
    let work = tempfile::tempdir().unwrap();
    let harness = Harness::new(InMemoryTransport::new());
    let stop = StopSignal::new();
    stop.trigger();

    let err: RunError = harness
        .pipeline(job_config(work.path(), &["db1"], 1_000))
        .with_stop_signal(stop)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err.cause, FailureCause::Cancelled));
    assert_eq!(err.exit_code(), 130);
    assert!(harness.transport.calls().is_empty());
}

#[tokio::test]
async fn stalled_upload_times_out() {
    let work = tempfile::tempdir().unwrap();
    let transport = InMemoryTransport::with_dir("backups");
    transport.set_stall_uploads(true);
    let harness = Harness::new(transport);
    let mut job = job_config(work.path(), &["db1"], 1_000);
    job.timeouts.operation = Duration::from_millis(100);

    let err = harness.pipeline(job).run().await.unwrap_err();

    assert_eq!(err.stage, Stage::Uploaded);
    assert!(matches!(
        err.cause,
        FailureCause::Transport(TransportError::TimedOut { op: "upload", .. })
    ));
}

#[tokio::test]
async fn run_deadline_bounds_the_whole_run() {
    let work = tempfile::tempdir().unwrap();
    let transport = InMemoryTransport::with_dir("backups");
    transport.set_stall_uploads(true);
    let harness = Harness::new(transport);
    let mut job = job_config(work.path(), &["db1"], 1_000);
    job.timeouts.run_deadline = Duration::from_millis(500);

    let err = harness.pipeline(job).run().await.unwrap_err();

    assert!(matches!(err.cause, FailureCause::DeadlineExceeded));
    assert!(harness.transport.names_in("backups").is_empty());
}

#[tokio::test]
async fn no_sources_still_enforces_quota() {
    let work = tempfile::tempdir().unwrap();
    let transport = InMemoryTransport::new();
    transport.put("backups", "db_2023-01-01_000000.zip", 80);
    transport.put("backups", "db_2023-02-01_000000.zip", 80);
    let harness = Harness::new(transport);

    let report = harness
        .pipeline(job_config(work.path(), &[], 100))
        .run()
        .await
        .unwrap();

    assert!(report.archive.is_none());
    assert!(report.uploaded.is_empty());
    assert_eq!(report.deleted, vec!["db_2023-01-01_000000.zip".to_owned()]);
    assert!(harness.archiver.packaged().is_empty());
}

#[tokio::test]
async fn preview_plans_without_side_effects() {
    let work = tempfile::tempdir().unwrap();
    let transport = InMemoryTransport::new();
    transport.put("backups", "db_2023-01-01_000000.zip", 60);
    transport.put("backups", "db_2023-02-01_000000.zip", 30);
    let harness = Harness::new(transport);

    let (inventory, plan) = harness
        .pipeline(job_config(work.path(), &["db1"], 100))
        .preview(20)
        .await
        .unwrap();

    assert_eq!(inventory.len(), 2);
    assert_eq!(plan.names, vec!["db_2023-01-01_000000.zip".to_owned()]);
    assert!(harness.transport.deletes().is_empty());
    assert!(harness.transport.uploads().is_empty());
    assert!(harness.dumper.dumped().is_empty());
    assert!(local_files(work.path()).is_empty());
}

#[tokio::test]
async fn preview_of_missing_remote_dir_is_empty() {
    let work = tempfile::tempdir().unwrap();
    let harness = Harness::new(InMemoryTransport::new());

    let (inventory, plan) = harness
        .pipeline(job_config(work.path(), &["db1"], 100))
        .preview(500)
        .await
        .unwrap();

    assert!(inventory.is_empty());
    assert!(plan.is_exhausted());
    assert!(!harness.transport.has_dir("backups"));
}
