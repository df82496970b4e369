// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The backup run: dump → package → inventory → evict → upload → clean up.
//!
//! Stages run strictly in order; each stage's postcondition is the next stage's
//! precondition. Before entering a stage the run checks the stop signal and the
//! run deadline. Every remote call additionally carries its own timeout.
//!
//! Failure policy:
//!
//! - Dump, archive, listing and upload failures end the run with [`RunError`].
//! - A failed eviction is logged and skipped; shipping the new archive matters more
//!   than completing every deletion.
//! - Raw dumps never outlive the packaging stage. Archives are only removed locally
//!   after they were uploaded; an archive left behind by a failed upload is picked up
//!   and shipped by the next run.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use time::OffsetDateTime;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::collab::{ArchiveError, Archiver, DumpProducer};
use crate::config::{JobConfig, Timeouts};
use crate::error::{FailureCause, RunError, Stage};
use crate::inventory::{list_inventory, Inventory};
use crate::lock::{WorkspaceLock, LOCK_FILE_NAME};
use crate::name::NameCodec;
use crate::retention::{DeletionPlan, PlanStatus, RetentionPolicy};
use crate::transport::{remote_path, Transport, TransportError};

/// Suffix appended to a data source name to form its dump file name.
pub const DUMP_FILE_SUFFIX: &str = "_dump.sql";

/// Source of "now" for archive names.
pub type Clock = fn() -> OffsetDateTime;

/// Cooperative stop request, checked between stages.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    /// Fresh, untriggered signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every run sharing this signal to stop at its next stage boundary.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`trigger`](Self::trigger) has been called.
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Archive created by this run; `None` when no data source is configured.
    pub archive: Option<String>,
    /// Size of that archive.
    pub archive_bytes: u64,
    /// Archives left by earlier failed runs and shipped by this one.
    pub carried_over: Vec<String>,
    /// Eviction plan that was executed.
    pub plan: DeletionPlan,
    /// Planned archives that were deleted.
    pub deleted: Vec<String>,
    /// Planned archives whose deletion failed and was skipped.
    pub failed_deletions: Vec<String>,
    /// Archives uploaded, in upload order.
    pub uploaded: Vec<String>,
    /// Remote entries that could not be dated.
    pub undated_entries: usize,
}

impl RunReport {
    /// Returns `true` if the quota could not be met even after evicting everything
    /// evictable.
    pub fn retention_exhausted(&self) -> bool {
        self.plan.is_exhausted()
    }
}

#[derive(Debug, Clone)]
struct LocalArchive {
    name: String,
    path: PathBuf,
    size_bytes: u64,
}

/// Per-run time budget: a hard deadline plus a per-operation timeout.
struct Budget {
    deadline: Instant,
    per_op: Duration,
}

impl Budget {
    fn start(timeouts: &Timeouts) -> Self {
        Self {
            deadline: Instant::now() + timeouts.run_deadline,
            per_op: timeouts.operation,
        }
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    async fn bound<F, R>(&self, op: &'static str, fut: F) -> Result<R, TransportError>
    where
        F: Future<Output = Result<R, TransportError>>,
    {
        let limit = (Instant::now() + self.per_op).min(self.deadline);
        timeout_at(limit, fut).await.unwrap_or(Err(TransportError::TimedOut {
            op,
            after: self.per_op,
        }))
    }

    async fn within_deadline<F>(&self, fut: F) -> Option<F::Output>
    where
        F: Future,
    {
        timeout_at(self.deadline, fut).await.ok()
    }
}

/// One configured backup job, generic over its collaborators.
pub struct Pipeline<T, D, A> {
    job: JobConfig,
    codec: NameCodec,
    policy: RetentionPolicy,
    transport: T,
    dumper: D,
    archiver: A,
    clock: Clock,
    stop: StopSignal,
}

impl<T, D, A> Pipeline<T, D, A>
where
    T: Transport,
    D: DumpProducer,
    A: Archiver,
{
    /// Assemble a pipeline from a validated job and its collaborators.
    pub fn new(job: JobConfig, transport: T, dumper: D, archiver: A) -> Self {
        Self {
            codec: job.name_codec(),
            policy: job.retention(),
            job,
            transport,
            dumper,
            archiver,
            clock: OffsetDateTime::now_utc,
            stop: StopSignal::new(),
        }
    }

    /// Replace the clock used to name archives.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Share an externally owned stop signal.
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Handle that stops this pipeline at its next stage boundary.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// The job this pipeline runs.
    pub fn job(&self) -> &JobConfig {
        &self.job
    }

    /// The transport this pipeline drives.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Execute one full run.
    ///
    /// Any failure is logged here, once, with its stage and cause.
    #[instrument(skip_all, fields(remote_dir = %self.job.remote_dir))]
    pub async fn run(&mut self) -> Result<RunReport, RunError> {
        let budget = Budget::start(&self.job.timeouts);
        match self.run_stages(&budget).await {
            Ok(report) => {
                info!(
                    archive = report.archive.as_deref().unwrap_or("<none>"),
                    uploaded = report.uploaded.len(),
                    deleted = report.deleted.len(),
                    failed_deletions = report.failed_deletions.len(),
                    retention_exhausted = report.retention_exhausted(),
                    "backup run complete"
                );
                Ok(report)
            }
            Err(err) => {
                error!(
                    stage = %err.stage,
                    cause = %err.cause,
                    exit_code = err.exit_code(),
                    "backup run failed"
                );
                Err(err)
            }
        }
    }

    /// Connect, list and plan for `incoming_bytes` without changing anything.
    #[instrument(skip_all, fields(remote_dir = %self.job.remote_dir, incoming_bytes = incoming_bytes))]
    pub async fn preview(&mut self, incoming_bytes: u64) -> Result<(Inventory, DeletionPlan), RunError> {
        let budget = Budget::start(&self.job.timeouts);
        self.connect(&budget).await?;
        let exists = budget
            .bound("exists", self.transport.exists(&self.job.remote_dir))
            .await
            .map_err(|e| remote_failure(Stage::InventoryRead, e, &budget))?;
        let inventory = if exists {
            budget
                .bound(
                    "list",
                    list_inventory(&self.transport, &self.job.remote_dir, &self.codec),
                )
                .await
                .map_err(|e| remote_failure(Stage::InventoryRead, e, &budget))?
        } else {
            Inventory::default()
        };
        let plan = self.policy.plan(&inventory, incoming_bytes);
        Ok((inventory, plan))
    }

    async fn run_stages(&mut self, budget: &Budget) -> Result<RunReport, RunError> {
        self.gate(Stage::WorkspacePrepared, budget)?;
        let _lock = self.lock_workspace().await?;
        let mut carried = self.clear_workspace().await?;
        self.connect(budget).await?;
        self.ensure_remote_dir(budget).await?;
        reached(Stage::WorkspacePrepared);

        self.gate(Stage::Dumped, budget)?;
        let dumps = self.dump_all(budget).await?;
        reached(Stage::Dumped);

        self.gate(Stage::Packaged, budget)?;
        let fresh = self.package(&dumps, budget).await?;
        if let Some(fresh) = &fresh {
            // Same-second rerun: the new archive replaced the leftover on disk.
            carried.retain(|a| a.name != fresh.name);
        }
        reached(Stage::Packaged);

        self.gate(Stage::InventoryRead, budget)?;
        let inventory = budget
            .bound(
                "list",
                list_inventory(&self.transport, &self.job.remote_dir, &self.codec),
            )
            .await
            .map_err(|e| remote_failure(Stage::InventoryRead, e, budget))?;
        reached(Stage::InventoryRead);

        let shipping: Vec<&LocalArchive> = carried.iter().chain(fresh.iter()).collect();

        self.gate(Stage::Evicted, budget)?;
        let incoming = shipping
            .iter()
            .fold(0u64, |acc, a| acc.saturating_add(a.size_bytes));
        let view = inventory.without(shipping.iter().map(|a| a.name.as_str()));
        let plan = self.policy.plan(&view, incoming);
        report_plan(&view, &plan);
        let (deleted, failed_deletions) = self.evict(&plan, budget).await?;
        reached(Stage::Evicted);

        self.gate(Stage::Uploaded, budget)?;
        let mut uploaded = Vec::with_capacity(shipping.len());
        for archive in &shipping {
            budget
                .bound(
                    "upload",
                    self.transport.upload(&archive.path, &self.job.remote_dir),
                )
                .await
                .map_err(|e| remote_failure(Stage::Uploaded, e, budget))?;
            info!(archive = %archive.name, bytes = archive.size_bytes, "archive uploaded");
            uploaded.push(archive.name.clone());
        }
        reached(Stage::Uploaded);

        self.gate(Stage::CleanedUp, budget)?;
        for archive in &shipping {
            if let Err(err) = tokio::fs::remove_file(&archive.path).await {
                warn!(path = %archive.path.display(), %err, "uploaded archive left in workspace");
            }
        }
        reached(Stage::CleanedUp);

        Ok(RunReport {
            archive: fresh.as_ref().map(|a| a.name.clone()),
            archive_bytes: fresh.as_ref().map_or(0, |a| a.size_bytes),
            carried_over: carried.iter().map(|a| a.name.clone()).collect(),
            undated_entries: view.undated().count(),
            plan,
            deleted,
            failed_deletions,
            uploaded,
        })
    }

    fn gate(&self, next: Stage, budget: &Budget) -> Result<(), RunError> {
        if self.stop.is_triggered() {
            return Err(RunError::new(next, FailureCause::Cancelled));
        }
        if budget.expired() {
            return Err(RunError::new(next, FailureCause::DeadlineExceeded));
        }
        debug!(stage = %next, "entering stage");
        Ok(())
    }

    async fn lock_workspace(&self) -> Result<WorkspaceLock, RunError> {
        let dir = &self.job.local_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| workspace_failure(dir, e))?;
        WorkspaceLock::acquire(dir).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                RunError::new(
                    Stage::WorkspacePrepared,
                    FailureCause::WorkspaceBusy(dir.join(LOCK_FILE_NAME)),
                )
            } else {
                workspace_failure(dir, e)
            }
        })
    }

    /// Remove everything but the lock and undelivered archives; return the latter,
    /// oldest first.
    async fn clear_workspace(&self) -> Result<Vec<LocalArchive>, RunError> {
        let dir = &self.job.local_dir;
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| workspace_failure(dir, e))?;
        let mut carried = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| workspace_failure(dir, e))?
        {
            let path = entry.path();
            let meta = entry
                .metadata()
                .await
                .map_err(|e| workspace_failure(&path, e))?;
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == LOCK_FILE_NAME {
                continue;
            }
            if self.codec.decode(&name).is_some() {
                warn!(archive = %name, bytes = meta.len(), "carrying over undelivered archive");
                carried.push(LocalArchive {
                    name,
                    path,
                    size_bytes: meta.len(),
                });
                continue;
            }
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| workspace_failure(&path, e))?;
            debug!(path = %path.display(), "removed stale workspace file");
        }
        carried.sort_by(|a, b| {
            self.codec
                .decode(&a.name)
                .cmp(&self.codec.decode(&b.name))
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(carried)
    }

    async fn connect(&mut self, budget: &Budget) -> Result<(), RunError> {
        budget
            .bound("connect", self.transport.connect(&self.job.remote.host))
            .await
            .map_err(|e| remote_failure(Stage::WorkspacePrepared, e, budget))?;
        budget
            .bound(
                "authenticate",
                self.transport.authenticate(&self.job.remote.credentials),
            )
            .await
            .map_err(|e| remote_failure(Stage::WorkspacePrepared, e, budget))?;
        debug!(host = %self.job.remote.host, "transport connected");
        Ok(())
    }

    async fn ensure_remote_dir(&self, budget: &Budget) -> Result<(), RunError> {
        let dir = &self.job.remote_dir;
        let exists = budget
            .bound("exists", self.transport.exists(dir))
            .await
            .map_err(|e| remote_failure(Stage::WorkspacePrepared, e, budget))?;
        if !exists {
            budget
                .bound("mkdir", self.transport.mkdir(dir))
                .await
                .map_err(|e| remote_failure(Stage::WorkspacePrepared, e, budget))?;
            info!(dir = %dir, "created remote directory");
        }
        Ok(())
    }

    /// Dump every source concurrently; all must succeed.
    async fn dump_all(&self, budget: &Budget) -> Result<Vec<PathBuf>, RunError> {
        let sources = &self.job.data_source_names;
        if sources.is_empty() {
            warn!("no data sources configured; nothing to dump");
            return Ok(Vec::new());
        }
        let outputs: Vec<PathBuf> = sources
            .iter()
            .map(|s| self.job.local_dir.join(format!("{s}{DUMP_FILE_SUFFIX}")))
            .collect();

        let dumper = &self.dumper;
        let dumps = join_all(sources.iter().zip(&outputs).map(|(source, out)| async move {
            debug!(source = %source, out = %out.display(), "dumping");
            dumper.dump(source, out).await
        }));
        let Some(results) = budget.within_deadline(dumps).await else {
            discard(&outputs).await;
            return Err(RunError::new(Stage::Dumped, FailureCause::DeadlineExceeded));
        };

        let mut first_failure = None;
        for (source, result) in sources.iter().zip(results) {
            match result {
                Ok(()) => info!(source = %source, "dump complete"),
                Err(err) => {
                    error!(source = %source, %err, "dump failed");
                    first_failure.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_failure {
            discard(&outputs).await;
            return Err(RunError::new(Stage::Dumped, err));
        }
        Ok(outputs)
    }

    /// Bundle `dumps` into a freshly named archive. Raw dumps are removed whatever
    /// the outcome.
    async fn package(
        &self,
        dumps: &[PathBuf],
        budget: &Budget,
    ) -> Result<Option<LocalArchive>, RunError> {
        if dumps.is_empty() {
            return Ok(None);
        }
        let name = match self.codec.encode((self.clock)()) {
            Ok(name) => name,
            Err(err) => {
                discard(dumps).await;
                return Err(RunError::new(Stage::Packaged, err));
            }
        };
        let path = self.job.local_dir.join(&name);
        // A leftover with this name would be updated in place by archivers like zip.
        discard(std::slice::from_ref(&path)).await;

        let outcome = budget
            .within_deadline(self.archiver.package(dumps, &path))
            .await;
        discard(dumps).await;

        let failure = match outcome {
            Some(Ok(())) => None,
            Some(Err(err)) => Some(FailureCause::Archive(err)),
            None => Some(FailureCause::DeadlineExceeded),
        };
        if let Some(cause) = failure {
            discard(std::slice::from_ref(&path)).await;
            return Err(RunError::new(Stage::Packaged, cause));
        }

        let size_bytes = tokio::fs::metadata(&path)
            .await
            .map_err(|source| {
                RunError::new(
                    Stage::Packaged,
                    ArchiveError::Io {
                        path: path.clone(),
                        source,
                    },
                )
            })?
            .len();
        info!(archive = %name, bytes = size_bytes, "archive packaged");
        Ok(Some(LocalArchive {
            name,
            path,
            size_bytes,
        }))
    }

    /// Execute `plan` in order, skipping failed deletions.
    async fn evict(
        &self,
        plan: &DeletionPlan,
        budget: &Budget,
    ) -> Result<(Vec<String>, Vec<String>), RunError> {
        let mut deleted = Vec::new();
        let mut failed = Vec::new();
        for name in &plan.names {
            if budget.expired() {
                return Err(RunError::new(Stage::Evicted, FailureCause::DeadlineExceeded));
            }
            let path = remote_path(&self.job.remote_dir, name);
            match budget.bound("delete", self.transport.delete(&path)).await {
                Ok(()) => {
                    info!(archive = %name, "archive evicted");
                    deleted.push(name.clone());
                }
                Err(err) => {
                    error!(archive = %name, %err, "eviction failed; skipping");
                    failed.push(name.clone());
                }
            }
        }
        Ok((deleted, failed))
    }
}

fn reached(stage: Stage) {
    info!(stage = %stage, "stage reached");
}

fn report_plan(view: &Inventory, plan: &DeletionPlan) {
    info!(
        total_bytes = plan.total_bytes,
        incoming_bytes = plan.incoming_bytes,
        quota_bytes = plan.quota_bytes,
        planned = plan.names.len(),
        freed_bytes = plan.freed_bytes,
        "deletion plan computed"
    );
    let undated = view.undated().count();
    if let PlanStatus::Exhausted { shortfall_bytes } = plan.status {
        if view.dated().next().is_none() && undated > 0 {
            warn!(
                undated,
                shortfall_bytes,
                "remote directory holds only undatable entries; quota cannot be enforced"
            );
        } else {
            warn!(
                shortfall_bytes,
                "retention exhausted: quota cannot be met even after evicting every dated archive"
            );
        }
    } else if undated > 0 {
        debug!(undated, "undatable remote entries are never evicted");
    }
}

fn remote_failure(stage: Stage, err: TransportError, budget: &Budget) -> RunError {
    if matches!(err, TransportError::TimedOut { .. }) && budget.expired() {
        RunError::new(stage, FailureCause::DeadlineExceeded)
    } else {
        RunError::new(stage, err)
    }
}

fn workspace_failure(path: &Path, source: std::io::Error) -> RunError {
    RunError::new(
        Stage::WorkspacePrepared,
        FailureCause::Workspace {
            path: path.to_path_buf(),
            source,
        },
    )
}

/// Best-effort removal of local files.
async fn discard(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "removed"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %path.display(), %err, "failed to remove local file"),
        }
    }
}
