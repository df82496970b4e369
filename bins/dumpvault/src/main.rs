// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! dumpvault: dump, package, evict, upload.
//!
//! Loads one job from a JSON config, builds the configured transport and the command
//! collaborators, and maps the outcome onto the process exit status.

use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dumpvault_adapters::{CommandArchiver, CommandDumper, DirTransport, FtpTransport};
use dumpvault_config_fs::FsConfigStore;
use dumpvault_core::config::{ConfigError, ConfigService, JobConfig, RawJobConfig, JOB_CONFIG_KEY};
use dumpvault_core::{
    DeletionPlan, Inventory, PlanStatus, Pipeline, RemoteBackend, RunError, StopSignal, Transport,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_UNEXPECTED: u8 = 1;
const EXIT_CONFIG: u8 = 2;

#[derive(Parser, Debug)]
#[command(author, version, about = "Dump databases, archive them, and ship them to a quota-bounded store")]
struct Cli {
    /// Job config file (default: `job.json` in the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log filter directives, e.g. `info` or `dumpvault_core=debug` (default: `RUST_LOG`, then `info`)
    #[arg(long, global = true)]
    log: Option<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the backup job (default).
    Run,
    /// List the remote store and show what a run would evict. Changes nothing.
    Plan {
        /// Size of the hypothetical incoming archive.
        #[arg(long, default_value_t = 0)]
        incoming_bytes: u64,
    },
    /// Write a template job config.
    InitConfig {
        /// Destination file.
        path: PathBuf,
        /// Replace an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref());

    let code = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(cli.config.as_deref()).await,
        Commands::Plan { incoming_bytes } => plan(cli.config.as_deref(), incoming_bytes).await,
        Commands::InitConfig { path, force } => init_config(&path, force),
    };
    ExitCode::from(code)
}

fn init_tracing(directives: Option<&str>) {
    let directives = directives
        .map(str::to_owned)
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_owned());
    let (filter, rejected) = match EnvFilter::try_new(&directives) {
        Ok(filter) => (filter, None),
        Err(err) => (EnvFilter::new("info"), Some(err)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .init();
    if let Some(err) = rejected {
        warn!(%err, directives, "invalid log filter; falling back to info");
    }
}

fn load_job(config: Option<&Path>) -> Result<JobConfig, u8> {
    let store = match config {
        Some(path) => FsConfigStore::at_file(path),
        None => FsConfigStore::new().map_err(|err| {
            error!(%err, "cannot locate the platform config directory");
            EXIT_CONFIG
        })?,
    };
    let path = store.path_for(JOB_CONFIG_KEY);
    ConfigService::new(store).load_job().map_err(|err| {
        match err {
            ConfigError::NotFound => error!(path = %path.display(), "no job config found"),
            err => error!(path = %path.display(), %err, "job config rejected"),
        }
        EXIT_CONFIG
    })
}

type JobPipeline<T> = Pipeline<T, CommandDumper, CommandArchiver>;

fn build_pipeline<T: Transport>(job: JobConfig, transport: T) -> JobPipeline<T> {
    let dumper = CommandDumper::new(job.dumper.clone(), job.data_source.clone());
    let archiver = CommandArchiver::new(job.archiver.clone());
    Pipeline::new(job, transport, dumper, archiver)
}

/// Trigger `stop` on the first interrupt.
fn stop_on_interrupt(stop: StopSignal) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupt received; stopping at the next stage boundary");
                stop.trigger();
            }
            Err(err) => warn!(%err, "cannot listen for interrupts"),
        }
    });
}

async fn run(config: Option<&Path>) -> u8 {
    let job = match load_job(config) {
        Ok(job) => job,
        Err(code) => return code,
    };
    let stop = StopSignal::new();
    stop_on_interrupt(stop.clone());
    match job.remote.backend {
        RemoteBackend::Dir => execute(build_pipeline(job, DirTransport::new()), stop).await,
        RemoteBackend::Ftp => execute(build_pipeline(job, FtpTransport::new()), stop).await,
    }
}

async fn execute<T: Transport>(pipeline: JobPipeline<T>, stop: StopSignal) -> u8 {
    match pipeline.with_stop_signal(stop).run().await {
        Ok(_) => 0,
        Err(err) => err.exit_code(),
    }
}

async fn plan(config: Option<&Path>, incoming_bytes: u64) -> u8 {
    let job = match load_job(config) {
        Ok(job) => job,
        Err(code) => return code,
    };
    let preview = match job.remote.backend {
        RemoteBackend::Dir => {
            build_pipeline(job, DirTransport::new())
                .preview(incoming_bytes)
                .await
        }
        RemoteBackend::Ftp => {
            build_pipeline(job, FtpTransport::new())
                .preview(incoming_bytes)
                .await
        }
    };
    let (inventory, plan) = match preview {
        Ok(preview) => preview,
        Err(err) => return preview_failed(&err),
    };
    match render_plan(&mut std::io::stdout().lock(), &inventory, &plan) {
        Ok(()) => 0,
        Err(err) => {
            error!("{err:#}");
            EXIT_UNEXPECTED
        }
    }
}

fn preview_failed(err: &RunError) -> u8 {
    error!(stage = %err.stage, cause = %err.cause, "preview failed");
    err.exit_code()
}

fn render_plan(out: &mut impl Write, inventory: &Inventory, plan: &DeletionPlan) -> Result<()> {
    let undated = inventory.undated().count();
    writeln!(
        out,
        "remote entries: {} ({undated} undatable), {} bytes",
        inventory.len(),
        plan.total_bytes
    )?;
    writeln!(
        out,
        "quota: {} bytes, incoming: {} bytes",
        plan.quota_bytes, plan.incoming_bytes
    )?;
    let status = match plan.status {
        PlanStatus::NotNeeded => "fits, nothing to evict".to_owned(),
        PlanStatus::Satisfied => format!("evict {} archive(s)", plan.names.len()),
        PlanStatus::Exhausted { shortfall_bytes } => {
            format!("retention exhausted, {shortfall_bytes} bytes over quota after evicting everything")
        }
    };
    writeln!(out, "plan: {status}")?;
    for name in &plan.names {
        let size = inventory.get(name).map_or(0, |a| a.size_bytes);
        writeln!(out, "  delete {name} ({size} bytes)")?;
    }
    writeln!(out, "projected: {} bytes", plan.projected_bytes())?;
    out.flush().context("write plan to stdout")?;
    Ok(())
}

fn init_config(path: &Path, force: bool) -> u8 {
    if path.exists() && !force {
        error!(path = %path.display(), "refusing to overwrite; pass --force");
        return EXIT_CONFIG;
    }
    let service = ConfigService::new(FsConfigStore::at_file(path));
    match service.save(JOB_CONFIG_KEY, &RawJobConfig::template()) {
        Ok(()) => {
            info!(path = %path.display(), "template written");
            0
        }
        Err(err) => {
            error!(path = %path.display(), %err, "cannot write template");
            EXIT_CONFIG
        }
    }
}
