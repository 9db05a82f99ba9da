//! Create and import commands.
//!
//! Both submit a job through a [`JobLifecycle`] and follow its snapshot until
//! the job is done or has failed for good.

use anyhow::{bail, Context, Result};
use clap::Args;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use jobwatch_core::jobs::{simulate_server_work, JobId, JobKind, JobStore};
use jobwatch_core::lifecycle::{JobLifecycle, LifecycleSnapshot, Phase};

use crate::output::{self, ConsoleNotifier, OutputFormat};
use crate::App;

/// Options shared by every tracked submission.
#[derive(Args)]
pub struct TrackArgs {
    /// Drive mock progress on the store once the job has an id
    #[arg(long)]
    simulate: bool,

    /// Milliseconds between simulated progress steps
    #[arg(long, default_value_t = 800)]
    step_ms: u64,

    /// Resubmit up to this many times after a failure
    #[arg(long, default_value_t = 0)]
    retries: u32,
}

#[derive(Args)]
pub struct CreateArgs {
    /// Job name
    #[arg(short, long)]
    name: String,

    #[command(flatten)]
    track: TrackArgs,
}

#[derive(Args)]
pub struct ImportArgs {
    /// File to import (JSON with an optional `name` field)
    file: PathBuf,

    /// Job name, overrides the one derived from the file
    #[arg(short, long)]
    name: Option<String>,

    #[command(flatten)]
    track: TrackArgs,
}

pub async fn create(args: CreateArgs, app: &App, format: OutputFormat) -> Result<()> {
    track(JobKind::Create, &args.name, &args.track, app, format).await
}

pub async fn import(args: ImportArgs, app: &App, format: OutputFormat) -> Result<()> {
    let content = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read import file: {}", args.file.display()))?;
    let name = match args.name {
        Some(name) => name,
        None => import_name(&args.file, &content),
    };
    track(JobKind::Import, &name, &args.track, app, format).await
}

/// Pick a job name for an imported file.
///
/// Prefers a non-blank `name` field of a JSON document, then the file stem,
/// then a timestamped fallback.
fn import_name(path: &Path, content: &str) -> String {
    let from_document = serde_json::from_str::<Value>(content)
        .ok()
        .and_then(|doc| doc.get("name").and_then(Value::as_str).map(str::to_string))
        .filter(|name| !name.trim().is_empty());
    if let Some(name) = from_document {
        return name;
    }

    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .filter(|stem| !stem.trim().is_empty())
        .unwrap_or_else(|| format!("import-{}", chrono::Utc::now().format("%Y%m%d%H%M%S")))
}

async fn track(
    kind: JobKind,
    name: &str,
    args: &TrackArgs,
    app: &App,
    format: OutputFormat,
) -> Result<()> {
    let bar = output::job_progress_bar(name, format);
    let lifecycle = JobLifecycle::new(app.store.clone(), app.config.profile(kind).clone())
        .with_context(|| format!("Invalid {} profile", kind))?
        .with_notifier(Arc::new(ConsoleNotifier::new(bar.clone(), format)));
    let lifecycle = Arc::new(lifecycle);
    let mut rx = lifecycle.subscribe();

    lifecycle.start(name);

    let mut retries_left = args.retries;
    let mut simulation: Option<(JobId, JoinHandle<()>)> = None;
    let outcome: LifecycleSnapshot = loop {
        let snapshot = rx.borrow_and_update().clone();
        bar.set_position(snapshot.progress.round() as u64);
        bar.set_message(snapshot.phase.to_string());

        match snapshot.phase {
            Phase::Polling if args.simulate => {
                if let Some(id) = &snapshot.job_id {
                    if simulation.as_ref().map(|(running, _)| running) != Some(id) {
                        if let Some((_, handle)) = simulation.take() {
                            handle.abort();
                        }
                        let step = Duration::from_millis(args.step_ms);
                        let handle = spawn_simulation(app.store.clone(), id.clone(), step);
                        simulation = Some((id.clone(), handle));
                    }
                }
            }
            Phase::Done => break snapshot,
            Phase::Error if retries_left > 0 => {
                retries_left -= 1;
                let message = snapshot.error.clone().unwrap_or_default();
                bar.suspend(|| output::print_info(&format!("{}; retrying ({} left)", message, retries_left)));
                lifecycle.retry();
                continue;
            }
            Phase::Error => break snapshot,
            _ => {}
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    bail!("Job lifecycle closed unexpectedly");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                lifecycle.cancel();
                bar.abandon_with_message("cancelled");
                output::print_info("Submission cancelled");
                return Ok(());
            }
        }
    };

    lifecycle.shutdown();
    if let Some((_, handle)) = simulation {
        if outcome.phase == Phase::Error {
            handle.abort();
        }
    }

    match outcome.phase {
        Phase::Done => {
            bar.finish_with_message("done");
            match format {
                OutputFormat::Table => {
                    if let Some(id) = &outcome.job_id {
                        output::print_detail("ID", id.as_str());
                    }
                    output::print_detail("Name", name);
                    if let Some(status) = outcome.status {
                        output::print_detail("Status", &status.to_string());
                    }
                }
                _ => output::print_item(&outcome, format)?,
            }
            Ok(())
        }
        _ => {
            bar.abandon_with_message("failed");
            if format != OutputFormat::Table {
                output::print_item(&outcome, format)?;
            }
            bail!(
                "{} failed: {}",
                kind,
                outcome.error.unwrap_or_else(|| "unknown error".to_string())
            )
        }
    }
}

fn spawn_simulation(store: Arc<dyn JobStore>, id: JobId, step: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(error) = simulate_server_work(store.as_ref(), &id, step).await {
            tracing::warn!(job_id = %id, error = %error, "simulation stopped");
        }
    })
}
