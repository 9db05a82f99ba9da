//! Plain job-store commands: status, list, delete and simulate.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::time::Duration;
use tabled::Tabled;
use tokio_util::sync::CancellationToken;

use jobwatch_core::jobs::{simulate_server_work, JobId, JobRecord};

use crate::output::{self, OutputFormat};
use crate::App;

#[derive(Args)]
pub struct SimulateArgs {
    /// Job ID
    id: String,

    /// Milliseconds between progress steps
    #[arg(long, default_value_t = 800)]
    step_ms: u64,
}

#[derive(Debug, Serialize, Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Progress")]
    progress: String,
}

impl From<&JobRecord> for JobRow {
    fn from(record: &JobRecord) -> Self {
        Self {
            id: record.id.as_ref().map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()),
            name: record.name.clone(),
            status: record.status.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
            progress: record
                .progress
                .map(|p| format!("{:.0}%", p))
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

pub async fn status(id: &str, app: &App, format: OutputFormat) -> Result<()> {
    let id = JobId::new(id);
    let record = app
        .store
        .fetch(&id, &CancellationToken::new())
        .await
        .with_context(|| format!("Failed to fetch job {}", id))?;

    match format {
        OutputFormat::Table => {
            let row = JobRow::from(&record);
            output::print_header(&format!("Job: {}", id));
            output::print_detail("Name", &row.name);
            output::print_detail("Status", &row.status);
            output::print_detail("Progress", &row.progress);
            if record.is_finished() {
                output::print_success("Job finished");
            }
        }
        _ => output::print_item(&record, format)?,
    }
    Ok(())
}

pub async fn list(app: &App, format: OutputFormat) -> Result<()> {
    let records = app.store.list().await.context("Failed to list jobs")?;
    match format {
        OutputFormat::Table => {
            let rows: Vec<JobRow> = records.iter().map(JobRow::from).collect();
            output::print_list(&rows, format)
        }
        _ => output::print_item(&records, format),
    }
}

pub async fn delete(id: &str, app: &App, format: OutputFormat) -> Result<()> {
    let id = JobId::new(id);
    let record = app
        .store
        .delete(&id)
        .await
        .with_context(|| format!("Failed to delete job {}", id))?;

    match format {
        OutputFormat::Table => output::print_success(&format!("Job {} deleted", id)),
        _ => output::print_item(&record, format)?,
    }
    Ok(())
}

pub async fn simulate(args: SimulateArgs, app: &App, format: OutputFormat) -> Result<()> {
    let id = JobId::new(args.id);
    let spinner = output::spinner(&format!("Simulating progress for job {}", id), format);

    let result = simulate_server_work(app.store.as_ref(), &id, Duration::from_millis(args.step_ms)).await;
    spinner.finish_and_clear();
    result.with_context(|| format!("Simulation of job {} failed", id))?;

    match format {
        OutputFormat::Table => output::print_success(&format!("Job {} driven to completion", id)),
        _ => output::print_item(&serde_json::json!({ "id": id, "completed": true }), format)?,
    }
    Ok(())
}
