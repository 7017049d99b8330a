//! `cronctl runs` - show recent run rows for a job.

use anyhow::Result;
use colored::Colorize;
use tabled::{Table, Tabled};

use cronq_core::job::JobId;
use cronq_core::store::JobStore;
use cronq_store::SqliteStore;

#[derive(Tabled)]
struct RunRow {
    #[tabled(rename = "RUN ID")]
    run_id: i64,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "MESSAGE")]
    message: String,
    #[tabled(rename = "START")]
    start_time: String,
    #[tabled(rename = "END")]
    end_time: String,
}

pub async fn run(database_path: &str, job_id: i64, limit: usize, json_output: bool) -> Result<()> {
    let store = SqliteStore::new(database_path)?;
    let runs = store.list_runs(JobId(job_id), limit).await?;

    if json_output {
        let output: Vec<_> = runs
            .iter()
            .map(|r| {
                serde_json::json!({
                    "run_id": r.run_id.0,
                    "status": r.status.as_str(),
                    "return_message": r.return_message,
                    "start_time": r.start_time.map(|t| t.to_rfc3339()),
                    "end_time": r.end_time.map(|t| t.to_rfc3339()),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("{}", "No runs logged for this job.".yellow());
        return Ok(());
    }

    let rows: Vec<RunRow> = runs
        .into_iter()
        .map(|r| RunRow {
            run_id: r.run_id.0,
            status: r.status.as_str().to_string(),
            message: r.return_message.unwrap_or_default(),
            start_time: r.start_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
            end_time: r.end_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
        })
        .collect();

    println!("{}", Table::new(rows));

    Ok(())
}
