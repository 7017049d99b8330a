//! `cronctl list` - show registered jobs.

use anyhow::Result;
use colored::Colorize;
use tabled::{Table, Tabled};

use cronq_core::config::SchedulerConfig;
use cronq_core::store::JobStore;
use cronq_store::SqliteStore;

#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    job_id: i64,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "SCHEDULE")]
    schedule: String,
    #[tabled(rename = "DATABASE")]
    database: String,
    #[tabled(rename = "USER")]
    user_name: String,
    #[tabled(rename = "ACTIVE")]
    active: bool,
}

pub async fn run(
    database_path: &str,
    config_path: Option<&str>,
    job_type: Option<&str>,
    active_only: bool,
    json_output: bool,
) -> Result<()> {
    let config = SchedulerConfig::load(config_path.map(std::path::Path::new))?;
    let store = SqliteStore::new(database_path)?
        .with_superuser_policy(config.database.superuser_names.clone(), config.database.enable_superuser_jobs);
    let mut jobs = store.list_jobs().await?;

    // There is no distinct "job type" concept in this schema; `--job-type`
    // filters on the job's name, the closest analogue it has.
    if let Some(needle) = job_type {
        jobs.retain(|j| j.job_name.as_deref().is_some_and(|n| n.contains(needle)));
    }
    if active_only {
        jobs.retain(|j| j.active);
    }

    if json_output {
        let output: Vec<_> = jobs
            .iter()
            .map(|j| {
                serde_json::json!({
                    "job_id": j.job_id.0,
                    "name": j.job_name,
                    "schedule": j.schedule_text,
                    "command": j.command,
                    "database": j.database,
                    "user": j.user_name,
                    "active": j.active,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if jobs.is_empty() {
        println!("{}", "No jobs registered.".yellow());
        return Ok(());
    }

    let rows: Vec<JobRow> = jobs
        .into_iter()
        .map(|j| JobRow {
            job_id: j.job_id.0,
            name: j.job_name.unwrap_or_else(|| "-".to_string()),
            schedule: j.schedule_text,
            database: j.database,
            user_name: j.user_name,
            active: j.active,
        })
        .collect();

    println!("{}", Table::new(rows));

    Ok(())
}
