//! `cronctl unschedule` - remove a job by id or name.

use anyhow::Result;
use colored::Colorize;

use cronq_core::config::SchedulerConfig;
use cronq_core::job::JobId;
use cronq_core::store::{Identity, JobIdOrName, JobStore};
use cronq_store::SqliteStore;

pub async fn run(
    database_path: &str,
    config_path: Option<&str>,
    as_user: &str,
    job: &str,
    json_output: bool,
) -> Result<()> {
    let config = SchedulerConfig::load(config_path.map(std::path::Path::new))?;
    let store = SqliteStore::new(database_path)?
        .with_superuser_policy(config.database.superuser_names.clone(), config.database.enable_superuser_jobs);
    let caller = Identity {
        is_privileged: config.database.superuser_names.iter().any(|n| n == as_user),
        user_name: as_user.to_string(),
    };

    let id_or_name = match job.parse::<i64>() {
        Ok(id) => JobIdOrName::Id(JobId(id)),
        Err(_) => JobIdOrName::Name(job.to_string()),
    };

    store.delete_job(&caller, id_or_name).await?;

    if json_output {
        println!("{}", serde_json::json!({ "job": job, "status": "unscheduled" }));
    } else {
        println!("{} Job unscheduled: {}", "✓".green(), job.cyan());
    }

    Ok(())
}
