//! `cronctl alter` - partially update a job.

use anyhow::Result;
use colored::Colorize;

use cronq_core::config::SchedulerConfig;
use cronq_core::job::{JobId, JobPatch};
use cronq_core::store::{Identity, JobStore};
use cronq_store::SqliteStore;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    database_path: &str,
    config_path: Option<&str>,
    as_user: &str,
    job_id: i64,
    cron: Option<String>,
    command: Option<String>,
    database: Option<String>,
    user: Option<String>,
    active: Option<bool>,
    timezone_offset_hours: Option<i8>,
    clear_timezone_offset: bool,
    json_output: bool,
) -> Result<()> {
    let config = SchedulerConfig::load(config_path.map(std::path::Path::new))?;
    let store = SqliteStore::new(database_path)?
        .with_superuser_policy(config.database.superuser_names.clone(), config.database.enable_superuser_jobs);
    let caller = Identity {
        is_privileged: config.database.superuser_names.iter().any(|n| n == as_user),
        user_name: as_user.to_string(),
    };

    let patch = JobPatch {
        schedule: cron,
        command,
        database,
        user_name: user,
        active,
        job_name: None,
        timezone_offset_hours: if clear_timezone_offset {
            Some(None)
        } else {
            timezone_offset_hours.map(Some)
        },
    };

    store.alter_job(&caller, JobId(job_id), patch).await?;

    if json_output {
        println!("{}", serde_json::json!({ "job_id": job_id, "status": "altered" }));
    } else {
        println!("{} Job altered: {}", "✓".green(), job_id.to_string().cyan());
    }

    Ok(())
}
