//! `cronctl schedule` - register a new job.

use anyhow::Result;
use colored::Colorize;

use cronq_core::config::SchedulerConfig;
use cronq_core::store::{Identity, JobStore};
use cronq_store::SqliteStore;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    database_path: &str,
    config_path: Option<&str>,
    as_user: &str,
    cron: &str,
    command: &str,
    name: Option<&str>,
    target_database: &str,
    target_user: &str,
    active: bool,
    timezone_offset_hours: Option<i8>,
    json_output: bool,
) -> Result<()> {
    let config = SchedulerConfig::load(config_path.map(std::path::Path::new))?;
    let store = SqliteStore::new(database_path)?
        .with_superuser_policy(config.database.superuser_names.clone(), config.database.enable_superuser_jobs);
    let caller = Identity {
        is_privileged: config.database.superuser_names.iter().any(|n| n == as_user),
        user_name: as_user.to_string(),
    };

    let job_id = store
        .insert_job(
            &caller,
            cron,
            command,
            target_database,
            target_user,
            name,
            active,
            timezone_offset_hours,
        )
        .await?;

    if json_output {
        println!("{}", serde_json::json!({ "job_id": job_id.0 }));
    } else {
        println!("{} Job scheduled: {}", "✓".green(), job_id.to_string().cyan());
    }

    Ok(())
}
