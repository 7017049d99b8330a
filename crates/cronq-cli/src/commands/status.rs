//! `cronctl status` - registry size and task state histogram.
//!
//! Process management is out of scope (§1 Non-goals), so there is no IPC
//! channel into a running `cronctl run` process; this instead reloads a
//! fresh `Registry` from the store and reports what it looks like right
//! after a reload (every task starts `WAITING`), with `iterations` fixed at
//! zero since no event loop is actually attached.

use anyhow::Result;
use colored::Colorize;

use cronq_core::config::SchedulerConfig;
use cronq_scheduler::Registry;
use cronq_store::SqliteStore;

pub async fn run(database_path: &str, config_path: Option<&str>, json_output: bool) -> Result<()> {
    let config = SchedulerConfig::load(config_path.map(std::path::Path::new))?;
    let store = SqliteStore::new(database_path)?
        .with_superuser_policy(config.database.superuser_names.clone(), config.database.enable_superuser_jobs);
    let mut registry = Registry::new();
    registry.reload(&store).await?;

    let total = registry.len();
    let histogram = registry.state_histogram();

    if json_output {
        println!(
            "{}",
            serde_json::json!({
                "database": database_path,
                "registered_jobs": total,
                "task_states": histogram,
                "iterations": 0,
            })
        );
    } else {
        println!("{}", "cronq status".green().bold());
        println!("{}", "=".repeat(40));
        println!("  Database:        {}", database_path.cyan());
        println!("  Registered jobs: {}", total.to_string().white().bold());
        println!();
        for (state, count) in histogram {
            println!("  {:>10}: {}", state, count);
        }
        println!();
        println!("  (freshly reloaded snapshot; no attached running loop)");
    }

    Ok(())
}
