//! cronctl
//!
//! Command-line administration tool for cronq, standing in for the host
//! engine's `cron.schedule`/`cron.unschedule`/`cron.alter_job` SQL functions.
//!
//! # Usage
//!
//! ```bash
//! # Register a job
//! cronctl schedule --cron "0 * * * *" --command "SELECT 1" --name hourly-heartbeat
//!
//! # List jobs
//! cronctl list
//!
//! # Start the scheduler in the foreground
//! cronctl run
//! ```

mod commands;

use clap::{Parser, Subcommand};

/// cronctl - cronq administration CLI
#[derive(Parser)]
#[command(name = "cronctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the embedded SQLite database file
    #[arg(short, long, default_value = "cronq.db", env = "CRONQ_DATABASE_PATH")]
    database: String,

    /// Path to an optional JSON config file (layered under defaults, under env overrides)
    #[arg(long)]
    config: Option<String>,

    /// Log level
    #[arg(short, long, default_value = "info", env = "CRONQ_LOG_LEVEL")]
    log_level: String,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Identity the CLI acts as when scheduling, altering, or unscheduling jobs
    #[arg(long, default_value = "cronctl", env = "CRONQ_AS_USER")]
    as_user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new job
    Schedule {
        /// Cron schedule expression
        #[arg(long)]
        cron: String,

        /// SQL command to run
        #[arg(long)]
        command: String,

        /// Unique job name
        #[arg(long)]
        name: Option<String>,

        /// Target database
        #[arg(long, default_value = "postgres")]
        database: String,

        /// Identity the job runs as
        #[arg(long, default_value = "postgres")]
        user: String,

        /// Register the job inactive
        #[arg(long)]
        inactive: bool,

        /// Fixed UTC offset (-12..=12) applied to the wall clock before
        /// matching this job's schedule fields
        #[arg(long)]
        timezone_offset: Option<i8>,
    },

    /// Remove a job by id or name
    Unschedule {
        /// Job id (numeric) or job name
        job: String,
    },

    /// Update an existing job
    Alter {
        /// Job id
        job_id: i64,

        /// New cron schedule expression
        #[arg(long)]
        cron: Option<String>,

        /// New SQL command
        #[arg(long)]
        command: Option<String>,

        /// New target database
        #[arg(long)]
        database: Option<String>,

        /// New identity the job runs as
        #[arg(long)]
        user: Option<String>,

        /// New active flag
        #[arg(long)]
        active: Option<bool>,

        /// New fixed UTC offset (-12..=12)
        #[arg(long)]
        timezone_offset: Option<i8>,

        /// Clear the timezone offset back to unshifted UTC
        #[arg(long)]
        clear_timezone_offset: bool,
    },

    /// List registered jobs
    List {
        /// Filter to job names containing this substring
        #[arg(long = "job-type")]
        job_type: Option<String>,

        /// Only show active jobs
        #[arg(long)]
        active_only: bool,
    },

    /// Show recent runs for a job
    Runs {
        /// Job id
        job_id: i64,

        /// Maximum rows to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show scheduler status
    Status,

    /// Run the scheduler in the foreground
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_env_filter(&cli.log_level).init();

    let json_output = cli.format == OutputFormat::Json;

    match &cli.command {
        Commands::Schedule {
            cron,
            command,
            name,
            database,
            user,
            inactive,
            timezone_offset,
        } => {
            commands::schedule::run(
                &cli.database,
                cli.config.as_deref(),
                &cli.as_user,
                cron,
                command,
                name.as_deref(),
                database,
                user,
                !*inactive,
                *timezone_offset,
                json_output,
            )
            .await
        }

        Commands::Unschedule { job } => {
            commands::unschedule::run(&cli.database, cli.config.as_deref(), &cli.as_user, job, json_output).await
        }

        Commands::Alter {
            job_id,
            cron,
            command,
            database,
            user,
            active,
            timezone_offset,
            clear_timezone_offset,
        } => {
            commands::alter::run(
                &cli.database,
                cli.config.as_deref(),
                &cli.as_user,
                *job_id,
                cron.clone(),
                command.clone(),
                database.clone(),
                user.clone(),
                *active,
                *timezone_offset,
                *clear_timezone_offset,
                json_output,
            )
            .await
        }

        Commands::List { job_type, active_only } => {
            commands::list::run(&cli.database, cli.config.as_deref(), job_type.as_deref(), *active_only, json_output).await
        }

        Commands::Runs { job_id, limit } => commands::runs::run(&cli.database, *job_id, *limit, json_output).await,

        Commands::Status => commands::status::run(&cli.database, cli.config.as_deref(), json_output).await,

        Commands::Run => commands::run::run(cli.config.as_deref()).await,
    }
}
