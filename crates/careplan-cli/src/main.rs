mod config;
mod item_cmds;
mod menu_cmd;
mod plan_cmds;
mod schedule_cmd;
#[cfg(test)]
mod test_util;

use clap::{Parser, Subcommand};
use chrono::NaiveDate;
use rust_decimal::Decimal;

use careplan_db::pool;

use config::CareplanConfig;

#[derive(Parser)]
#[command(name = "careplan", about = "Treatment plan lifecycle and auto-scheduling")]
struct Cli {
    /// Database URL (overrides CAREPLAN_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a careplan config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/careplan")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create and migrate the careplan database
    DbInit,
    /// Treatment plan management
    Plan {
        #[command(subcommand)]
        command: PlanCommands,
    },
    /// Edit or close individual plan items
    Item {
        #[command(subcommand)]
        command: ItemCommands,
    },
    /// Suggest (and optionally book) appointment slots for a plan
    Schedule(ScheduleArgs),
    /// Show the menu entries your capabilities allow
    Menu {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum PlanCommands {
    /// Create a draft plan from a TOML file
    Create {
        /// Path to the plan TOML file
        file: String,
        /// Print the created plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a plan in detail (or list all plans)
    Show {
        /// Plan code (omit to list all)
        code: Option<String>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Submit a draft plan for review
    Submit {
        code: String,
        /// Fail unless the plan is still at this version
        #[arg(long)]
        expected_version: Option<i32>,
    },
    /// Approve a plan awaiting review
    Approve {
        code: String,
        /// Reviewer notes
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        expected_version: Option<i32>,
    },
    /// Reject a plan awaiting review
    Reject {
        code: String,
        /// Reason for rejection (required)
        #[arg(long)]
        notes: String,
        #[arg(long)]
        expected_version: Option<i32>,
    },
    /// Return a rejected plan to draft
    Reopen {
        code: String,
        #[arg(long)]
        expected_version: Option<i32>,
    },
    /// Hand a later phase's items to scheduling ahead of time
    Release {
        code: String,
        /// Phase number to release
        phase: i32,
        #[arg(long)]
        expected_version: Option<i32>,
    },
    /// Cancel an approved plan
    Cancel {
        code: String,
        /// Cancellation reason
        #[arg(long)]
        reason: String,
        #[arg(long)]
        expected_version: Option<i32>,
    },
}

#[derive(Subcommand)]
pub enum ItemCommands {
    /// Change an item's name, price, or duration
    Update {
        /// Item ID
        item_id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        price: Option<Decimal>,
        /// Estimated time in minutes
        #[arg(long)]
        minutes: Option<i32>,
        #[arg(long)]
        expected_version: Option<i32>,
    },
    /// Mark an item as not needed
    Skip {
        item_id: String,
        #[arg(long)]
        expected_version: Option<i32>,
    },
    /// Record an item as done outside the booking system
    Complete {
        item_id: String,
        /// Completion note (required)
        #[arg(long)]
        note: String,
        /// Completion date (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        on: Option<NaiveDate>,
        #[arg(long)]
        expected_version: Option<i32>,
    },
}

#[derive(clap::Args)]
pub struct ScheduleArgs {
    /// Plan code
    pub code: String,
    /// Only schedule this phase
    #[arg(long)]
    pub phase: Option<i32>,
    /// Search from this date (YYYY-MM-DD) instead of the plan start
    #[arg(long)]
    pub from: Option<NaiveDate>,
    /// Days searched per item (defaults to the config value)
    #[arg(long)]
    pub days: Option<u32>,
    /// Doctor to try before the plan doctor
    #[arg(long)]
    pub doctor: Option<i64>,
    /// Per-item search timeout in seconds (defaults to the config value)
    #[arg(long)]
    pub timeout_secs: Option<u64>,
    /// Roster TOML with working hours and services per doctor
    #[arg(long)]
    pub roster: String,
    /// Reserve every suggested slot
    #[arg(long)]
    pub book: bool,
    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

/// Execute the `careplan init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
            max_connections: None,
        },
        scheduling: config::SchedulingSection::default(),
        access: None,
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!("  scheduling.max_search_days = {}", cfg.scheduling.max_search_days);
    println!();
    println!("Next: run `careplan db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `careplan db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = CareplanConfig::resolve(cli_db_url)?;

    println!("Initializing careplan database...");

    if pool::ensure_database_exists(&resolved.db_config).await? {
        println!("Created database.");
    }
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    let result = pool::run_migrations(&db_pool).await;
    db_pool.close().await;
    let applied = result?;

    println!("careplan db-init complete ({applied} migration(s) applied).");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Plan { command } => {
            let resolved = CareplanConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = plan_cmds::run_plan_command(command, &db_pool, &resolved).await;
            db_pool.close().await;
            result?;
        }
        Commands::Item { command } => {
            let resolved = CareplanConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = item_cmds::run_item_command(command, &db_pool, &resolved).await;
            db_pool.close().await;
            result?;
        }
        Commands::Schedule(args) => {
            let resolved = CareplanConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = schedule_cmd::run_schedule(&args, &db_pool, &resolved).await;
            db_pool.close().await;
            result?;
        }
        Commands::Menu { json } => {
            let resolved = CareplanConfig::resolve(cli.database_url.as_deref())?;
            menu_cmd::run_menu(&resolved.capabilities, json)?;
        }
    }

    Ok(())
}
