//! Connection pools and schema setup.
//!
//! Each CLI command opens one pool and closes it before exiting. The schema
//! ships as embedded migrations; `db-init` creates the database on first use
//! and applies whatever is pending.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tracing::{debug, info};

use crate::config::DbConfig;

/// Embedded from `crates/careplan-db/migrations/`.
pub static MIGRATOR: Migrator = sqlx::migrate!();

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest identifier PostgreSQL keeps without truncating.
const MAX_IDENTIFIER_LEN: usize = 63;

async fn connect(url: &str, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(url)
        .await
        .with_context(|| format!("failed to connect to database at {url}"))
}

pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    connect(&config.database_url, config.max_connections).await
}

/// Apply pending migrations. Returns how many were new.
pub async fn run_migrations(pool: &PgPool) -> Result<usize> {
    let before = applied_migrations(pool).await?;
    MIGRATOR
        .run(pool)
        .await
        .context("failed to apply careplan migrations")?;
    let applied = applied_migrations(pool).await?.saturating_sub(before);

    info!(applied, known = MIGRATOR.iter().count(), "schema up to date");
    Ok(applied)
}

async fn applied_migrations(pool: &PgPool) -> Result<usize> {
    // The bookkeeping table appears with the first migration run.
    let tracked: bool = sqlx::query_scalar("SELECT to_regclass('_sqlx_migrations') IS NOT NULL")
        .fetch_one(pool)
        .await
        .context("failed to look up the migrations table")?;
    if !tracked {
        return Ok(0);
    }

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success")
        .fetch_one(pool)
        .await
        .context("failed to count applied migrations")?;
    Ok(usize::try_from(count).unwrap_or(0))
}

/// Create the configured database unless it already exists. Returns whether
/// it was created.
pub async fn ensure_database_exists(config: &DbConfig) -> Result<bool> {
    let name = config
        .database_name()
        .context("database URL does not name a database")?;
    check_identifier(name)?;

    let admin = connect(&config.maintenance_url(), 1).await?;
    let created = create_if_missing(&admin, name).await;
    admin.close().await;
    created
}

async fn create_if_missing(admin: &PgPool, name: &str) -> Result<bool> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(name)
            .fetch_one(admin)
            .await
            .context("failed to query pg_database")?;
    if exists {
        debug!(db = name, "database already present");
        return Ok(false);
    }

    admin
        .execute(format!("CREATE DATABASE \"{name}\"").as_str())
        .await
        .with_context(|| format!("failed to create database {name}"))?;
    info!(db = name, "database created");
    Ok(true)
}

/// `CREATE DATABASE` takes no bind parameters, so the name is spliced into
/// the statement and must be a plain identifier.
fn check_identifier(name: &str) -> Result<()> {
    let valid = name.len() <= MAX_IDENTIFIER_LEN
        && name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        bail!("database name {name:?} is not a plain identifier");
    }
    Ok(())
}
