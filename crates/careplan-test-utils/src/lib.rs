//! PostgreSQL harness for careplan integration tests.
//!
//! One server is shared by every test in a binary; each test works in its
//! own freshly migrated database.
//!
//! With `CAREPLAN_TEST_PG_URL` set, that server is used as-is. Otherwise a
//! container is started through testcontainers on first use and kept alive
//! in a `OnceCell` until the process exits.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use testcontainers::ContainerAsync;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use careplan_db::pool;

pub const TEST_PG_URL_VAR: &str = "CAREPLAN_TEST_PG_URL";

struct SharedPg {
    base_url: String,
    _container: Option<ContainerAsync<Postgres>>,
}

static SHARED_PG: OnceCell<SharedPg> = OnceCell::const_new();

async fn init_shared_pg() -> SharedPg {
    if let Ok(url) = std::env::var(TEST_PG_URL_VAR) {
        return SharedPg {
            base_url: url.trim_end_matches('/').to_owned(),
            _container: None,
        };
    }

    let container = Postgres::default()
        .with_tag("17")
        .start()
        .await
        .expect("failed to start PostgreSQL container");

    let host = container.get_host().await.expect("failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("failed to get mapped port");

    SharedPg {
        base_url: format!("postgresql://postgres:postgres@{host}:{port}"),
        _container: Some(container),
    }
}

/// Server root URL of the shared PostgreSQL, without a database name.
pub async fn pg_url() -> &'static str {
    let shared = SHARED_PG.get_or_init(init_shared_pg).await;
    &shared.base_url
}

async fn maintenance_pool() -> PgPool {
    let maint_url = format!("{}/postgres", pg_url().await);
    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&maint_url)
        .await
        .expect("failed to connect to maintenance database")
}

/// Create a uniquely named database with all migrations applied.
///
/// Returns `(pool, db_name)`; pass `db_name` to [`drop_test_db`] afterwards.
pub async fn create_test_db() -> (PgPool, String) {
    let maint_pool = maintenance_pool().await;
    let db_name = format!("careplan_test_{}", Uuid::new_v4().simple());
    let stmt = format!("CREATE DATABASE {db_name}");
    maint_pool
        .execute(stmt.as_str())
        .await
        .unwrap_or_else(|e| panic!("failed to create temp database {db_name}: {e}"));
    maint_pool.close().await;

    let temp_url = format!("{}/{db_name}", pg_url().await);
    let temp_pool = PgPoolOptions::new()
        .max_connections(8)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&temp_url)
        .await
        .unwrap_or_else(|e| panic!("failed to connect to temp database {db_name}: {e}"));

    pool::run_migrations(&temp_pool)
        .await
        .expect("migrations should succeed");

    (temp_pool, db_name)
}

/// Drop a database created by [`create_test_db`], terminating any
/// connections still attached to it.
pub async fn drop_test_db(db_name: &str) {
    let maint_pool = maintenance_pool().await;

    let terminate = format!(
        "SELECT pg_terminate_backend(pid) \
         FROM pg_stat_activity \
         WHERE datname = '{db_name}' AND pid <> pg_backend_pid()"
    );
    let _ = maint_pool.execute(terminate.as_str()).await;

    let stmt = format!("DROP DATABASE IF EXISTS {db_name}");
    let _ = maint_pool.execute(stmt.as_str()).await;
    maint_pool.close().await;
}
