use std::env;

/// Database configuration.
///
/// Reads from the `CAREPLAN_DATABASE_URL` environment variable, falling back
/// to `postgresql://localhost:5432/careplan` when unset.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full PostgreSQL connection URL.
    pub database_url: String,
    /// Upper bound on pooled connections.
    pub max_connections: u32,
}

impl DbConfig {
    /// The default connection URL used when no environment variable is set.
    pub const DEFAULT_URL: &str = "postgresql://localhost:5432/careplan";

    /// Environment variable consulted by [`DbConfig::from_env`].
    pub const ENV_VAR: &str = "CAREPLAN_DATABASE_URL";

    pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

    /// Build a config from the environment.
    pub fn from_env() -> Self {
        Self::new(env::var(Self::ENV_VAR).unwrap_or_else(|_| Self::DEFAULT_URL.to_owned()))
    }

    /// Build a config from an explicit URL (CLI flags, tests).
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Override the pool size. Zero is raised to one.
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    /// Extract the database name from the URL.
    pub fn database_name(&self) -> Option<&str> {
        self.database_url
            .rsplit('/')
            .next()
            .map(|s| s.split('?').next().unwrap_or(s))
            .filter(|s| !s.is_empty())
    }

    /// URL of the `postgres` maintenance database on the same host, used to
    /// issue `CREATE DATABASE`.
    pub fn maintenance_url(&self) -> String {
        match self.database_url.rfind('/') {
            Some(pos) => format!("{}/postgres", &self.database_url[..pos]),
            None => self.database_url.clone(),
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
