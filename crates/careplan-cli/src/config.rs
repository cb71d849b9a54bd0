//! Configuration file management for careplan.
//!
//! Provides a TOML-based config file at `~/.config/careplan/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use careplan_core::access::Capability;
use careplan_core::scheduler::DEFAULT_MAX_SEARCH_DAYS;
use careplan_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    #[serde(default)]
    pub scheduling: SchedulingSection,
    /// Absent means every capability is granted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessSection>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SchedulingSection {
    #[serde(default = "default_max_search_days")]
    pub max_search_days: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_item_timeout_secs: Option<u64>,
}

impl Default for SchedulingSection {
    fn default() -> Self {
        Self {
            max_search_days: DEFAULT_MAX_SEARCH_DAYS,
            per_item_timeout_secs: None,
        }
    }
}

fn default_max_search_days() -> u32 {
    DEFAULT_MAX_SEARCH_DAYS
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessSection {
    pub capabilities: Vec<Capability>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the careplan config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/careplan` or
/// `~/.config/careplan`, on every platform.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("careplan");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("careplan")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct CareplanConfig {
    pub db_config: DbConfig,
    pub max_search_days: u32,
    pub per_item_timeout: Option<Duration>,
    pub capabilities: BTreeSet<Capability>,
}

impl CareplanConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - DB URL: `cli_db_url` > `CAREPLAN_DATABASE_URL` env > `database.url` >
    ///   `DbConfig::DEFAULT_URL`
    /// - Scheduling and access come from the file only. Without an
    ///   `[access]` section every capability is granted.
    ///
    /// A missing file is fine; an unreadable or malformed one is an error.
    pub fn resolve(cli_db_url: Option<&str>) -> Result<Self> {
        let file_config = if config_path().exists() {
            Some(load_config()?)
        } else {
            None
        };

        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var(DbConfig::ENV_VAR) {
            url
        } else if let Some(ref cfg) = file_config {
            cfg.database.url.clone()
        } else {
            DbConfig::DEFAULT_URL.to_string()
        };

        let mut db_config = DbConfig::new(db_url);
        if let Some(n) = file_config.as_ref().and_then(|cfg| cfg.database.max_connections) {
            db_config = db_config.with_max_connections(n);
        }

        let scheduling = file_config
            .as_ref()
            .map(|cfg| (cfg.scheduling.max_search_days, cfg.scheduling.per_item_timeout_secs))
            .unwrap_or((DEFAULT_MAX_SEARCH_DAYS, None));

        let capabilities = match file_config.as_ref().and_then(|cfg| cfg.access.as_ref()) {
            Some(access) => access.capabilities.iter().copied().collect(),
            None => Capability::ALL.into_iter().collect(),
        };

        Ok(Self {
            db_config,
            max_search_days: scheduling.0,
            per_item_timeout: scheduling.1.map(Duration::from_secs),
            capabilities,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    /// Point XDG_CONFIG_HOME at a fresh temp dir for the duration of `f`.
    fn with_config_home<T>(f: impl FnOnce(&std::path::Path) -> T) -> T {
        let tmp = tempfile::TempDir::new().unwrap();
        let orig_xdg = std::env::var("XDG_CONFIG_HOME").ok();
        unsafe { std::env::set_var("XDG_CONFIG_HOME", tmp.path()) };

        let out = f(tmp.path());

        match orig_xdg {
            Some(x) => unsafe { std::env::set_var("XDG_CONFIG_HOME", x) },
            None => unsafe { std::env::remove_var("XDG_CONFIG_HOME") },
        }
        out
    }

    fn sample() -> ConfigFile {
        ConfigFile {
            database: DatabaseSection {
                url: "postgresql://filehost:5432/filedb".to_string(),
                max_connections: Some(8),
            },
            scheduling: SchedulingSection {
                max_search_days: 30,
                per_item_timeout_secs: Some(5),
            },
            access: Some(AccessSection {
                capabilities: vec![Capability::ViewPlans, Capability::ReviewPlans],
            }),
        }
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let _lock = lock_env();
        with_config_home(|home| {
            save_config(&sample()).unwrap();
            assert!(home.join("careplan/config.toml").exists());

            let loaded = load_config().unwrap();
            assert_eq!(loaded.database.url, "postgresql://filehost:5432/filedb");
            assert_eq!(loaded.scheduling.max_search_days, 30);
            assert_eq!(loaded.scheduling.per_item_timeout_secs, Some(5));
            assert_eq!(
                loaded.access.unwrap().capabilities,
                vec![Capability::ViewPlans, Capability::ReviewPlans]
            );
        });
    }

    #[cfg(unix)]
    #[test]
    fn save_config_sets_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let _lock = lock_env();
        with_config_home(|_| {
            save_config(&sample()).unwrap();
            let meta = std::fs::metadata(config_path()).unwrap();
            assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        });
    }

    #[test]
    fn minimal_file_fills_defaults() {
        let parsed: ConfigFile =
            toml::from_str("[database]\nurl = \"postgresql://h:5432/db\"\n").unwrap();
        assert_eq!(parsed.scheduling.max_search_days, DEFAULT_MAX_SEARCH_DAYS);
        assert!(parsed.scheduling.per_item_timeout_secs.is_none());
        assert!(parsed.access.is_none());
    }

    #[test]
    fn unknown_capability_is_rejected() {
        let result: Result<ConfigFile, _> = toml::from_str(
            "[database]\nurl = \"x\"\n[access]\ncapabilities = [\"launch_rockets\"]\n",
        );
        assert!(result.is_err());
    }

    #[test]
    fn resolve_with_cli_flag_overrides_all() {
        let _lock = lock_env();
        unsafe { std::env::set_var(DbConfig::ENV_VAR, "postgresql://env:5432/envdb") };

        let config = with_config_home(|_| {
            save_config(&sample()).unwrap();
            CareplanConfig::resolve(Some("postgresql://cli:5432/clidb")).unwrap()
        });
        assert_eq!(config.db_config.database_url, "postgresql://cli:5432/clidb");

        unsafe { std::env::remove_var(DbConfig::ENV_VAR) };
    }

    #[test]
    fn resolve_with_env_var_overrides_config_file() {
        let _lock = lock_env();
        unsafe { std::env::set_var(DbConfig::ENV_VAR, "postgresql://env:5432/envdb") };

        let config = with_config_home(|_| {
            save_config(&sample()).unwrap();
            CareplanConfig::resolve(None).unwrap()
        });
        assert_eq!(config.db_config.database_url, "postgresql://env:5432/envdb");
        // Non-URL settings still come from the file.
        assert_eq!(config.max_search_days, 30);

        unsafe { std::env::remove_var(DbConfig::ENV_VAR) };
    }

    #[test]
    fn resolve_reads_file_sections() {
        let _lock = lock_env();
        unsafe { std::env::remove_var(DbConfig::ENV_VAR) };

        let config = with_config_home(|_| {
            save_config(&sample()).unwrap();
            CareplanConfig::resolve(None).unwrap()
        });
        assert_eq!(config.db_config.database_url, "postgresql://filehost:5432/filedb");
        assert_eq!(config.db_config.max_connections, 8);
        assert_eq!(config.per_item_timeout, Some(Duration::from_secs(5)));
        assert_eq!(
            config.capabilities,
            BTreeSet::from([Capability::ViewPlans, Capability::ReviewPlans])
        );
    }

    #[test]
    fn resolve_defaults_when_nothing_set() {
        let _lock = lock_env();
        unsafe { std::env::remove_var(DbConfig::ENV_VAR) };

        let config = with_config_home(|_| CareplanConfig::resolve(None).unwrap());
        assert_eq!(config.db_config.database_url, DbConfig::DEFAULT_URL);
        assert_eq!(config.db_config.max_connections, DbConfig::DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.max_search_days, DEFAULT_MAX_SEARCH_DAYS);
        assert!(config.per_item_timeout.is_none());
        assert_eq!(config.capabilities.len(), Capability::ALL.len());
    }

    #[test]
    fn resolve_errors_on_malformed_file() {
        let _lock = lock_env();
        let result = with_config_home(|home| {
            let dir = home.join("careplan");
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("config.toml"), "database = 3").unwrap();
            CareplanConfig::resolve(None)
        });

        let msg = format!("{:#}", result.unwrap_err());
        assert!(msg.contains("failed to parse config file"), "unexpected error: {msg}");
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("careplan/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
