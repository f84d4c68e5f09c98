//! Configuration management for Echoes
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EchoesError, Result};
use crate::store::CollectionRef;

/// Store backends understood by [`crate::store::create_store`]
pub const STORE_BACKENDS: [&str; 2] = ["memory", "sqlite"];

/// Main configuration structure for Echoes
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Application identity; selects the shared posts collection
    #[serde(default)]
    pub app: AppConfig,
    /// Document store settings
    #[serde(default)]
    pub store: StoreConfig,
    /// Session settings
    #[serde(default)]
    pub session: SessionConfig,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Application identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Id used in the collection path `artifacts/{app_id}/public/data/thoughts`
    #[serde(default = "default_app_id")]
    pub app_id: String,
}

fn default_app_id() -> String {
    "default-app-id".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_id: default_app_id(),
        }
    }
}

/// Document store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend to use: "sqlite" (persistent) or "memory" (process-local)
    #[serde(default = "default_backend")]
    pub backend: String,

    /// SQLite backend settings
    #[serde(default)]
    pub sqlite: SqliteConfig,
}

fn default_backend() -> String {
    "sqlite".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            sqlite: SqliteConfig::default(),
        }
    }
}

/// SQLite backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database file; the platform data directory is used when unset
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// How often subscriptions look for commits from other processes (ms)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl SqliteConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: None,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionConfig {
    /// Pre-issued token to sign in with instead of anonymous sign-in
    #[serde(default)]
    pub initial_auth_token: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json_format: bool,

    /// Also append logs to this file
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

fn default_log_level() -> String {
    "echoes=warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// A missing file is not an error; defaults are used instead. Logging is
    /// not up yet at this point, so callers report the missing file.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| EchoesError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| EchoesError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(app_id) = std::env::var("ECHOES_APP_ID") {
            self.app.app_id = app_id;
        }

        if let Ok(backend) = std::env::var("ECHOES_STORE") {
            self.store.backend = backend.to_lowercase();
        }

        // Like --db: a database path selects sqlite unless a backend is named.
        if let Ok(db) = std::env::var("ECHOES_DB") {
            self.store.sqlite.path = Some(PathBuf::from(db));
            if std::env::var_os("ECHOES_STORE").is_none() {
                self.store.backend = "sqlite".to_string();
            }
        }

        if let Ok(interval) = std::env::var("ECHOES_POLL_INTERVAL_MS") {
            match interval.parse::<u64>() {
                Ok(v) => {
                    self.store.sqlite.poll_interval_ms = v;
                    tracing::debug!(poll_interval_ms = v, "Env override: ECHOES_POLL_INTERVAL_MS");
                }
                Err(_) => {
                    tracing::warn!("Invalid value for ECHOES_POLL_INTERVAL_MS: {}", interval);
                }
            }
        }

        if let Ok(token) = std::env::var("ECHOES_INITIAL_AUTH_TOKEN") {
            if !token.is_empty() {
                self.session.initial_auth_token = Some(token);
            }
        }

        if let Ok(level) = std::env::var("ECHOES_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(json_logs) = std::env::var("ECHOES_JSON_LOGS") {
            match json_logs.parse::<bool>() {
                Ok(v) => self.logging.json_format = v,
                Err(_) => {
                    tracing::warn!("Invalid value for ECHOES_JSON_LOGS: {}", json_logs);
                }
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(backend) = &cli.store {
            self.store.backend = backend.to_lowercase();
        }
        if let Some(db) = &cli.db {
            self.store.sqlite.path = Some(db.clone());
            if cli.store.is_none() {
                self.store.backend = "sqlite".to_string();
            }
        }
        if cli.verbose {
            self.logging.level = "echoes=debug".to_string();
        }
    }

    /// The shared posts collection for the configured app.
    pub fn collection(&self) -> CollectionRef {
        CollectionRef::posts_for_app(&self.app.app_id)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`EchoesError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.app.app_id.trim().is_empty() {
            return Err(EchoesError::Config("app.app_id cannot be empty".to_string()).into());
        }
        if self.app.app_id.contains('/') {
            return Err(EchoesError::Config("app.app_id cannot contain '/'".to_string()).into());
        }

        if !STORE_BACKENDS.contains(&self.store.backend.as_str()) {
            return Err(EchoesError::Config(format!(
                "Invalid store backend: {}. Must be one of: {}",
                self.store.backend,
                STORE_BACKENDS.join(", ")
            ))
            .into());
        }

        if self.store.sqlite.poll_interval_ms == 0 {
            return Err(EchoesError::Config(
                "store.sqlite.poll_interval_ms must be greater than 0".to_string(),
            )
            .into());
        }

        if self.logging.level.trim().is_empty() {
            return Err(EchoesError::Config("logging.level cannot be empty".to_string()).into());
        }

        Ok(())
    }
}
