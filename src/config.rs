//! Layered runtime configuration (§4.7/A2)
//!
//! Mirrors this codebase's config-loader convention: start from built-in
//! defaults, overlay an optional file, then overlay environment variables.
//! Each layer only overrides the fields it actually sets.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "workflow-runtime.db".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub default_total_budget: i64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self { default_total_budget: 100_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfigSection {
    pub max_retries: usize,
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
    pub multiplier: f64,
}

impl Default for RetryConfigSection {
    fn default() -> Self {
        Self { max_retries: 3, initial_delay_secs: 1, max_delay_secs: 60, multiplier: 2.0 }
    }
}

impl From<&RetryConfigSection> for crate::retry::RetryConfig {
    fn from(section: &RetryConfigSection) -> Self {
        crate::retry::RetryConfig::new(
            section.max_retries,
            section.initial_delay_secs,
            section.max_delay_secs,
            section.multiplier,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

/// Layered configuration for an [`crate::app::Application`] handle, loaded
/// once at construction: defaults, then an optional file, then environment
/// overrides. Never persisted by the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub database: DatabaseConfig,
    pub budget: BudgetConfig,
    pub retry: RetryConfigSection,
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    /// Build the default configuration with no file and no environment
    /// overrides applied.
    pub fn defaults() -> Self {
        Self::default()
    }

    /// Load configuration for `config_path` (optional YAML file), then apply
    /// environment-variable overrides on top.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) if path.exists() => {
                let contents = std::fs::read_to_string(path)?;
                serde_yaml::from_str(&contents).map_err(|e| {
                    crate::error::WorkflowError::Config(format!("invalid config file {}: {}", path.display(), e))
                })?
            }
            _ => Self::defaults(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Overlay recognized `WORKFLOW_*` environment variables onto `self`.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("WORKFLOW_DB_PATH") {
            self.database.path = path;
        }
        if let Ok(budget) = std::env::var("WORKFLOW_DEFAULT_BUDGET") {
            if let Ok(parsed) = budget.parse() {
                self.budget.default_total_budget = parsed;
            }
        }
        if let Ok(retries) = std::env::var("WORKFLOW_MAX_RETRIES") {
            if let Ok(parsed) = retries.parse() {
                self.retry.max_retries = parsed;
            }
        }
        if let Ok(level) = std::env::var("WORKFLOW_LOG_LEVEL") {
            self.logging.level = level;
        }
    }
}
