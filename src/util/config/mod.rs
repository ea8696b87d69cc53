//! braid runtime configuration
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high → low):
//! 1. Environment variables (BRAID_TASK_FAILURE_POLICY, BRAID_LOG)
//! 2. Config file (braid.toml)
//! 3. Default values
//! ```
//!
//! # Example
//!
//! ```toml
//! task_failure_policy = "defer"
//!
//! [scheduler]
//! thread_name_prefix = "worker"
//! stack_size = 4194304
//!
//! [debug]
//! stop_on_entry = true
//!
//! [log]
//! level = "debug"
//! ```

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::debugger::DebugConfig;
use crate::runtime::errors::RuntimeError;
use crate::runtime::scheduler::{SchedulerConfig, TaskFailurePolicy};
use crate::util::logger::{LogConfig, LOG_ENV};

/// Environment variable overriding `task_failure_policy`.
pub const POLICY_ENV: &str = "BRAID_TASK_FAILURE_POLICY";

/// Configuration for one program run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// `fail-fast` (default) or `defer`.
    pub task_failure_policy: TaskFailurePolicy,
    pub scheduler: SchedulerConfig,
    pub debug: DebugConfig,
    pub log: LogConfig,
}

impl RuntimeConfig {
    /// Default configuration with the given failure policy.
    pub fn with_policy(policy: TaskFailurePolicy) -> Self {
        Self {
            task_failure_policy: policy,
            ..Self::default()
        }
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load `path`, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(ConfigError::Io)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        debug!("loaded config from {}", path.display());
        Ok(config.apply_env()?)
    }

    /// Apply `BRAID_TASK_FAILURE_POLICY` and `BRAID_LOG` from the process
    /// environment.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides looked up by environment variable name.
    pub fn apply_overrides<F>(
        mut self,
        lookup: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(POLICY_ENV) {
            self.task_failure_policy = raw.trim().parse().map_err(ConfigError::Policy)?;
        }
        if let Some(directive) = lookup(LOG_ENV) {
            if !directive.trim().is_empty() {
                self.log.filter = Some(directive);
            }
        }
        Ok(self)
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("{0}")]
    Policy(#[source] RuntimeError),
}
