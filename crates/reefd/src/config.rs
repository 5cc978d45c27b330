//! TOML configuration for the Reef daemon.
//!
//! Every section and field is optional; a missing file yields the defaults.

use std::path::{Path, PathBuf};

use reef_admin::AdminConfig;
use reef_plan::{ExecutorConfig, RetryPolicy};
use reef_verify::VerifyConfig;
use serde::Deserialize;
use tokio::time::Duration;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Admin identity and storage.
    pub admin: AdminSection,
    /// Plan executor tuning.
    pub executor: ExecutorSection,
    /// Plan retention.
    pub plans: PlansSection,
    /// Verification thresholds.
    pub verify: VerifyConfig,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[admin]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AdminSection {
    /// Directory holding the metadata store.
    pub data_dir: PathBuf,
    /// Name of this admin, recorded as the owner of plans it creates.
    pub name: Option<String>,
    /// Store name used for the initial empty topology.
    pub store_name: String,
}

impl Default for AdminSection {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|h| h.join(".reef"))
            .unwrap_or_else(|| PathBuf::from(".reef"));
        Self {
            data_dir,
            name: None,
            store_name: "reef".to_string(),
        }
    }
}

/// `[executor]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    /// Attempts per task, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff_ms: u64,
    /// Upper bound for a single retry delay.
    pub max_backoff_ms: u64,
    /// How long a wait-for-service task polls.
    pub wait_timeout_secs: u64,
    /// Delay between service polls.
    pub poll_interval_ms: u64,
    /// Concurrency bound for parallel task groups.
    pub max_parallel_tasks: usize,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        let executor = ExecutorConfig::default();
        Self {
            max_attempts: executor.retry.max_attempts,
            initial_backoff_ms: executor.retry.initial_backoff.as_millis() as u64,
            max_backoff_ms: executor.retry.max_backoff.as_millis() as u64,
            wait_timeout_secs: executor.wait_timeout.as_secs(),
            poll_interval_ms: executor.poll_interval.as_millis() as u64,
            max_parallel_tasks: executor.max_parallel_tasks,
        }
    }
}

/// `[plans]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PlansSection {
    /// Finished plans kept when pruning.
    pub retention: usize,
}

impl Default for PlansSection {
    fn default() -> Self {
        Self {
            retention: AdminConfig::default().plan_retention,
        }
    }
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                let config: CliConfig = toml::from_str(&content)?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Location of the metadata store.
    pub fn meta_path(&self) -> PathBuf {
        self.admin.data_dir.join("meta")
    }

    /// Executor tuning built from `[executor]`.
    pub fn executor_config(&self) -> ExecutorConfig {
        let e = &self.executor;
        ExecutorConfig {
            retry: RetryPolicy {
                max_attempts: e.max_attempts.max(1),
                initial_backoff: Duration::from_millis(e.initial_backoff_ms),
                max_backoff: Duration::from_millis(e.max_backoff_ms),
            },
            wait_timeout: Duration::from_secs(e.wait_timeout_secs),
            poll_interval: Duration::from_millis(e.poll_interval_ms),
            max_parallel_tasks: e.max_parallel_tasks.max(1),
        }
    }

    /// Admin configuration built from all sections.
    pub fn admin_config(&self) -> AdminConfig {
        AdminConfig {
            store_name: self.admin.store_name.clone(),
            owner: self.admin.name.clone(),
            executor: self.executor_config(),
            plan_retention: self.plans.retention,
            verify: self.verify.clone(),
        }
    }
}
