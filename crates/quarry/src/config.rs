//! Runtime configuration.
//!
//! Loaded from YAML and handed to [`Runtime::new`](crate::runtime::Runtime::new)
//! explicitly. Every field has a default, so an empty file is a valid config:
//!
//! ```yaml
//! scheduler:
//!   max-concurrent-queries: 4
//!   aging-interval-ms: 250
//!   max-priority: 100
//!   admission-timeout-ms: 30000
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

/// Default number of queries admitted to an instance's OLAP engine at once.
pub const DEFAULT_MAX_CONCURRENT_QUERIES: usize = 4;

/// Default wait time worth one priority level.
pub const DEFAULT_AGING_INTERVAL_MS: u64 = 250;

/// Default largest accepted priority.
pub const DEFAULT_MAX_PRIORITY: u32 = 100;

/// Default bound on waiting for an OLAP slot.
pub const DEFAULT_ADMISSION_TIMEOUT_MS: u64 = 30_000;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Query admission settings
    pub scheduler: SchedulerConfig,
}

/// Query admission settings, applied per instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct SchedulerConfig {
    /// Queries admitted to the OLAP engine at once
    pub max_concurrent_queries: usize,

    /// Milliseconds of waiting that count as one priority level
    pub aging_interval_ms: u64,

    /// Largest accepted priority
    pub max_priority: u32,

    /// Milliseconds a query may wait for a slot
    pub admission_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_queries: DEFAULT_MAX_CONCURRENT_QUERIES,
            aging_interval_ms: DEFAULT_AGING_INTERVAL_MS,
            max_priority: DEFAULT_MAX_PRIORITY,
            admission_timeout_ms: DEFAULT_ADMISSION_TIMEOUT_MS,
        }
    }
}

impl SchedulerConfig {
    /// Aging interval as a `Duration`.
    #[must_use]
    pub fn aging_interval(&self) -> Duration {
        Duration::from_millis(self.aging_interval_ms)
    }

    /// Admission timeout as a `Duration`.
    #[must_use]
    pub fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_timeout_ms)
    }
}

impl RuntimeConfig {
    /// Load and validate configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read and `Error::Config` if
    /// it does not parse or fails validation.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let config: Self = serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would make the scheduler unusable.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for zero slots or a zero aging interval.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrent_queries == 0 {
            return Err(Error::Config(
                "scheduler.max-concurrent-queries must be at least 1".to_string(),
            ));
        }
        if self.scheduler.aging_interval_ms == 0 {
            return Err(Error::Config(
                "scheduler.aging-interval-ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
