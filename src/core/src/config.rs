//! Configuration management.
//!
//! A TOML document with two tables:
//!
//! ```toml
//! [scheduler]
//! workers = 4
//! default_aging = "1s"
//! sweep_interval = "250ms"
//!
//! [[scheduler.priorities]]
//! name = "Urgent"
//! rank = 0
//!
//! [[scheduler.priorities]]
//! name = "Background"
//! rank = 100
//! aging = "0s"        # never promoted
//!
//! [telemetry.logging]
//! level = "debug"
//! ```
//!
//! Host binaries can overlay `JOBRANK__SECTION__KEY` environment variables
//! through [`Config::load`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};
use crate::priority::Priority;
use crate::scheduler::Scheduler;
use crate::telemetry::TelemetryConfig;

/// Environment variable prefix used by [`Config::load`].
pub const ENV_PREFIX: &str = "JOBRANK";

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Logging and metrics configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of parallel worker loops
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Aging timeslice for priorities without their own
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_aging: Option<Duration>,

    /// Fixed sweep interval; derived from the aging timeslices when unset
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub sweep_interval: Option<Duration>,

    /// Priority levels to register
    #[serde(default = "default_priorities")]
    pub priorities: Vec<PriorityConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            default_aging: None,
            sweep_interval: None,
            priorities: default_priorities(),
        }
    }
}

/// One priority level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityConfig {
    /// Display name
    pub name: String,

    /// Rank; lower is more urgent
    pub rank: i64,

    /// Aging timeslice. `"0s"` disables aging; absent uses the default.
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub aging: Option<Duration>,
}

impl PriorityConfig {
    pub fn new(name: impl Into<String>, rank: i64) -> Self {
        Self {
            name: name.into(),
            rank,
            aging: None,
        }
    }

    pub fn with_aging(mut self, aging: Duration) -> Self {
        self.aging = Some(aging);
        self
    }

    pub fn to_priority(&self) -> Priority {
        let priority = Priority::new(&self.name, self.rank);
        match self.aging {
            Some(aging) => priority.with_aging(aging),
            None => priority,
        }
    }
}

impl From<&Priority> for PriorityConfig {
    fn from(priority: &Priority) -> Self {
        Self {
            name: priority.name().to_string(),
            rank: priority.rank(),
            aging: priority.aging(),
        }
    }
}

fn default_workers() -> usize {
    1
}

fn default_priorities() -> Vec<PriorityConfig> {
    vec![
        PriorityConfig::new("Urgent", 0),
        PriorityConfig::new("Necessary", 10).with_aging(Duration::from_secs(1)),
        PriorityConfig::new("Background", 100).with_aging(Duration::ZERO),
    ]
}

impl SchedulerConfig {
    /// Check parameter ranges. Duplicate ranks are reported by [`build`](Self::build).
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(SchedulerError::invalid_parameter(
                "workers",
                "at least one worker is required",
            ));
        }
        if self.priorities.is_empty() {
            return Err(SchedulerError::invalid_parameter(
                "priorities",
                "at least one priority is required",
            ));
        }
        if matches!(self.default_aging, Some(d) if d.is_zero()) {
            return Err(SchedulerError::zero_duration("default_aging"));
        }
        if matches!(self.sweep_interval, Some(d) if d.is_zero()) {
            return Err(SchedulerError::zero_duration("sweep_interval"));
        }
        Ok(())
    }

    /// The configured priorities, most urgent first.
    pub fn priority_levels(&self) -> Vec<Priority> {
        let mut levels: Vec<Priority> = self
            .priorities
            .iter()
            .map(PriorityConfig::to_priority)
            .collect();
        levels.sort();
        levels
    }

    /// Look up a configured priority by name (case-insensitive).
    pub fn priority_named(&self, name: &str) -> Option<Priority> {
        self.priorities
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(PriorityConfig::to_priority)
    }

    /// Create a scheduler with every priority and timing parameter applied.
    pub fn build(&self) -> Result<Scheduler> {
        self.validate()?;

        let scheduler = Scheduler::new();
        for priority in &self.priorities {
            scheduler.add_priority(priority.to_priority())?;
        }
        if let Some(aging) = self.default_aging {
            scheduler.set_default_job_aging(aging)?;
        }
        if let Some(interval) = self.sweep_interval {
            scheduler.refresh_every(interval)?;
        }

        tracing::debug!(
            priorities = self.priorities.len(),
            default_aging = ?self.default_aging,
            sweep_interval = ?self.sweep_interval,
            "Scheduler built from configuration"
        );
        Ok(scheduler)
    }
}

impl Config {
    /// Load from an optional TOML file plus `JOBRANK__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).format(config::FileFormat::Toml))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Parse a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| {
            SchedulerError::configuration(format!("Cannot render configuration: {}", e))
                .with_source(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.scheduler.workers, 1);
        assert_eq!(config.scheduler.priorities.len(), 3);
        assert!(config.scheduler.default_aging.is_none());
    }

    #[test]
    fn test_priority_levels_sorted() {
        let config = SchedulerConfig {
            priorities: vec![
                PriorityConfig::new("Low", 50),
                PriorityConfig::new("High", 1),
            ],
            ..Default::default()
        };
        let names: Vec<_> = config
            .priority_levels()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(names, ["High", "Low"]);
    }

    #[test]
    fn test_priority_named() {
        let config = SchedulerConfig::default();
        let necessary = config.priority_named("necessary").unwrap();
        assert_eq!(necessary.rank(), 10);
        assert_eq!(necessary.aging(), Some(Duration::from_secs(1)));
        assert!(config.priority_named("missing").is_none());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = SchedulerConfig {
            workers: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate().unwrap_err().code(),
            ErrorCode::InvalidConfiguration
        );
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        let config = SchedulerConfig {
            sweep_interval: Some(Duration::ZERO),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SchedulerConfig {
            default_aging: Some(Duration::ZERO),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_priority_config_round_trip_through_priority() {
        let original = PriorityConfig::new("Necessary", 10).with_aging(Duration::from_millis(250));
        assert_eq!(PriorityConfig::from(&original.to_priority()), original);
    }
}
