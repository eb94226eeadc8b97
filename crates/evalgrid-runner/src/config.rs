//! Runner configuration.

use std::time::Duration;

use evalgrid_core::config::RunnerSection;
use evalgrid_core::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Maximum number of attempts in flight at once.
    pub max_workers: usize,
    /// Retries per unit after its first attempt.
    pub max_retries: u32,
    /// Wall-clock bound on a single attempt, submission included.
    pub unit_timeout: Option<Duration>,
    /// Cap for the backoff between polls that failed transiently.
    pub max_poll_backoff: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_workers: 16,
            max_retries: 2,
            unit_timeout: None,
            max_poll_backoff: Self::DEFAULT_MAX_POLL_BACKOFF,
        }
    }
}

impl RunnerConfig {
    pub const DEFAULT_MAX_POLL_BACKOFF: Duration = Duration::from_secs(60);

    pub fn from_section(section: &RunnerSection) -> Result<Self, ConfigError> {
        let config = Self {
            max_workers: section.max_workers,
            max_retries: section.max_retries,
            unit_timeout: section.unit_timeout()?,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers < 1 {
            return Err(ConfigError::invalid(
                "runner.max_workers",
                "must be at least 1",
            ));
        }
        if self.unit_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::invalid(
                "runner.unit_timeout",
                "must be greater than zero",
            ));
        }
        if self.max_poll_backoff.is_zero() {
            return Err(ConfigError::invalid(
                "runner.max_poll_backoff",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}
