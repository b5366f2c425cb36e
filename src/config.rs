//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Capacity of the bounded command queue.
    pub queue_capacity: usize,
    /// Default deadline for request/response tool operations.
    pub submit_timeout: Duration,
    /// Workers holding a task longer than this are reported as stuck.
    pub max_task_duration: Duration,
    /// Identical messages to the same worker inside this window are suppressed.
    pub dedup_window: Duration,
    /// Interval between consistency sweeps.
    pub sweep_interval: Duration,
    /// Grace period given to a worker on a non-forced stop.
    pub stop_grace_period: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            submit_timeout: Duration::from_secs(30),
            max_task_duration: Duration::from_secs(30 * 60), // 30 minutes
            dedup_window: Duration::from_millis(5000),
            sweep_interval: Duration::from_secs(60),
            stop_grace_period: Duration::from_secs(10),
        }
    }
}

impl OrchestratorConfig {
    /// Build config from environment variables, falling back to defaults for
    /// anything unset. A set-but-unparsable value is an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            queue_capacity: env_parse("ORCHESTRATOR_QUEUE_CAPACITY")?
                .unwrap_or(defaults.queue_capacity),
            submit_timeout: env_parse("ORCHESTRATOR_SUBMIT_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.submit_timeout),
            max_task_duration: env_parse("ORCHESTRATOR_MAX_TASK_DURATION_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_task_duration),
            dedup_window: env_parse("ORCHESTRATOR_DEDUP_WINDOW_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.dedup_window),
            sweep_interval: env_parse("ORCHESTRATOR_SWEEP_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            stop_grace_period: env_parse("ORCHESTRATOR_STOP_GRACE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.stop_grace_period),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the processor and sweep cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity", "must be at least 1"));
        }
        for (key, value) in [
            ("submit_timeout", self.submit_timeout),
            ("max_task_duration", self.max_task_duration),
            ("dedup_window", self.dedup_window),
            ("sweep_interval", self.sweep_interval),
        ] {
            if value.is_zero() {
                return Err(invalid(key, "must be greater than zero"));
            }
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::ParseError(format!("{key}={raw:?} is not a valid number"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.max_task_duration, Duration::from_secs(1800));
    }

    #[test]
    fn zero_capacity_rejected() {
        let config = OrchestratorConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "queue_capacity"));
    }

    #[test]
    fn zero_dedup_window_rejected() {
        let config = OrchestratorConfig {
            dedup_window: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unset_env_falls_back() {
        let parsed: Option<u64> = env_parse("ORCHESTRATOR_TEST_UNSET_VARIABLE").unwrap();
        assert!(parsed.is_none());
    }
}
