//! Pipeline tuning

use serde::Deserialize;
use std::time::Duration;

use crate::application::CoordinatorConfig;

use super::error::ValidationError;

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// How long a batch match result is reused, in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Interval between subscriber liveness probes, in seconds
    #[serde(default = "default_liveness_interval")]
    pub liveness_interval_secs: u64,

    /// Interval between `element_update` snapshots, in seconds
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_secs: u64,

    /// Outbound messages queued per subscriber before dropping
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// Commands queued for the coordinator before senders wait
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Currency for schedule rows that carry none
    #[serde(default = "default_currency")]
    pub default_currency: String,
}

impl PipelineConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }

    /// Coordinator settings; the output channel comes from the stream section.
    pub fn coordinator_config(&self, output_channel: &str) -> CoordinatorConfig {
        CoordinatorConfig {
            output_channel: output_channel.to_string(),
            default_currency: self.default_currency.clone(),
            cache_ttl: self.cache_ttl(),
            snapshot_interval: self.snapshot_interval(),
            queue_capacity: self.queue_capacity,
        }
    }

    /// Validate pipeline configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.liveness_interval_secs == 0 {
            return Err(ValidationError::MustBePositive("pipeline.liveness_interval_secs"));
        }
        if self.snapshot_interval_secs == 0 {
            return Err(ValidationError::MustBePositive("pipeline.snapshot_interval_secs"));
        }
        if self.subscriber_buffer == 0 {
            return Err(ValidationError::MustBePositive("pipeline.subscriber_buffer"));
        }
        if self.queue_capacity == 0 {
            return Err(ValidationError::MustBePositive("pipeline.queue_capacity"));
        }
        let currency = self.default_currency.as_str();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ValidationError::InvalidCurrency(self.default_currency.clone()));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl(),
            liveness_interval_secs: default_liveness_interval(),
            snapshot_interval_secs: default_snapshot_interval(),
            subscriber_buffer: default_subscriber_buffer(),
            queue_capacity: default_queue_capacity(),
            default_currency: default_currency(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_liveness_interval() -> u64 {
    30
}

fn default_snapshot_interval() -> u64 {
    10
}

fn default_subscriber_buffer() -> usize {
    256
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_currency() -> String {
    "CHF".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.liveness_interval(), Duration::from_secs(30));
        assert_eq!(config.default_currency, "CHF");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_cache_ttl_is_allowed() {
        let config = PipelineConfig {
            cache_ttl_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_coordinator_config_mapping() {
        let coordinator = PipelineConfig::default().coordinator_config("out");
        assert_eq!(coordinator.output_channel, "out");
        assert_eq!(coordinator.queue_capacity, 1024);
        assert_eq!(coordinator.snapshot_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_validation_bad_currency() {
        let config = PipelineConfig {
            default_currency: "chf".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidCurrency(_))
        ));
    }

    #[test]
    fn test_validation_zero_liveness() {
        let config = PipelineConfig {
            liveness_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
