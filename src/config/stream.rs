//! Element stream configuration

use serde::Deserialize;
use std::time::Duration;

use crate::adapters::stream::ConsumerGroup;
use crate::application::StreamConsumerConfig;

use super::error::ValidationError;

/// Element stream configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Stream the element producer writes to
    #[serde(default = "default_input_channel")]
    pub input_channel: String,

    /// Stream enriched elements are published to
    #[serde(default = "default_output_channel")]
    pub output_channel: String,

    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,

    /// Max records per read
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How long one read blocks waiting for records, in milliseconds
    #[serde(default = "default_block_ms")]
    pub block_ms: usize,

    /// Delay before reconnecting after a failed read, in seconds
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

impl StreamConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn consumer_group(&self) -> ConsumerGroup {
        ConsumerGroup {
            group: self.consumer_group.clone(),
            consumer: self.consumer_name.clone(),
            block_ms: self.block_ms,
        }
    }

    pub fn consumer_config(&self) -> StreamConsumerConfig {
        StreamConsumerConfig {
            channel: self.input_channel.clone(),
            output_channel: self.output_channel.clone(),
            batch_size: self.batch_size,
            reconnect_delay: self.reconnect_delay(),
        }
    }

    /// Validate stream configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.input_channel.trim().is_empty() {
            return Err(ValidationError::MissingRequired("STREAM__INPUT_CHANNEL"));
        }
        if self.output_channel.trim().is_empty() {
            return Err(ValidationError::MissingRequired("STREAM__OUTPUT_CHANNEL"));
        }
        if self.input_channel == self.output_channel {
            return Err(ValidationError::ChannelConflict);
        }
        if self.consumer_group.trim().is_empty() {
            return Err(ValidationError::MissingRequired("STREAM__CONSUMER_GROUP"));
        }
        if self.batch_size == 0 {
            return Err(ValidationError::MustBePositive("stream.batch_size"));
        }
        if self.reconnect_delay_secs == 0 {
            return Err(ValidationError::MustBePositive("stream.reconnect_delay_secs"));
        }
        Ok(())
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            input_channel: default_input_channel(),
            output_channel: default_output_channel(),
            consumer_group: default_consumer_group(),
            consumer_name: default_consumer_name(),
            batch_size: default_batch_size(),
            block_ms: default_block_ms(),
            reconnect_delay_secs: default_reconnect_delay(),
        }
    }
}

fn default_input_channel() -> String {
    "elements".to_string()
}

fn default_output_channel() -> String {
    "elements:enriched".to_string()
}

fn default_consumer_group() -> String {
    "cost-relay".to_string()
}

fn default_consumer_name() -> String {
    "cost-relay-1".to_string()
}

fn default_batch_size() -> usize {
    50
}

fn default_block_ms() -> usize {
    1000
}

fn default_reconnect_delay() -> u64 {
    5
}
