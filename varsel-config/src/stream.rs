//! Stream intake and alarm emission configuration.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Consumer/producer parameters for the event stream.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct StreamConfig {
    /// Topic the worker consumes events from.
    #[serde(default = "default_in_topic")]
    #[validate(custom(function = validation::validate_stream_name))]
    pub in_topic: String,

    /// Topic alarms are produced to.
    #[serde(default = "default_out_topic")]
    #[validate(custom(function = validation::validate_stream_name))]
    pub out_topic: String,

    /// Consumer group the worker joins.
    #[serde(default = "default_group")]
    #[validate(custom(function = validation::validate_stream_name))]
    pub group: String,

    /// Message key tagging every produced alarm.
    #[serde(default = "default_alarm_key")]
    #[validate(custom(function = validation::validate_alarm_key))]
    pub alarm_key: String,

    /// How often consumer progress is committed (at-least-once between
    /// commits).
    #[serde(default = "default_commit_interval_ms")]
    #[validate(range(min = 100, max = 60000))]
    pub commit_interval_ms: u64,

    /// Bounded prefetch/topic capacity before backpressure.
    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 16, max = 1048576))]
    pub queue_capacity: usize,
}

fn default_in_topic() -> String {
    "events".into()
}

fn default_out_topic() -> String {
    "alarms".into()
}

fn default_group() -> String {
    "varsel".into()
}

fn default_alarm_key() -> String {
    "ti".into()
}

fn default_commit_interval_ms() -> u64 {
    1000
}

fn default_queue_capacity() -> usize {
    10000
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            in_topic: default_in_topic(),
            out_topic: default_out_topic(),
            group: default_group(),
            alarm_key: default_alarm_key(),
            commit_interval_ms: default_commit_interval_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}
