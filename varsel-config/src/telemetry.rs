//! Observability configuration.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

/// Telemetry configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct TelemetryConfig {
    /// Port the read-only metrics surface listens on.
    #[serde(default = "default_metrics_port")]
    #[validate(range(min = 1, max = 65535))]
    pub metrics_port: u16,
}

fn default_metrics_port() -> u16 {
    9641
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { metrics_port: default_metrics_port() }
    }
}
