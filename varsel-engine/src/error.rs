use thiserror::Error;

use varsel_config::ConfigError;
use varsel_detection::{IndicatorError, RuleError};
use varsel_stream::StreamError;

/// Fatal worker errors; everything here aborts before or at the consume
/// loop. Per-message failures are handled inside the loop and never surface
/// as this type.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("indicator load failed: {0}")]
    Indicators(#[from] IndicatorError),

    #[error("rule set build failed: {0}")]
    Rules(#[from] RuleError),

    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
