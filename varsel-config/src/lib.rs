//! # varsel Configuration System
//!
//! Hierarchical configuration for the varsel workers: defaults, an optional
//! YAML file, then `VARSEL_*` environment overrides, validated before use.

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod error;
mod matching;
mod stream;
mod telemetry;
mod validation;

pub use error::ConfigError;
pub use matching::{IndicatorConfig, RulesConfig};
pub use stream::StreamConfig;
pub use telemetry::TelemetryConfig;

/// Top-level configuration container for a varsel worker process.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone)]
pub struct VarselConfig {
    /// Event intake and alarm emission parameters.
    #[validate(nested)]
    pub stream: StreamConfig,

    /// Indicator list for the address worker.
    #[validate(nested)]
    pub indicators: IndicatorConfig,

    /// Rule file for the rule worker.
    #[validate(nested)]
    pub rules: RulesConfig,

    /// Metrics surface parameters.
    #[validate(nested)]
    pub telemetry: TelemetryConfig,
}

impl VarselConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default values
    /// 2. `config/varsel.yaml` - base settings; missing file means defaults.
    /// 3. `VARSEL_*` environment variables (`__` separates nesting).
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(VarselConfig::default()));

        if Path::new("config/varsel.yaml").exists() {
            figment = figment.merge(Yaml::file("config/varsel.yaml"));
        }

        figment
            .merge(Env::prefixed("VARSEL_").split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }

    /// Load configuration from a specific path, still honoring environment
    /// overrides.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        Figment::from(Serialized::defaults(VarselConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("VARSEL_").split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_validates() {
        let config = VarselConfig::default();
        config.validate().expect("default config should validate");
        assert_eq!(config.stream.in_topic, "events");
        assert_eq!(config.stream.alarm_key, "ti");
    }

    #[test]
    fn loads_overrides_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "stream:\n  in_topic: fw-events\n  commit_interval_ms: 500\ntelemetry:\n  metrics_port: 1234"
        )
        .unwrap();

        let config = VarselConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.stream.in_topic, "fw-events");
        assert_eq!(config.stream.commit_interval_ms, 500);
        assert_eq!(config.telemetry.metrics_port, 1234);
        // Untouched sections keep their defaults.
        assert_eq!(config.stream.out_topic, "alarms");
    }

    #[test]
    fn rejects_invalid_values() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "stream:\n  in_topic: 'has space'").unwrap();
        assert!(matches!(
            VarselConfig::load_from_path(file.path()),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn missing_file_is_reported() {
        assert!(matches!(
            VarselConfig::load_from_path("/nonexistent/varsel.yaml"),
            Err(ConfigError::FileNotFound(_))
        ));
    }
}
