//! Matching-engine inputs: indicator list and rule file locations.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

/// Indicator list parameters for the address worker.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct IndicatorConfig {
    /// Plain-text file, one IPv4 address per line.
    #[serde(default = "default_indicator_file")]
    pub file: PathBuf,
}

fn default_indicator_file() -> PathBuf {
    "indicators.txt".into()
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self { file: default_indicator_file() }
    }
}

/// Rule definition file for the rule worker.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct RulesConfig {
    /// Declarative rule file consumed by the loader boundary.
    #[serde(default = "default_rules_file")]
    pub file: PathBuf,
}

fn default_rules_file() -> PathBuf {
    "rules.yaml".into()
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self { file: default_rules_file() }
    }
}
