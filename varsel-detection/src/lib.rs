//! # varsel-detection
//!
//! Matching engines for the varsel workers: exact IPv4 indicator membership
//! and rule-based condition evaluation over decoded JSON events.
//!
//! Both engines are built once at startup and read-only during the consume
//! loop; neither holds any cross-task shared state.

pub mod indicators;
pub mod rules;

pub use indicators::{IndicatorError, IndicatorTrie, LoadReport};
pub use rules::{Condition, PatternSet, Rule, RuleError, RuleMatch, RuleProfile, RuleSet};
