//! Rule set and condition evaluation for the rule-based worker.
//!
//! A rule set is compiled once at startup: every named pattern becomes a
//! compiled regex, and every condition tree is checked against the pattern
//! table. Compilation failure is fatal; the set never runs partially
//! compiled. Evaluation is pure except for the per-rule profiling counters,
//! which feed only the end-of-run report.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("pattern `{name}` failed to compile: {source}")]
    PatternCompile {
        name: String,
        #[source]
        source: regex::Error,
    },
    #[error("rule `{rule}` references unknown pattern `{pattern}`")]
    UnknownPattern { rule: String, pattern: String },
    #[error("rule definition error: {0}")]
    Definition(#[from] serde_yaml::Error),
    #[error("rule file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Named patterns compiled ahead of the consume loop.
#[derive(Debug, Default)]
pub struct PatternSet {
    patterns: HashMap<String, Regex>,
}

impl PatternSet {
    /// Compiles every named definition; any failure aborts compilation.
    pub fn compile<I>(definitions: I) -> Result<Self, RuleError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut patterns = HashMap::new();
        for (name, pattern) in definitions {
            let regex = Regex::new(&pattern)
                .map_err(|source| RuleError::PatternCompile { name: name.clone(), source })?;
            patterns.insert(name, regex);
        }
        Ok(Self { patterns })
    }

    fn get(&self, name: &str) -> Option<&Regex> {
        self.patterns.get(name)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Condition tree evaluated against a decoded event.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Named pattern applied to one event field; extracts every
    /// non-overlapping match.
    Pattern { pattern: String, field: String },
    /// Literal field equality; extracts the matched value.
    Equals { field: String, value: String },
    /// Logical AND, short-circuits on the first false branch.
    All(Vec<Condition>),
    /// Logical OR, short-circuits on the first true branch.
    Any(Vec<Condition>),
    /// Logical NOT; discards inner extractions.
    Not(Box<Condition>),
}

/// Result of evaluating a condition: whether it matched and the concrete
/// strings to attribute as indicators, in evaluation order with duplicates
/// preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub matched: bool,
    pub extracted: Vec<String>,
}

impl Outcome {
    fn no_match() -> Self {
        Self::default()
    }
}

impl Condition {
    pub fn eval(&self, patterns: &PatternSet, event: &Value) -> Outcome {
        match self {
            Condition::Pattern { pattern, field } => {
                let Some(text) = field_as_string(event, field) else {
                    return Outcome::no_match();
                };
                // Reference validated at compile time.
                let Some(regex) = patterns.get(pattern) else {
                    return Outcome::no_match();
                };
                let extracted: Vec<String> =
                    regex.find_iter(&text).map(|m| m.as_str().to_string()).collect();
                Outcome { matched: !extracted.is_empty(), extracted }
            }
            Condition::Equals { field, value } => match field_as_string(event, field) {
                Some(text) if text == *value => Outcome {
                    matched: true,
                    extracted: vec![value.clone()],
                },
                _ => Outcome::no_match(),
            },
            Condition::All(branches) => {
                let mut extracted = Vec::new();
                for branch in branches {
                    let outcome = branch.eval(patterns, event);
                    if !outcome.matched {
                        return Outcome::no_match();
                    }
                    extracted.extend(outcome.extracted);
                }
                Outcome { matched: true, extracted }
            }
            Condition::Any(branches) => {
                for branch in branches {
                    let outcome = branch.eval(patterns, event);
                    if outcome.matched {
                        return outcome;
                    }
                }
                Outcome::no_match()
            }
            Condition::Not(inner) => Outcome {
                matched: !inner.eval(patterns, event).matched,
                extracted: Vec::new(),
            },
        }
    }

    /// Checks that every referenced pattern exists in the compiled set.
    fn validate(&self, rule: &str, patterns: &PatternSet) -> Result<(), RuleError> {
        match self {
            Condition::Pattern { pattern, .. } => {
                if patterns.get(pattern).is_none() {
                    return Err(RuleError::UnknownPattern {
                        rule: rule.to_string(),
                        pattern: pattern.clone(),
                    });
                }
                Ok(())
            }
            Condition::Equals { .. } => Ok(()),
            Condition::All(branches) | Condition::Any(branches) => {
                branches.iter().try_for_each(|b| b.validate(rule, patterns))
            }
            Condition::Not(inner) => inner.validate(rule, patterns),
        }
    }
}

/// Scalar event fields are matched by their string form; structured fields
/// never match.
fn field_as_string(event: &Value, field: &str) -> Option<String> {
    match event.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// One compiled rule plus its profiling counters.
#[derive(Debug)]
pub struct Rule {
    pub name: String,
    pub condition: Condition,
    /// Emit an alarm when this rule matches.
    pub rise_alarm: bool,
    /// Skip the remaining rules for the event when this rule matches.
    pub stop_action: bool,
    /// Alarm message template carried into the emitted record.
    pub alarm_text: String,
    invocations: u64,
    eval_time: Duration,
}

impl Rule {
    pub fn new(
        name: impl Into<String>,
        condition: Condition,
        rise_alarm: bool,
        stop_action: bool,
        alarm_text: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            condition,
            rise_alarm,
            stop_action,
            alarm_text: alarm_text.into(),
            invocations: 0,
            eval_time: Duration::ZERO,
        }
    }
}

/// A positive match from one rule for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub rule: String,
    /// Present iff the rule carries `rise_alarm`; exactly one alarm per
    /// matching rule, never one per extracted value.
    pub alarm_text: Option<String>,
    pub extracted: Vec<String>,
}

/// Per-rule execution profile for the end-of-run report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleProfile {
    pub rule: String,
    pub invocations: u64,
    pub total_eval_time: Duration,
}

impl RuleProfile {
    pub fn mean_eval_time(&self) -> Duration {
        if self.invocations == 0 {
            Duration::ZERO
        } else {
            self.total_eval_time / self.invocations as u32
        }
    }
}

/// Ordered set of compiled rules sharing one pattern table.
#[derive(Debug)]
pub struct RuleSet {
    patterns: PatternSet,
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Builds a rule set, rejecting any condition that references a pattern
    /// missing from the compiled table.
    pub fn new(patterns: PatternSet, rules: Vec<Rule>) -> Result<Self, RuleError> {
        for rule in &rules {
            rule.condition.validate(&rule.name, &patterns)?;
        }
        Ok(Self { patterns, rules })
    }

    /// Evaluates every rule in declaration order against one event.
    ///
    /// A matching rule with `stop_action` set ends evaluation for this
    /// event. Profiling counters accumulate for each rule actually invoked,
    /// regardless of outcome.
    pub fn eval_event(&mut self, event: &Value) -> Vec<RuleMatch> {
        let patterns = &self.patterns;
        let mut matches = Vec::new();
        for rule in &mut self.rules {
            let started = Instant::now();
            let outcome = rule.condition.eval(patterns, event);
            rule.invocations += 1;
            rule.eval_time += started.elapsed();

            if outcome.matched {
                matches.push(RuleMatch {
                    rule: rule.name.clone(),
                    alarm_text: rule.rise_alarm.then(|| rule.alarm_text.clone()),
                    extracted: outcome.extracted,
                });
                if rule.stop_action {
                    break;
                }
            }
        }
        matches
    }

    pub fn profile(&self) -> Vec<RuleProfile> {
        self.rules
            .iter()
            .map(|r| RuleProfile {
                rule: r.name.clone(),
                invocations: r.invocations,
                total_eval_time: r.eval_time,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

/// Declarative rule-file representation produced by the external loader
/// boundary. Deserialized with serde; the core never parses rule text
/// itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleFileSpec {
    /// Named pattern definitions, compiled up front.
    pub patterns: HashMap<String, String>,
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub condition: ConditionSpec,
    #[serde(default = "default_true")]
    pub rise_alarm: bool,
    #[serde(default)]
    pub stop_action: bool,
    #[serde(default)]
    pub alarm: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionSpec {
    Pattern { pattern: String, field: String },
    Equals { field: String, value: String },
    All(Vec<ConditionSpec>),
    Any(Vec<ConditionSpec>),
    Not(Box<ConditionSpec>),
}

fn default_true() -> bool {
    true
}

impl From<ConditionSpec> for Condition {
    fn from(spec: ConditionSpec) -> Self {
        match spec {
            ConditionSpec::Pattern { pattern, field } => Condition::Pattern { pattern, field },
            ConditionSpec::Equals { field, value } => Condition::Equals { field, value },
            ConditionSpec::All(branches) => {
                Condition::All(branches.into_iter().map(Into::into).collect())
            }
            ConditionSpec::Any(branches) => {
                Condition::Any(branches.into_iter().map(Into::into).collect())
            }
            ConditionSpec::Not(inner) => Condition::Not(Box::new((*inner).into())),
        }
    }
}

impl RuleFileSpec {
    pub fn from_yaml<R: Read>(reader: R) -> Result<Self, RuleError> {
        Ok(serde_yaml::from_reader(reader)?)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, RuleError> {
        let file = std::fs::File::open(path)?;
        Self::from_yaml(file)
    }

    /// Compiles the declarative form into the runtime rule set.
    pub fn compile(self) -> Result<RuleSet, RuleError> {
        let patterns = PatternSet::compile(self.patterns)?;
        let rules = self
            .rules
            .into_iter()
            .map(|spec| {
                Rule::new(
                    spec.name,
                    spec.condition.into(),
                    spec.rise_alarm,
                    spec.stop_action,
                    spec.alarm,
                )
            })
            .collect();
        RuleSet::new(patterns, rules)
    }
}
