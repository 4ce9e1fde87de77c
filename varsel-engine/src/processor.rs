//! Per-message matching dispatch for the two worker flavors.

use std::net::Ipv4Addr;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use varsel_core::events::{AlarmRecord, InboundEvent};
use varsel_core::stats::StatsTracker;
use varsel_detection::indicators::IndicatorTrie;
use varsel_detection::rules::RuleSet;

/// Recoverable per-message failures: the message is logged and discarded,
/// consumption continues.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("event decode failed: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("event is not a JSON object")]
    NotAnObject,
}

/// One decoded message in, zero or more alarms out.
///
/// Runs on the single consume-loop task; implementations own their matching
/// state exclusively and share only the stats tracker.
pub trait EventProcessor: Send {
    fn process(&mut self, payload: &[u8]) -> Result<Vec<AlarmRecord>, ProcessError>;

    /// Logged once at shutdown.
    fn exit_report(&self) {}
}

/// Address worker: both event addresses against the indicator trie.
pub struct AddressProcessor {
    trie: IndicatorTrie,
    stats: StatsTracker,
}

impl AddressProcessor {
    pub fn new(trie: IndicatorTrie, stats: StatsTracker) -> Self {
        Self { trie, stats }
    }
}

impl EventProcessor for AddressProcessor {
    fn process(&mut self, payload: &[u8]) -> Result<Vec<AlarmRecord>, ProcessError> {
        let event = InboundEvent::from_bytes(payload)?;

        let bad_src = checked_addr(&event.srcip).is_some_and(|a| self.trie.contains(a));
        let bad_dst = checked_addr(&event.dstip).is_some_and(|a| self.trie.contains(a));
        if !bad_src && !bad_dst {
            return Ok(Vec::new());
        }

        // One alarm per event even when both addresses match; each matched
        // field still gets its own stat record.
        let mut alarm = AlarmRecord {
            logsource: event.logsource.clone(),
            timestamp: event.timestamp.clone(),
            kind: "TI".into(),
            summary: format!("IOC IP found in event from {}", event.logsource),
            srcip: event.srcip.clone(),
            dstip: event.dstip.clone(),
            ..AlarmRecord::default()
        };
        if bad_src {
            alarm.description = format!("At {} IP: {}", event.timestamp, event.srcip);
            self.stats.record(&event.srcip);
        }
        if bad_dst {
            alarm.description = format!("At {} IP: {}", event.timestamp, event.dstip);
            self.stats.record(&event.dstip);
        }

        Ok(vec![alarm])
    }
}

/// An unparsable runtime address is a non-match, never coerced to `0.0.0.0`.
fn checked_addr(raw: &str) -> Option<Ipv4Addr> {
    match raw.parse() {
        Ok(addr) => Some(addr),
        Err(_) => {
            debug!(address = raw, "unparsable event address treated as non-match");
            None
        }
    }
}

/// Rule worker: the full decoded event against the compiled rule set.
pub struct RuleProcessor {
    rules: RuleSet,
    stats: StatsTracker,
}

impl RuleProcessor {
    pub fn new(rules: RuleSet, stats: StatsTracker) -> Self {
        Self { rules, stats }
    }
}

impl EventProcessor for RuleProcessor {
    fn process(&mut self, payload: &[u8]) -> Result<Vec<AlarmRecord>, ProcessError> {
        let event: Value = serde_json::from_slice(payload)?;
        if !event.is_object() {
            return Err(ProcessError::NotAnObject);
        }

        let mut alarms = Vec::new();
        for rule_match in self.rules.eval_event(&event) {
            // Separate increment per extracted occurrence, not de-duplicated.
            for value in &rule_match.extracted {
                self.stats.record(value);
            }
            if let Some(text) = rule_match.alarm_text {
                alarms.push(rule_alarm(&event, &rule_match.rule, &rule_match.extracted, text));
            }
        }
        Ok(alarms)
    }

    fn exit_report(&self) {
        for profile in self.rules.profile() {
            info!(
                rule = %profile.rule,
                invocations = profile.invocations,
                mean_eval = ?profile.mean_eval_time(),
                "rule execution profile"
            );
        }
    }
}

fn rule_alarm(event: &Value, rule: &str, extracted: &[String], message: String) -> AlarmRecord {
    let field = |key: &str| {
        event
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let timestamp = field("@timestamp");
    AlarmRecord {
        logsource: field("logsource"),
        summary: format!("Rule {rule} matched in event from {}", field("logsource")),
        description: format!("At {timestamp} matched: {}", extracted.join(" , ")),
        timestamp,
        kind: "TI".into(),
        message,
        srcip: field("srcip"),
        dstip: field("dstip"),
        ..AlarmRecord::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use varsel_detection::indicators::load_indicators;
    use varsel_detection::rules::RuleFileSpec;

    fn address_processor(list: &str) -> (AddressProcessor, StatsTracker) {
        let (trie, _) = load_indicators(list.as_bytes()).unwrap();
        let stats = StatsTracker::new();
        (AddressProcessor::new(trie, stats.clone()), stats)
    }

    fn event(src: &str, dst: &str) -> Vec<u8> {
        format!(
            r#"{{"logsource":"fw1","srcip":"{src}","dstip":"{dst}","@timestamp":"2024-01-01T00:00:00Z"}}"#
        )
        .into_bytes()
    }

    #[test]
    fn src_match_emits_one_alarm_and_one_stat() {
        let (mut processor, stats) = address_processor("1.2.3.4\n");
        let alarms = processor.process(&event("1.2.3.4", "9.9.9.9")).unwrap();

        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].srcip, "1.2.3.4");
        assert_eq!(alarms[0].kind, "TI");
        assert!(alarms[0].summary.contains("fw1"));
        assert!(alarms[0].description.contains("1.2.3.4"));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].indicator, "1.2.3.4");
        assert_eq!(snapshot[0].count, 1);
    }

    #[test]
    fn both_addresses_matching_yield_one_alarm_two_stats() {
        let (mut processor, stats) = address_processor("1.2.3.4\n5.6.7.8\n");
        let alarms = processor.process(&event("1.2.3.4", "5.6.7.8")).unwrap();

        assert_eq!(alarms.len(), 1);
        // Destination wins the description when both match.
        assert!(alarms[0].description.contains("5.6.7.8"));
        assert_eq!(stats.len(), 2);
    }

    #[test]
    fn clean_event_emits_nothing() {
        let (mut processor, stats) = address_processor("1.2.3.4\n");
        let alarms = processor.process(&event("8.8.8.8", "9.9.9.9")).unwrap();
        assert!(alarms.is_empty());
        assert!(stats.is_empty());
    }

    #[test]
    fn unparsable_address_is_a_non_match_even_with_zero_indicator() {
        let (mut processor, stats) = address_processor("0.0.0.0\n");
        let alarms = processor.process(&event("not-an-ip", "garbage.1.2")).unwrap();
        assert!(alarms.is_empty());
        assert!(stats.is_empty());
    }

    #[test]
    fn malformed_payload_is_a_decode_error() {
        let (mut processor, _) = address_processor("1.2.3.4\n");
        assert!(matches!(
            processor.process(b"not json"),
            Err(ProcessError::Decode(_))
        ));
        assert!(matches!(
            processor.process(br#"{"srcip":"1.2.3.4"}"#),
            Err(ProcessError::Decode(_))
        ));
    }

    fn rule_processor() -> (RuleProcessor, StatsTracker) {
        let yaml = r#"
patterns:
  ipv4: '\b(?:\d{1,3}\.){3}\d{1,3}\b'
rules:
  - name: scanner
    condition:
      pattern: { pattern: ipv4, field: message }
    alarm: scanner address observed
"#;
        let rules = RuleFileSpec::from_yaml(yaml.as_bytes()).unwrap().compile().unwrap();
        let stats = StatsTracker::new();
        (RuleProcessor::new(rules, stats.clone()), stats)
    }

    #[test]
    fn rule_match_emits_alarm_and_records_each_extraction() {
        let (mut processor, stats) = rule_processor();
        let payload = br#"{"logsource":"ids1","@timestamp":"2024-01-01T00:00:00Z","message":"seen 1.2.3.4 and 1.2.3.4"}"#;
        let alarms = processor.process(payload).unwrap();

        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].message, "scanner address observed");
        assert!(alarms[0].summary.contains("scanner"));
        assert!(alarms[0].summary.contains("ids1"));
        assert!(alarms[0].description.contains("1.2.3.4 , 1.2.3.4"));

        // Duplicate extraction counts twice for the same indicator.
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].count, 2);
    }

    #[test]
    fn non_object_event_is_rejected() {
        let (mut processor, _) = rule_processor();
        assert!(matches!(
            processor.process(b"[1,2,3]"),
            Err(ProcessError::NotAnObject)
        ));
    }
}
