//! End-to-end worker runs over the in-process broker.

use std::io::Write;
use std::time::Duration;

use bytes::Bytes;

use varsel_config::VarselConfig;
use varsel_core::stats::StatsTracker;
use varsel_detection::indicators::load_indicators;
use varsel_detection::rules::RuleFileSpec;
use varsel_engine::{
    run_address_worker_on, run_rule_worker_on, run_worker, stream_broker, AddressProcessor,
    RuleProcessor,
};
use varsel_stream::memory::MemoryBroker;
use varsel_stream::{Message, StreamError};

const COMMIT_INTERVAL: Duration = Duration::from_secs(1);

/// Resolves once `topic` holds `expected` messages, releasing the worker's
/// blocked fetch at the next iteration boundary.
async fn topic_reached(broker: MemoryBroker, topic: &str, expected: usize) {
    for _ in 0..400 {
        if broker.messages(topic).len() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {expected} messages on {topic}, have {}", broker.messages(topic).len());
}

async fn alarms_reached(broker: MemoryBroker, expected: usize) {
    topic_reached(broker, "alarms", expected).await
}

/// Resolves once the consumer has read `expected` messages.
async fn reads_reached(stats: varsel_stream::ConsumerStatsHandle, expected: u64) {
    for _ in 0..400 {
        if stats.snapshot().messages_read >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {expected} reads, have {}", stats.snapshot().messages_read);
}

#[tokio::test]
async fn address_worker_emits_one_alarm_per_matching_event() {
    let broker = MemoryBroker::new();
    broker
        .publish(
            "events",
            Message::new(
                &br#"{"logsource":"fw1","srcip":"1.2.3.4","dstip":"9.9.9.9","@timestamp":"2024-01-01T00:00:00Z"}"#[..],
            ),
        )
        .unwrap();

    let consumer = broker.consumer("events", "varsel", COMMIT_INTERVAL);
    let producer = broker.producer("alarms");
    let (trie, _) = load_indicators("1.2.3.4\n".as_bytes()).unwrap();
    let stats = StatsTracker::new();
    let mut processor = AddressProcessor::new(trie, stats.clone());
    let recorder = varsel_telemetry::MetricsRecorder::new();

    let summary = run_worker(
        consumer,
        &producer,
        &mut processor,
        Bytes::from("ti"),
        &recorder,
        alarms_reached(broker.clone(), 1),
    )
    .await
    .unwrap();

    assert_eq!(summary.messages, 1);
    assert_eq!(summary.alarms, 1);
    assert_eq!(summary.discarded, 0);

    let alarms = broker.messages("alarms");
    assert_eq!(alarms.len(), 1);
    assert_eq!(alarms[0].key.as_deref(), Some(b"ti".as_slice()));
    let alarm: serde_json::Value = serde_json::from_slice(&alarms[0].value).unwrap();
    assert_eq!(alarm["srcip"], "1.2.3.4");
    assert_eq!(alarm["type"], "TI");
    assert!(alarm["summary"].as_str().unwrap().contains("fw1"));

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].indicator, "1.2.3.4");
    assert_eq!(snapshot[0].count, 1);
}

#[tokio::test]
async fn malformed_messages_are_discarded_and_consumption_continues() {
    let broker = MemoryBroker::new();
    broker.publish("events", Message::new(&b"not json"[..])).unwrap();
    broker
        .publish(
            "events",
            Message::new(
                &br#"{"logsource":"fw1","srcip":"1.2.3.4","dstip":"9.9.9.9","@timestamp":"2024-01-01T00:00:00Z"}"#[..],
            ),
        )
        .unwrap();

    let consumer = broker.consumer("events", "varsel", COMMIT_INTERVAL);
    let producer = broker.producer("alarms");
    let (trie, _) = load_indicators("1.2.3.4\n".as_bytes()).unwrap();
    let mut processor = AddressProcessor::new(trie, StatsTracker::new());
    let recorder = varsel_telemetry::MetricsRecorder::new();

    let summary = run_worker(
        consumer,
        &producer,
        &mut processor,
        Bytes::from("ti"),
        &recorder,
        alarms_reached(broker.clone(), 1),
    )
    .await
    .unwrap();

    assert_eq!(summary.messages, 2);
    assert_eq!(summary.discarded, 1);
    assert_eq!(summary.alarms, 1);
}

#[tokio::test]
async fn non_matching_events_produce_no_alarms() {
    let broker = MemoryBroker::new();
    for i in 0..3 {
        broker
            .publish(
                "events",
                Message::new(format!(
                    r#"{{"logsource":"fw1","srcip":"8.8.8.{i}","dstip":"9.9.9.9","@timestamp":"t"}}"#
                )),
            )
            .unwrap();
    }

    let consumer = broker.consumer("events", "varsel", COMMIT_INTERVAL);
    let reads = varsel_stream::EventSource::stats(&consumer);
    let producer = broker.producer("alarms");
    let (trie, _) = load_indicators("1.2.3.4\n".as_bytes()).unwrap();
    let mut processor = AddressProcessor::new(trie, StatsTracker::new());
    let recorder = varsel_telemetry::MetricsRecorder::new();

    let summary = run_worker(
        consumer,
        &producer,
        &mut processor,
        Bytes::from("ti"),
        &recorder,
        reads_reached(reads, 3),
    )
    .await
    .unwrap();

    assert_eq!(summary.messages, 3);
    assert_eq!(summary.alarms, 0);
    assert!(broker.messages("alarms").is_empty());
}

#[tokio::test]
async fn rule_worker_stops_at_stop_action_and_records_extractions() {
    let yaml = r#"
patterns:
  ipv4: '\b(?:\d{1,3}\.){3}\d{1,3}\b'
  evil: 'evil\.[a-z]+'
rules:
  - name: scanner
    condition:
      pattern: { pattern: ipv4, field: message }
    stop_action: true
    alarm: scanner address observed
  - name: never-reached
    condition:
      pattern: { pattern: evil, field: host }
    alarm: should not fire
"#;
    let rules = RuleFileSpec::from_yaml(yaml.as_bytes()).unwrap().compile().unwrap();

    let broker = MemoryBroker::new();
    broker
        .publish(
            "events",
            Message::new(
                &br#"{"logsource":"ids1","@timestamp":"2024-01-01T00:00:00Z","message":"hit 1.2.3.4","host":"evil.example"}"#[..],
            ),
        )
        .unwrap();

    let consumer = broker.consumer("events", "varsel", COMMIT_INTERVAL);
    let producer = broker.producer("alarms");
    let stats = StatsTracker::new();
    let mut processor = RuleProcessor::new(rules, stats.clone());
    let recorder = varsel_telemetry::MetricsRecorder::new();

    let summary = run_worker(
        consumer,
        &producer,
        &mut processor,
        Bytes::from("rules"),
        &recorder,
        alarms_reached(broker.clone(), 1),
    )
    .await
    .unwrap();

    assert_eq!(summary.alarms, 1);
    let alarms = broker.messages("alarms");
    let alarm: serde_json::Value = serde_json::from_slice(&alarms[0].value).unwrap();
    assert_eq!(alarm["message"], "scanner address observed");
    assert!(alarm["summary"].as_str().unwrap().contains("scanner"));

    // The second rule never ran, so its extraction never hit the stats.
    let snapshot = stats.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].indicator, "1.2.3.4");
}

#[tokio::test]
async fn broker_run_honors_configured_stream_parameters() {
    let mut indicators = tempfile::NamedTempFile::new().unwrap();
    writeln!(indicators, "1.2.3.4").unwrap();

    let mut config = VarselConfig::default();
    config.indicators.file = indicators.path().to_path_buf();
    config.stream.in_topic = "fw-events".into();
    config.stream.out_topic = "fw-alarms".into();
    config.stream.group = "team-a".into();
    config.stream.commit_interval_ms = 100;
    config.stream.queue_capacity = 16;

    let broker = stream_broker(&config.stream);
    broker
        .publish(
            "fw-events",
            Message::new(
                &br#"{"logsource":"fw1","srcip":"1.2.3.4","dstip":"9.9.9.9","@timestamp":"2024-01-01T00:00:00Z"}"#[..],
            ),
        )
        .unwrap();

    let summary = run_address_worker_on(
        &broker,
        config,
        topic_reached(broker.clone(), "fw-alarms", 1),
    )
    .await
    .unwrap();

    assert_eq!(summary.messages, 1);
    assert_eq!(summary.alarms, 1);
    let alarms = broker.messages("fw-alarms");
    assert_eq!(alarms.len(), 1);
    assert_eq!(alarms[0].key.as_deref(), Some(b"ti".as_slice()));

    // Topics on this broker reject appends past the configured capacity.
    for _ in 0..15 {
        broker.publish("fw-events", Message::new(&b"{}"[..])).unwrap();
    }
    assert!(matches!(
        broker.publish("fw-events", Message::new(&b"{}"[..])),
        Err(StreamError::AtCapacity(_))
    ));
}

#[tokio::test]
async fn broker_rule_run_compiles_file_and_emits() {
    let mut rules = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    write!(
        rules,
        "patterns:\n  ipv4: '\\b(?:\\d{{1,3}}\\.){{3}}\\d{{1,3}}\\b'\nrules:\n  - name: scanner\n    condition:\n      pattern: {{ pattern: ipv4, field: message }}\n    alarm: scanner address observed\n"
    )
    .unwrap();

    let mut config = VarselConfig::default();
    config.rules.file = rules.path().to_path_buf();
    config.stream.alarm_key = "rules".into();

    let broker = stream_broker(&config.stream);
    broker
        .publish(
            "events",
            Message::new(
                &br#"{"logsource":"ids1","@timestamp":"2024-01-01T00:00:00Z","message":"hit 1.2.3.4"}"#[..],
            ),
        )
        .unwrap();

    let summary = run_rule_worker_on(&broker, config, alarms_reached(broker.clone(), 1))
        .await
        .unwrap();

    assert_eq!(summary.alarms, 1);
    let alarms = broker.messages("alarms");
    assert_eq!(alarms[0].key.as_deref(), Some(b"rules".as_slice()));
    let alarm: serde_json::Value = serde_json::from_slice(&alarms[0].value).unwrap();
    assert_eq!(alarm["message"], "scanner address observed");
}
