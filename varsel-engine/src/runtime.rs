//! The consume-match-produce loop and worker orchestration.

use std::future::Future;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::BufReader;
use tracing::{info, warn};

use varsel_config::{StreamConfig, VarselConfig};
use varsel_core::stats::StatsTracker;
use varsel_detection::indicators::load_indicator_file;
use varsel_detection::rules::RuleFileSpec;
use varsel_stream::memory::{MemoryBroker, MemoryConsumer, MemoryProducer};
use varsel_stream::ndjson::{NdjsonSink, NdjsonSource};
use varsel_stream::{AlarmSink, EventSource, Message};
use varsel_telemetry::{spawn_surface, MetricsRecorder, SurfaceState};

use crate::error::WorkerError;
use crate::processor::{AddressProcessor, EventProcessor, RuleProcessor};

/// End-of-run counters, logged at termination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub messages: u64,
    pub discarded: u64,
    pub alarms: u64,
    pub elapsed: Duration,
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let interrupt = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}

/// Runs the sequential consume loop until the stream ends or `shutdown`
/// resolves.
///
/// The shutdown check happens at iteration boundaries only: a message
/// already pulled runs through decode, match, stat update and produce before
/// the signal is reconsidered. An in-flight blocked fetch is released by the
/// select when the signal arrives.
pub async fn run_worker<S, P, F>(
    mut source: S,
    sink: &dyn AlarmSink,
    processor: &mut P,
    alarm_key: Bytes,
    recorder: &MetricsRecorder,
    shutdown: F,
) -> Result<RunSummary, WorkerError>
where
    S: EventSource,
    P: EventProcessor + ?Sized,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let started = Instant::now();
    let mut summary = RunSummary::default();

    info!("start consuming");
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("termination signal received");
                break;
            }
            fetched = source.next() => match fetched {
                Ok(Some(message)) => {
                    summary.messages += 1;
                    recorder.processed_events.inc();

                    let match_started = Instant::now();
                    match processor.process(&message.value) {
                        Ok(alarms) => {
                            recorder
                                .match_latency
                                .observe(match_started.elapsed().as_nanos() as f64);
                            for alarm in alarms {
                                match alarm.to_bytes() {
                                    Ok(bytes) => {
                                        sink.send(Message::keyed(alarm_key.clone(), bytes));
                                        summary.alarms += 1;
                                        recorder.emitted_alarms.inc();
                                    }
                                    Err(e) => warn!(error = %e, "alarm serialization failed"),
                                }
                            }
                        }
                        Err(e) => {
                            summary.discarded += 1;
                            warn!(error = %e, "message discarded");
                        }
                    }
                }
                Ok(None) => {
                    info!("input stream ended");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "message fetch failed");
                }
            }
        }
    }

    summary.elapsed = started.elapsed();
    processor.exit_report();
    info!(
        messages = summary.messages,
        discarded = summary.discarded,
        alarms = summary.alarms,
        elapsed = ?summary.elapsed,
        "terminating"
    );
    Ok(summary)
}

/// Address worker over stdin/stdout NDJSON: loads the indicator list, spawns
/// the metrics surface, then consumes until the stream ends or a signal
/// arrives.
pub async fn run_address_worker(config: VarselConfig) -> Result<RunSummary, WorkerError> {
    let (trie, report) = load_indicator_file(&config.indicators.file)?;
    info!(
        accepted = report.accepted,
        rejected = report.rejected,
        nodes = trie.node_count(),
        "indicator list loaded"
    );

    let stats = new_stats_tracker();
    let recorder = MetricsRecorder::new();
    let source = NdjsonSource::new(BufReader::new(tokio::io::stdin()), &config.stream.in_topic);
    let sink = NdjsonSink::stdout(&config.stream.out_topic);
    spawn_metrics(&config, &source, &sink, &stats, &recorder);

    let mut processor = AddressProcessor::new(trie, stats);
    run_worker(
        source,
        &sink,
        &mut processor,
        Bytes::from(config.stream.alarm_key),
        &recorder,
        shutdown_signal(),
    )
    .await
}

/// Rule worker over stdin/stdout NDJSON: compiles the rule file (fatal on
/// any pattern failure), spawns the metrics surface, then consumes.
pub async fn run_rule_worker(config: VarselConfig) -> Result<RunSummary, WorkerError> {
    let rules = RuleFileSpec::from_yaml_file(&config.rules.file)?.compile()?;
    info!(
        rules = rules.len(),
        patterns = rules.pattern_count(),
        "rule set compiled"
    );

    let stats = new_stats_tracker();
    let recorder = MetricsRecorder::new();
    let source = NdjsonSource::new(BufReader::new(tokio::io::stdin()), &config.stream.in_topic);
    let sink = NdjsonSink::stdout(&config.stream.out_topic);
    spawn_metrics(&config, &source, &sink, &stats, &recorder);

    let mut processor = RuleProcessor::new(rules, stats);
    run_worker(
        source,
        &sink,
        &mut processor,
        Bytes::from(config.stream.alarm_key),
        &recorder,
        shutdown_signal(),
    )
    .await
}

/// In-process broker whose topics honor the configured capacity bound.
pub fn stream_broker(stream: &StreamConfig) -> MemoryBroker {
    MemoryBroker::with_capacity(stream.queue_capacity)
}

/// Consumer/producer pair on a broker, wired from the configured topics,
/// consumer group and commit interval.
pub fn broker_endpoints(
    broker: &MemoryBroker,
    stream: &StreamConfig,
) -> (MemoryConsumer, MemoryProducer) {
    let consumer = broker.consumer(
        &stream.in_topic,
        &stream.group,
        Duration::from_millis(stream.commit_interval_ms),
    );
    let producer = broker.producer(&stream.out_topic);
    (consumer, producer)
}

/// Address worker over a broker: same startup sequencing as
/// [`run_address_worker`], consuming the configured topic within the
/// configured group instead of stdin.
pub async fn run_address_worker_on<F>(
    broker: &MemoryBroker,
    config: VarselConfig,
    shutdown: F,
) -> Result<RunSummary, WorkerError>
where
    F: Future<Output = ()>,
{
    let (trie, report) = load_indicator_file(&config.indicators.file)?;
    info!(
        accepted = report.accepted,
        rejected = report.rejected,
        nodes = trie.node_count(),
        "indicator list loaded"
    );

    let stats = new_stats_tracker();
    let recorder = MetricsRecorder::new();
    let (source, sink) = broker_endpoints(broker, &config.stream);
    spawn_metrics(&config, &source, &sink, &stats, &recorder);

    let mut processor = AddressProcessor::new(trie, stats);
    run_worker(
        source,
        &sink,
        &mut processor,
        Bytes::from(config.stream.alarm_key),
        &recorder,
        shutdown,
    )
    .await
}

/// Rule worker over a broker; see [`run_address_worker_on`].
pub async fn run_rule_worker_on<F>(
    broker: &MemoryBroker,
    config: VarselConfig,
    shutdown: F,
) -> Result<RunSummary, WorkerError>
where
    F: Future<Output = ()>,
{
    let rules = RuleFileSpec::from_yaml_file(&config.rules.file)?.compile()?;
    info!(
        rules = rules.len(),
        patterns = rules.pattern_count(),
        "rule set compiled"
    );

    let stats = new_stats_tracker();
    let recorder = MetricsRecorder::new();
    let (source, sink) = broker_endpoints(broker, &config.stream);
    spawn_metrics(&config, &source, &sink, &stats, &recorder);

    let mut processor = RuleProcessor::new(rules, stats);
    run_worker(
        source,
        &sink,
        &mut processor,
        Bytes::from(config.stream.alarm_key),
        &recorder,
        shutdown,
    )
    .await
}

fn new_stats_tracker() -> StatsTracker {
    // Operators opt into the unbounded table; say so once at startup.
    warn!("indicator hit statistics are never evicted and grow for the process lifetime");
    StatsTracker::new()
}

fn spawn_metrics<S: EventSource>(
    config: &VarselConfig,
    source: &S,
    sink: &dyn AlarmSink,
    stats: &StatsTracker,
    recorder: &MetricsRecorder,
) {
    spawn_surface(
        SurfaceState {
            consumer: source.stats(),
            producer: sink.stats(),
            stats: stats.clone(),
            recorder: recorder.clone(),
        },
        config.telemetry.metrics_port,
    );
}
