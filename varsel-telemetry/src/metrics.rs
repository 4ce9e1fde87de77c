//! Prometheus recorder for the consume loop.

use prometheus::{Counter, Histogram, HistogramOpts, Registry};

/// Counters and histograms updated by the worker loop and exported through
/// the metrics surface.
#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    pub processed_events: Counter,
    pub emitted_alarms: Counter,
    pub match_latency: Histogram,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let registry = Registry::new();
        let processed_events =
            Counter::new("varsel_events_total", "Total consumed event messages").unwrap();
        let emitted_alarms =
            Counter::new("varsel_alarms_total", "Total alarm records handed to the producer")
                .unwrap();
        let match_latency = Histogram::with_opts(
            HistogramOpts::new("varsel_match_latency_ns", "Indicator matching time per event")
                .buckets(vec![1_000.0, 10_000.0, 100_000.0, 1_000_000.0]),
        )
        .unwrap();

        registry.register(Box::new(processed_events.clone())).unwrap();
        registry.register(Box::new(emitted_alarms.clone())).unwrap();
        registry.register(Box::new(match_latency.clone())).unwrap();

        Self {
            registry,
            processed_events,
            emitted_alarms,
            match_latency,
        }
    }

    /// Text exposition of every registered metric.
    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gathers_registered_counters() {
        let recorder = MetricsRecorder::new();
        recorder.processed_events.inc();
        recorder.match_latency.observe(5_000.0);

        let text = recorder.gather_metrics().unwrap();
        assert!(text.contains("varsel_events_total 1"));
        assert!(text.contains("varsel_match_latency_ns"));
    }
}
