//! # varsel-stream
//!
//! Ordered message intake and fire-and-forget alarm emission for the varsel
//! workers.
//!
//! The broker itself is an external collaborator; this crate fixes the
//! boundary as two traits ([`EventSource`], [`AlarmSink`]) plus live
//! statistics handles the metrics surface can read without touching the
//! consume loop. Two implementations ship here:
//! - [`memory::MemoryBroker`]: in-process append-log topics with group
//!   offsets, interval commits and lag accounting, used by tests and local
//!   simulation.
//! - [`ndjson`]: line-delimited JSON over any async reader/writer, for
//!   piping event files or stdin through a worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

pub mod memory;
pub mod ndjson;

/// One keyed message on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub key: Option<Bytes>,
    pub value: Bytes,
}

impl Message {
    pub fn new(value: impl Into<Bytes>) -> Self {
        Self { key: None, value: value.into() }
    }

    pub fn keyed(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self { key: Some(key.into()), value: value.into() }
    }
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("topic `{0}` is at capacity")]
    AtCapacity(String),
    #[error("stream closed")]
    Closed,
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Consumer-side statistics snapshot served by the metrics surface.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConsumerStats {
    pub topic: String,
    pub group: String,
    pub messages_read: u64,
    pub lag: u64,
}

/// Producer-side statistics snapshot served by the metrics surface.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProducerStats {
    pub topic: String,
    pub messages_written: u64,
    pub delivery_errors: u64,
}

#[derive(Debug)]
struct ConsumerShared {
    topic: String,
    group: String,
    messages_read: AtomicU64,
    lag: AtomicU64,
}

/// Shared handle onto a consumer's live counters.
///
/// Written by the consume loop, read concurrently by the metrics surface.
#[derive(Debug, Clone)]
pub struct ConsumerStatsHandle {
    inner: Arc<ConsumerShared>,
}

impl ConsumerStatsHandle {
    pub fn new(topic: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ConsumerShared {
                topic: topic.into(),
                group: group.into(),
                messages_read: AtomicU64::new(0),
                lag: AtomicU64::new(0),
            }),
        }
    }

    pub fn snapshot(&self) -> ConsumerStats {
        ConsumerStats {
            topic: self.inner.topic.clone(),
            group: self.inner.group.clone(),
            messages_read: self.inner.messages_read.load(Ordering::Relaxed),
            lag: self.inner.lag.load(Ordering::Relaxed),
        }
    }

    fn record_read(&self) {
        self.inner.messages_read.fetch_add(1, Ordering::Relaxed);
    }

    fn set_lag(&self, lag: u64) {
        self.inner.lag.store(lag, Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct ProducerShared {
    topic: String,
    messages_written: AtomicU64,
    delivery_errors: AtomicU64,
}

/// Shared handle onto a producer's live counters.
#[derive(Debug, Clone)]
pub struct ProducerStatsHandle {
    inner: Arc<ProducerShared>,
}

impl ProducerStatsHandle {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ProducerShared {
                topic: topic.into(),
                messages_written: AtomicU64::new(0),
                delivery_errors: AtomicU64::new(0),
            }),
        }
    }

    pub fn snapshot(&self) -> ProducerStats {
        ProducerStats {
            topic: self.inner.topic.clone(),
            messages_written: self.inner.messages_written.load(Ordering::Relaxed),
            delivery_errors: self.inner.delivery_errors.load(Ordering::Relaxed),
        }
    }

    fn record_write(&self) {
        self.inner.messages_written.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.inner.delivery_errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Ordered message intake.
///
/// `next` blocks awaiting the next message; dropping the returned future at
/// a select boundary releases an in-flight fetch without losing messages.
#[async_trait]
pub trait EventSource: Send {
    /// Next message in delivery order, or `None` when the stream ends.
    async fn next(&mut self) -> Result<Option<Message>, StreamError>;

    /// Live statistics handle for this consumer.
    fn stats(&self) -> ConsumerStatsHandle;
}

/// Fire-and-forget alarm emission.
///
/// `send` never blocks the caller; delivery errors are logged and counted,
/// not retried, and never surface back into the consume loop.
pub trait AlarmSink: Send + Sync {
    fn send(&self, message: Message);

    /// Live statistics handle for this producer.
    fn stats(&self) -> ProducerStatsHandle;
}
