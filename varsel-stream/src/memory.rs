//! In-process broker with append-log topics and consumer-group offsets.
//!
//! Gives the workers and their tests real delivery semantics without a wire
//! client: per-topic ordering, interval-based commits (at-least-once on
//! restart), lag derived from the log head, and bounded capacity.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use crate::{
    AlarmSink, ConsumerStatsHandle, EventSource, Message, ProducerStatsHandle, StreamError,
};

const DEFAULT_CAPACITY: usize = 65_536;

#[derive(Debug, Default)]
struct Topic {
    log: Mutex<Vec<Message>>,
    /// Committed read position per consumer group.
    offsets: Mutex<HashMap<String, usize>>,
    notify: Notify,
}

#[derive(Debug)]
struct BrokerInner {
    topics: Mutex<HashMap<String, Arc<Topic>>>,
    capacity: usize,
}

/// In-process message broker. Cheap to clone; clones share the same topics.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Broker whose topics reject appends past `capacity` messages.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                topics: Mutex::new(HashMap::new()),
                capacity,
            }),
        }
    }

    fn topic(&self, name: &str) -> Arc<Topic> {
        let mut topics = self.inner.topics.lock();
        Arc::clone(topics.entry(name.to_string()).or_default())
    }

    /// Appends one message directly to a topic.
    pub fn publish(&self, topic: &str, message: Message) -> Result<(), StreamError> {
        let topic_name = topic;
        let topic = self.topic(topic);
        {
            let mut log = topic.log.lock();
            if log.len() >= self.inner.capacity {
                return Err(StreamError::AtCapacity(topic_name.to_string()));
            }
            log.push(message);
        }
        topic.notify.notify_waiters();
        Ok(())
    }

    /// Messages currently held in a topic's log, oldest first.
    pub fn messages(&self, topic: &str) -> Vec<Message> {
        self.topic(topic).log.lock().clone()
    }

    /// Subscribes a consumer at the group's committed offset.
    pub fn consumer(&self, topic: &str, group: &str, commit_interval: Duration) -> MemoryConsumer {
        let topic_handle = self.topic(topic);
        let position = topic_handle.offsets.lock().get(group).copied().unwrap_or(0);
        debug!(topic, group, position, "consumer subscribed");
        MemoryConsumer {
            topic: topic_handle,
            group: group.to_string(),
            position,
            commit_interval,
            last_commit: Instant::now(),
            stats: ConsumerStatsHandle::new(topic, group),
        }
    }

    /// Creates an asynchronous producer for a topic.
    ///
    /// Sends are queued and drained by a background task; must be called
    /// within a tokio runtime.
    pub fn producer(&self, topic: &str) -> MemoryProducer {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let stats = ProducerStatsHandle::new(topic);
        let broker = self.clone();
        let topic_name = topic.to_string();
        let task_stats = stats.clone();

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match broker.publish(&topic_name, message) {
                    Ok(()) => task_stats.record_write(),
                    Err(e) => {
                        task_stats.record_error();
                        warn!(topic = %topic_name, error = %e, "alarm delivery failed");
                    }
                }
            }
        });

        MemoryProducer { tx, stats }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Single consumer within a group; reads in append order.
pub struct MemoryConsumer {
    topic: Arc<Topic>,
    group: String,
    position: usize,
    commit_interval: Duration,
    last_commit: Instant,
    stats: ConsumerStatsHandle,
}

impl MemoryConsumer {
    /// Commits the current read position for this consumer's group.
    ///
    /// Progress between commits is lost on drop, so redelivery after a
    /// restart is possible (at-least-once).
    pub fn commit(&mut self) {
        self.topic
            .offsets
            .lock()
            .insert(self.group.clone(), self.position);
        self.last_commit = Instant::now();
        trace!(group = %self.group, position = self.position, "offset committed");
    }

    fn maybe_commit(&mut self) {
        if self.last_commit.elapsed() >= self.commit_interval {
            self.commit();
        }
    }
}

#[async_trait]
impl EventSource for MemoryConsumer {
    async fn next(&mut self) -> Result<Option<Message>, StreamError> {
        loop {
            let pending = {
                // Register for wakeup before re-checking the log; a publish
                // wakes every registered waiter, so a message appended
                // between the check and the await is never missed, and
                // consumers in other groups are not starved of the wakeup.
                let notified = self.topic.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                let head = {
                    let log = self.topic.log.lock();
                    if log.len() > self.position {
                        Some((log[self.position].clone(), log.len()))
                    } else {
                        None
                    }
                };
                match head {
                    Some(found) => Some(found),
                    None => {
                        self.stats.set_lag(0);
                        notified.await;
                        None
                    }
                }
            };

            if let Some((message, head)) = pending {
                self.position += 1;
                self.stats.record_read();
                self.stats.set_lag((head - self.position) as u64);
                self.maybe_commit();
                return Ok(Some(message));
            }
        }
    }

    fn stats(&self) -> ConsumerStatsHandle {
        self.stats.clone()
    }
}

/// Fire-and-forget producer backed by a background drain task.
pub struct MemoryProducer {
    tx: mpsc::UnboundedSender<Message>,
    stats: ProducerStatsHandle,
}

impl AlarmSink for MemoryProducer {
    fn send(&self, message: Message) {
        if self.tx.send(message).is_err() {
            self.stats.record_error();
            warn!("producer task gone; alarm dropped");
        }
    }

    fn stats(&self) -> ProducerStatsHandle {
        self.stats.clone()
    }
}
