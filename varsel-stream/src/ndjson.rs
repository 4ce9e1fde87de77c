//! Line-delimited JSON source and sink over async I/O.
//!
//! Lets a worker consume an event feed piped on stdin (or replayed from a
//! file) and emit alarms as one JSON object per line, with the same
//! source/sink traits the broker-backed implementations use.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tokio::sync::mpsc;
use tracing::warn;

use crate::{
    AlarmSink, ConsumerStatsHandle, EventSource, Message, ProducerStatsHandle, StreamError,
};

/// Reads one JSON event per line. Blank lines are skipped.
pub struct NdjsonSource<R> {
    lines: Lines<R>,
    stats: ConsumerStatsHandle,
}

impl<R: AsyncBufRead + Unpin + Send> NdjsonSource<R> {
    /// `label` names the feed in consumer statistics (lag is unknown for a
    /// line stream and reported as zero).
    pub fn new(reader: R, label: &str) -> Self {
        Self {
            lines: reader.lines(),
            stats: ConsumerStatsHandle::new(label, "-"),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> EventSource for NdjsonSource<R> {
    async fn next(&mut self) -> Result<Option<Message>, StreamError> {
        loop {
            match self.lines.next_line().await? {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    self.stats.record_read();
                    return Ok(Some(Message::new(line.into_bytes())));
                }
            }
        }
    }

    fn stats(&self) -> ConsumerStatsHandle {
        self.stats.clone()
    }
}

/// Writes one alarm per line through a background task; `send` never blocks.
pub struct NdjsonSink {
    tx: mpsc::UnboundedSender<Message>,
    stats: ProducerStatsHandle,
}

impl NdjsonSink {
    /// Must be called within a tokio runtime.
    pub fn new<W>(mut writer: W, label: &str) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let stats = ProducerStatsHandle::new(label);
        let task_stats = stats.clone();

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let result = async {
                    writer.write_all(&message.value).await?;
                    writer.write_all(b"\n").await?;
                    writer.flush().await
                }
                .await;

                match result {
                    Ok(()) => task_stats.record_write(),
                    Err(e) => {
                        task_stats.record_error();
                        warn!(error = %e, "alarm write failed");
                    }
                }
            }
        });

        Self { tx, stats }
    }

    /// Sink that writes alarms to standard output.
    pub fn stdout(label: &str) -> Self {
        Self::new(tokio::io::stdout(), label)
    }
}

impl AlarmSink for NdjsonSink {
    fn send(&self, message: Message) {
        if self.tx.send(message).is_err() {
            self.stats.record_error();
            warn!("sink task gone; alarm dropped");
        }
    }

    fn stats(&self) -> ProducerStatsHandle {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, BufReader};

    #[tokio::test]
    async fn yields_one_message_per_line_skipping_blanks() {
        let data = b"{\"a\":1}\n\n{\"b\":2}\n";
        let mut source = NdjsonSource::new(BufReader::new(&data[..]), "stdin");

        assert_eq!(
            source.next().await.unwrap().unwrap().value,
            Bytes::from_static(b"{\"a\":1}")
        );
        assert_eq!(
            source.next().await.unwrap().unwrap().value,
            Bytes::from_static(b"{\"b\":2}")
        );
        assert!(source.next().await.unwrap().is_none());
        assert_eq!(source.stats().snapshot().messages_read, 2);
    }

    #[tokio::test]
    async fn sink_writes_newline_delimited_records() {
        let (writer, mut reader) = tokio::io::duplex(1024);
        let sink = NdjsonSink::new(writer, "alarms");

        sink.send(Message::new(&b"{\"alarm\":1}"[..]));
        sink.send(Message::new(&b"{\"alarm\":2}"[..]));

        let stats = sink.stats();
        for _ in 0..200 {
            if stats.snapshot().messages_written == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        drop(sink);

        let mut written = Vec::new();
        reader.read_to_end(&mut written).await.unwrap();
        assert_eq!(written, b"{\"alarm\":1}\n{\"alarm\":2}\n");
    }
}
