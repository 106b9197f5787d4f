//! In-process broker.
//!
//! A single-partition log with the same fetch/commit contract as the Kafka
//! implementation. Used for tests and for running the pipeline without a
//! broker.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::broker::{BrokerMessage, BrokerReader, BrokerWriter, MessagePosition, OutboundMessage};
use crate::error::{MessagingError, Result};

struct Shared {
    topic: String,
    log: Mutex<Vec<BrokerMessage>>,
    tx: mpsc::UnboundedSender<BrokerMessage>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<BrokerMessage>>,
    commits: Mutex<Vec<MessagePosition>>,
    reader_closed: CancellationToken,
    writer_closed: AtomicBool,
    failing_fetches: AtomicUsize,
}

impl Shared {
    fn append(&self, message: OutboundMessage) -> i64 {
        let mut log = lock(&self.log);
        let offset = log.len() as i64;
        let record = BrokerMessage {
            position: MessagePosition {
                topic: self.topic.clone(),
                partition: 0,
                offset,
            },
            key: message.key,
            payload: message.payload,
            headers: message.headers,
            timestamp: Some(Utc::now()),
        };
        log.push(record.clone());
        // The receiver lives as long as `self`, so this cannot fail.
        let _ = self.tx.send(record);
        offset
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory broker for one topic.
///
/// Hand out a [`InMemoryReader`] and a [`InMemoryWriter`]; both share the
/// same log.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new(topic: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                topic: topic.into(),
                log: Mutex::new(Vec::new()),
                tx,
                rx: tokio::sync::Mutex::new(rx),
                commits: Mutex::new(Vec::new()),
                reader_closed: CancellationToken::new(),
                writer_closed: AtomicBool::new(false),
                failing_fetches: AtomicUsize::new(0),
            }),
        }
    }

    /// Topic name.
    pub fn topic(&self) -> &str {
        &self.shared.topic
    }

    /// Consuming handle.
    pub fn reader(&self) -> InMemoryReader {
        InMemoryReader {
            shared: self.shared.clone(),
        }
    }

    /// Producing handle.
    pub fn writer(&self) -> InMemoryWriter {
        InMemoryWriter {
            shared: self.shared.clone(),
        }
    }

    /// Append a record, returning its offset.
    pub fn push(&self, message: OutboundMessage) -> i64 {
        self.shared.append(message)
    }

    /// Every record written so far.
    pub fn messages(&self) -> Vec<BrokerMessage> {
        lock(&self.shared.log).clone()
    }

    /// Every commit in call order.
    pub fn commits(&self) -> Vec<MessagePosition> {
        lock(&self.shared.commits).clone()
    }

    /// Next offset the group would resume from, if anything was committed.
    pub fn committed_offset(&self) -> Option<i64> {
        lock(&self.shared.commits)
            .iter()
            .map(|p| p.offset + 1)
            .max()
    }

    /// Make the next `count` fetches fail.
    pub fn fail_next_fetches(&self, count: usize) {
        self.shared.failing_fetches.store(count, Ordering::SeqCst);
    }
}

/// Reader half of an [`InMemoryBroker`].
#[derive(Clone)]
pub struct InMemoryReader {
    shared: Arc<Shared>,
}

#[async_trait]
impl BrokerReader for InMemoryReader {
    async fn fetch_message(&self) -> Result<BrokerMessage> {
        if self.shared.reader_closed.is_cancelled() {
            return Err(MessagingError::ChannelClosed("reader closed".into()));
        }

        let injected = self
            .shared
            .failing_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(MessagingError::Fetch("injected fetch failure".into()));
        }

        tokio::select! {
            biased;

            _ = self.shared.reader_closed.cancelled() => {
                Err(MessagingError::ChannelClosed("reader closed".into()))
            }
            record = async { self.shared.rx.lock().await.recv().await } => {
                record.ok_or_else(|| MessagingError::ChannelClosed("log closed".into()))
            }
        }
    }

    async fn commit(&self, position: &MessagePosition) -> Result<()> {
        if self.shared.reader_closed.is_cancelled() {
            return Err(MessagingError::Commit("reader closed".into()));
        }
        debug!(position = %position, "Committing offset");
        lock(&self.shared.commits).push(position.clone());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.shared.reader_closed.cancel();
        Ok(())
    }
}

/// Writer half of an [`InMemoryBroker`].
#[derive(Clone)]
pub struct InMemoryWriter {
    shared: Arc<Shared>,
}

#[async_trait]
impl BrokerWriter for InMemoryWriter {
    async fn write_message(&self, message: OutboundMessage) -> Result<()> {
        if self.shared.writer_closed.load(Ordering::SeqCst) {
            return Err(MessagingError::ChannelClosed("writer closed".into()));
        }
        self.shared.append(message);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.shared.writer_closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
