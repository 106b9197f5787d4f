//! Broker abstraction.
//!
//! The consumer and producer only need a handful of operations from a durable
//! log: fetch the next record, commit a position, append a record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

use crate::error::Result;

/// Where a record sits in the log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessagePosition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl fmt::Display for MessagePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.topic, self.partition, self.offset)
    }
}

/// A record read from the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    pub position: MessagePosition,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl BrokerMessage {
    /// First header with the given key.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A record to append to the broker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundMessage {
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl OutboundMessage {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            ..Default::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

/// Consuming side of a broker.
#[async_trait]
pub trait BrokerReader: Send + Sync {
    /// Wait for the next record.
    ///
    /// Must be safe to drop while pending; callers race it against
    /// cancellation.
    async fn fetch_message(&self) -> Result<BrokerMessage>;

    /// Mark everything up to and including `position` as consumed.
    async fn commit(&self, position: &MessagePosition) -> Result<()>;

    /// Close the reader.
    async fn close(&self) -> Result<()>;
}

/// Producing side of a broker.
#[async_trait]
pub trait BrokerWriter: Send + Sync {
    /// Append a record, returning once the broker acknowledged it.
    async fn write_message(&self, message: OutboundMessage) -> Result<()>;

    /// Flush and close the writer.
    async fn close(&self) -> Result<()>;
}
