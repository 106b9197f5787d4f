//! Apache Kafka broker implementation

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::Message as KafkaMessage;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{Offset, TopicPartitionList};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broker::{BrokerMessage, BrokerReader, BrokerWriter, MessagePosition, OutboundMessage};
use crate::error::{MessagingError, Result};

/// Kafka connection settings shared by the reader and the writer.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Bootstrap brokers
    pub brokers: Vec<String>,
    /// Topic to read from or write to
    pub topic: String,
    /// Consumer group (reader only)
    pub group_id: String,
    /// Where a new group starts reading
    pub auto_offset_reset: String,
    /// Consumer session timeout
    pub session_timeout_ms: u32,
    /// Producer delivery timeout
    pub write_timeout: Duration,
    /// Producer retries per record
    pub max_attempts: u32,
}

impl KafkaConfig {
    pub fn new(brokers: Vec<String>, topic: impl Into<String>) -> Self {
        Self {
            brokers,
            topic: topic.into(),
            group_id: "messaging-service-group".to_string(),
            auto_offset_reset: "latest".to_string(),
            session_timeout_ms: 10_000,
            write_timeout: Duration::from_secs(10),
            max_attempts: 3,
        }
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    fn validate(&self) -> Result<()> {
        if self.brokers.is_empty() {
            return Err(MessagingError::Configuration("no Kafka brokers configured".into()));
        }
        if self.topic.is_empty() {
            return Err(MessagingError::Configuration("Kafka topic is empty".into()));
        }
        Ok(())
    }

    fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", self.brokers.join(","));
        client_config
    }
}

/// Kafka consumer with manual offset commits.
pub struct KafkaReader {
    consumer: StreamConsumer,
    topic: String,
    closed: CancellationToken,
}

impl KafkaReader {
    /// Create a consumer and subscribe to the configured topic.
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        config.validate()?;
        info!(
            brokers = ?config.brokers,
            topic = %config.topic,
            group_id = %config.group_id,
            "Connecting Kafka consumer"
        );

        let consumer: StreamConsumer = config
            .client_config()
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("fetch.min.bytes", "10000")
            .set("fetch.max.bytes", "10000000")
            .create()
            .map_err(|e| MessagingError::Connection(e.to_string()))?;

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| MessagingError::Connection(e.to_string()))?;

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
            closed: CancellationToken::new(),
        })
    }
}

#[async_trait]
impl BrokerReader for KafkaReader {
    async fn fetch_message(&self) -> Result<BrokerMessage> {
        let borrowed = tokio::select! {
            biased;

            _ = self.closed.cancelled() => {
                return Err(MessagingError::ChannelClosed("Kafka reader closed".into()));
            }
            received = self.consumer.recv() => {
                received.map_err(|e| MessagingError::Fetch(e.to_string()))?
            }
        };

        let headers = borrowed
            .headers()
            .map(|headers| {
                headers
                    .iter()
                    .filter_map(|h| {
                        h.value
                            .map(|v| (h.key.to_string(), String::from_utf8_lossy(v).into_owned()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let timestamp = borrowed
            .timestamp()
            .to_millis()
            .and_then(chrono::DateTime::from_timestamp_millis);

        Ok(BrokerMessage {
            position: MessagePosition {
                topic: borrowed.topic().to_string(),
                partition: borrowed.partition(),
                offset: borrowed.offset(),
            },
            key: borrowed.key().map(|k| k.to_vec()),
            payload: borrowed.payload().map(|p| p.to_vec()).unwrap_or_default(),
            headers,
            timestamp,
        })
    }

    async fn commit(&self, position: &MessagePosition) -> Result<()> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(&position.topic, position.partition, Offset::Offset(position.offset + 1))
            .map_err(|e| MessagingError::Commit(e.to_string()))?;

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| MessagingError::Commit(e.to_string()))?;

        debug!(position = %position, "Committed offset");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        info!(topic = %self.topic, "Closing Kafka consumer");
        self.closed.cancel();
        self.consumer.unsubscribe();
        Ok(())
    }
}

/// Kafka producer waiting for full acknowledgement.
pub struct KafkaWriter {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl KafkaWriter {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        config.validate()?;
        info!(brokers = ?config.brokers, topic = %config.topic, "Connecting Kafka producer");

        let producer: FutureProducer = config
            .client_config()
            .set("acks", "all")
            .set("compression.type", "snappy")
            .set("message.send.max.retries", config.max_attempts.to_string())
            .set("message.timeout.ms", config.write_timeout.as_millis().to_string())
            .set("request.timeout.ms", config.write_timeout.as_millis().to_string())
            .create()
            .map_err(|e| MessagingError::Connection(e.to_string()))?;

        Ok(Self {
            producer,
            topic: config.topic.clone(),
            timeout: config.write_timeout,
        })
    }

    fn build_headers(message: &OutboundMessage) -> OwnedHeaders {
        message
            .headers
            .iter()
            .fold(OwnedHeaders::new(), |headers, (key, value)| {
                headers.insert(Header {
                    key,
                    value: Some(value.as_bytes()),
                })
            })
    }
}

#[async_trait]
impl BrokerWriter for KafkaWriter {
    async fn write_message(&self, message: OutboundMessage) -> Result<()> {
        let headers = Self::build_headers(&message);

        let mut record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(&self.topic)
            .payload(message.payload.as_slice())
            .headers(headers);

        if let Some(ref key) = message.key {
            record = record.key(key.as_slice());
        }

        self.producer
            .send(record, self.timeout)
            .await
            .map_err(|(e, _)| MessagingError::Publish(e.to_string()))?;

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        info!(topic = %self.topic, "Flushing Kafka producer");
        self.producer
            .flush(self.timeout)
            .map_err(|e| MessagingError::Publish(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = KafkaConfig::new(vec!["localhost:9093".into()], "email-queue")
            .with_group_id("mailers");
        assert_eq!(config.auto_offset_reset, "latest");
        assert_eq!(config.group_id, "mailers");
        assert_eq!(config.write_timeout, Duration::from_secs(10));
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn test_config_requires_brokers() {
        let config = KafkaConfig::new(Vec::new(), "email-queue");
        assert!(matches!(
            KafkaWriter::new(&config),
            Err(MessagingError::Configuration(_))
        ));
    }

    #[tokio::test]
    #[ignore = "requires a running Kafka broker"]
    async fn test_round_trip_through_kafka() {
        let config = KafkaConfig::new(vec!["localhost:9093".into()], "postal-test")
            .with_group_id("postal-test-group");
        let writer = KafkaWriter::new(&config).unwrap();
        writer
            .write_message(OutboundMessage::new("hello").with_key("k"))
            .await
            .unwrap();
        writer.close().await.unwrap();
    }
}
