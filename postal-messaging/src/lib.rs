//! Broker-backed email queue.
//!
//! Producers publish [`EmailEvent`]s to a topic; a consumer reads them back
//! and delivers each one through an [`EmailSender`](postal_mail::EmailSender).
//!
//! - [`PooledConsumer`] runs deliveries on a bounded
//!   [`WorkerPool`](postal_pool::WorkerPool) and commits offsets as soon as a
//!   job is queued.
//! - [`SequentialConsumer`] delivers inline and commits only after success.
//!
//! Brokers are pluggable through [`BrokerReader`] and [`BrokerWriter`].
//! [`InMemoryBroker`] is always available; Kafka support is behind the
//! `kafka` feature.
//!
//! ## Example
//!
//! ```
//! use postal_messaging::{EmailProducer, EmailRequest, InMemoryBroker};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let broker = InMemoryBroker::new(postal_messaging::TOPIC_EMAIL_QUEUE);
//! let producer = EmailProducer::new(Arc::new(broker.writer()));
//!
//! let id = producer
//!     .send_email(
//!         EmailRequest::new("noreply@example.com", "user@example.com", "Welcome!", "welcome")
//!             .with_data("name", "Ada"),
//!     )
//!     .await?;
//! assert_eq!(broker.messages()[0].header("type"), Some("welcome"));
//! println!("queued {id}");
//! # Ok::<(), postal_messaging::MessagingError>(())
//! # }).unwrap();
//! ```

pub mod broker;
pub mod consumer;
pub mod error;
pub mod job;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod message;
pub mod producer;
pub mod results;
pub mod sequential;

pub use broker::{BrokerMessage, BrokerReader, BrokerWriter, MessagePosition, OutboundMessage};
pub use consumer::{DEFAULT_FETCH_BACKOFF, PooledConsumer};
pub use error::{MessagingError, Result};
pub use job::{EmailJob, deliver};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaConfig, KafkaReader, KafkaWriter};
pub use memory::{InMemoryBroker, InMemoryReader, InMemoryWriter};
pub use message::{DEFAULT_MAX_RETRIES, EmailEvent, EmailMessage, EmailPriority, EmailStatus, EmailType};
pub use producer::{EmailProducer, EmailRequest};
pub use results::{CollectingResultHandler, LoggingResultHandler, ResultHandler, ResultSummary};
pub use sequential::SequentialConsumer;

/// Topic carrying email events.
pub const TOPIC_EMAIL_QUEUE: &str = "email-queue";

/// Dead-letter topic for emails that ran out of retries. Nothing publishes
/// to it yet; see [`ResultHandler`].
pub const TOPIC_EMAIL_DLQ: &str = "email-dlq";
