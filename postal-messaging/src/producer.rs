//! Email event producer.

use chrono::SecondsFormat;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::broker::{BrokerWriter, OutboundMessage};
use crate::error::Result;
use crate::message::{EmailEvent, EmailMessage, EmailPriority};

/// Header carrying the event type.
pub const HEADER_TYPE: &str = "type";
/// Header carrying the priority.
pub const HEADER_PRIORITY: &str = "priority";
/// Header carrying the RFC 3339 creation time.
pub const HEADER_TIMESTAMP: &str = "timestamp";

/// An email to enqueue.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailRequest {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub template: String,
    pub data: HashMap<String, Value>,
    pub priority: EmailPriority,
}

impl EmailRequest {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            subject: subject.into(),
            template: template.into(),
            data: HashMap::new(),
            priority: EmailPriority::Normal,
        }
    }

    /// Add one template variable.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Replace all template variables.
    pub fn data(mut self, data: HashMap<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn priority(mut self, priority: EmailPriority) -> Self {
        self.priority = priority;
        self
    }

    fn into_event(self) -> EmailEvent {
        let mut message = EmailMessage::new(self.from, self.to, self.subject, self.template);
        message.data = self.data;
        message.priority = self.priority;
        EmailEvent::new(message)
    }
}

/// Publishes email events to a broker topic.
pub struct EmailProducer {
    writer: Arc<dyn BrokerWriter>,
}

impl EmailProducer {
    pub fn new(writer: Arc<dyn BrokerWriter>) -> Self {
        Self { writer }
    }

    /// Enqueue an email and return its message ID.
    pub async fn send_email(&self, request: EmailRequest) -> Result<String> {
        let event = request.into_event();
        self.send_event(&event).await?;
        Ok(event.message.id)
    }

    /// Publish a prepared event.
    ///
    /// The record key is the message ID, so all attempts for one email land
    /// on the same partition.
    pub async fn send_event(&self, event: &EmailEvent) -> Result<()> {
        let message = &event.message;
        let record = OutboundMessage::new(event.to_bytes()?)
            .with_key(message.id.as_bytes())
            .with_header(HEADER_TYPE, event.event_type.as_str())
            .with_header(HEADER_PRIORITY, message.priority.as_str())
            .with_header(
                HEADER_TIMESTAMP,
                message.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            );

        self.writer.write_message(record).await.inspect_err(|e| {
            error!(message_id = %message.id, error = %e, "Failed to publish email event");
        })?;

        info!(
            message_id = %message.id,
            to = %message.to,
            template = %message.template,
            event_type = %event.event_type,
            "Email event published"
        );
        Ok(())
    }

    /// Flush and close the writer.
    pub async fn close(&self) -> Result<()> {
        self.writer.close().await
    }
}
