//! Email event wire format.
//!
//! Events travel as JSON:
//!
//! ```json
//! {
//!   "type": "password_reset",
//!   "message": {
//!     "id": "1b4e28ba-2fa1-11d2-883f-0016d3cca427",
//!     "from": "noreply@example.com",
//!     "to": "user@example.com",
//!     "subject": "Reset your password",
//!     "template": "password-reset",
//!     "data": { "link": "https://example.com/reset/abc" },
//!     "priority": "high",
//!     "timestamp": "2024-05-01T12:00:00Z",
//!     "retry_count": 0,
//!     "max_retries": 3,
//!     "status": "pending"
//!   }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use crate::error::{MessagingError, Result};

/// Default retry budget for new messages.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delivery priority. Informational only; the pipeline does not reorder.
///
/// Decoding is lossy: unrecognized strings read as `Normal` and are written
/// back as `"normal"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum EmailPriority {
    High,
    #[default]
    Normal,
    Low,
}

impl EmailPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl From<String> for EmailPriority {
    fn from(value: String) -> Self {
        match value.as_str() {
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Normal,
        }
    }
}

impl fmt::Display for EmailPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery status as last observed by the process holding the message.
///
/// Decoding is lossy: unrecognized strings read as `Pending` and are written
/// back as `"pending"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum EmailStatus {
    #[default]
    Pending,
    Sent,
    Failed,
}

impl EmailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl From<String> for EmailStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "sent" => Self::Sent,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

impl fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event type, derived from the template name.
///
/// Decoding is lossy: unrecognized strings read as `Notification` and are
/// written back as `"notification"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum EmailType {
    PasswordReset,
    Welcome,
    #[default]
    Notification,
    OrderConfirmation,
}

impl EmailType {
    /// Map a template name to its event type.
    ///
    /// Unknown templates are plain notifications.
    pub fn from_template(template: &str) -> Self {
        match template {
            "password-reset" => Self::PasswordReset,
            "welcome" => Self::Welcome,
            "order-confirmation" => Self::OrderConfirmation,
            _ => Self::Notification,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PasswordReset => "password_reset",
            Self::Welcome => "welcome",
            Self::Notification => "notification",
            Self::OrderConfirmation => "order_confirmation",
        }
    }
}

impl From<String> for EmailType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "password_reset" => Self::PasswordReset,
            "welcome" => Self::Welcome,
            "order_confirmation" => Self::OrderConfirmation,
            _ => Self::Notification,
        }
    }
}

impl fmt::Display for EmailType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One email to deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    /// Producer-assigned UUID, used for log correlation.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub subject: String,
    /// Template name, e.g. `password-reset`.
    #[serde(default)]
    pub template: String,
    /// Template data. `null` on the wire reads as empty.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: HashMap<String, Value>,
    #[serde(default)]
    pub priority: EmailPriority,
    #[serde(default)]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub status: EmailStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<HashMap<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<HashMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl EmailMessage {
    /// Create a pending message with a fresh ID and the default retry budget.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from: from.into(),
            to: to.into(),
            subject: subject.into(),
            template: template.into(),
            data: HashMap::new(),
            priority: EmailPriority::Normal,
            timestamp: Utc::now(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            status: EmailStatus::Pending,
            error_msg: None,
        }
    }

    /// Whether the retry budget is used up.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Record a failed delivery attempt.
    pub fn mark_failed(&mut self, error: impl fmt::Display) {
        self.retry_count += 1;
        self.status = EmailStatus::Failed;
        self.error_msg = Some(error.to_string());
    }

    /// Record a successful delivery.
    pub fn mark_sent(&mut self) {
        self.status = EmailStatus::Sent;
    }
}

/// Envelope published to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailEvent {
    #[serde(rename = "type", default)]
    pub event_type: EmailType,
    pub message: EmailMessage,
}

impl EmailEvent {
    /// Wrap a message, deriving the type from its template.
    pub fn new(message: EmailMessage) -> Self {
        Self {
            event_type: EmailType::from_template(&message.template),
            message,
        }
    }

    /// Encode as JSON.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| MessagingError::Serialization(e.to_string()))
    }

    /// Decode from JSON.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| MessagingError::Deserialization(format!("failed to unmarshal event: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_from_template() {
        assert_eq!(EmailType::from_template("password-reset"), EmailType::PasswordReset);
        assert_eq!(EmailType::from_template("welcome"), EmailType::Welcome);
        assert_eq!(
            EmailType::from_template("order-confirmation"),
            EmailType::OrderConfirmation
        );
        assert_eq!(EmailType::from_template("weekly-digest"), EmailType::Notification);
        assert_eq!(EmailType::from_template(""), EmailType::Notification);
    }

    #[test]
    fn test_new_message_defaults() {
        let msg = EmailMessage::new("a@example.com", "b@example.com", "Hi", "welcome");
        assert_eq!(msg.retry_count, 0);
        assert_eq!(msg.max_retries, 3);
        assert_eq!(msg.status, EmailStatus::Pending);
        assert_eq!(msg.priority, EmailPriority::Normal);
        assert!(uuid::Uuid::parse_str(&msg.id).is_ok());
    }

    #[test]
    fn test_mark_failed_and_sent() {
        let mut msg = EmailMessage::new("a@example.com", "b@example.com", "Hi", "welcome");
        msg.mark_failed("smtp down");
        assert_eq!(msg.retry_count, 1);
        assert_eq!(msg.status, EmailStatus::Failed);
        assert_eq!(msg.error_msg.as_deref(), Some("smtp down"));

        msg.mark_sent();
        assert_eq!(msg.status, EmailStatus::Sent);
    }

    #[test]
    fn test_error_msg_omitted_when_absent() {
        let event = EmailEvent::new(EmailMessage::new("a@x.io", "b@x.io", "s", "welcome"));
        let value: Value = serde_json::from_slice(&event.to_bytes().unwrap()).unwrap();

        assert_eq!(value["type"], "welcome");
        assert!(value["message"].get("error_msg").is_none());
        assert_eq!(value["message"]["status"], "pending");
        assert_eq!(value["message"]["priority"], "normal");
    }

    #[test]
    fn test_decode_payload_with_odd_values() {
        let raw = json!({
            "type": "password_reset",
            "message": {
                "id": "42",
                "from": "noreply@example.com",
                "to": "user@example.com",
                "subject": "Reset",
                "template": "password-reset",
                "data": null,
                "priority": "urgent",
                "timestamp": "2024-05-01T12:00:00.123456789Z",
                "retry_count": 1,
                "max_retries": 3,
                "status": "failed",
                "error_msg": "timeout"
            }
        });

        let event = EmailEvent::from_bytes(raw.to_string().as_bytes()).unwrap();
        assert_eq!(event.event_type, EmailType::PasswordReset);
        assert!(event.message.data.is_empty());
        assert_eq!(event.message.priority, EmailPriority::Normal);
        assert_eq!(event.message.status, EmailStatus::Failed);
        assert_eq!(event.message.retry_count, 1);
        assert_eq!(event.message.error_msg.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_event_round_trip() {
        let mut message =
            EmailMessage::new("a@example.com", "b@example.com", "Order #7", "order-confirmation");
        message.priority = EmailPriority::High;
        message.data.insert("name".into(), json!("Ada"));
        message.data.insert(
            "order".into(),
            json!({ "id": 7, "items": [{ "sku": "A-1", "qty": 2 }], "total": 19.5 }),
        );
        message.mark_failed("connection refused");
        let event = EmailEvent::new(message);

        let decoded = EmailEvent::from_bytes(&event.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, event);
        assert_eq!(decoded.message.error_msg.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_decode_offset_timestamp_and_null_data() {
        let raw = br#"{
            "type": "welcome",
            "message": {
                "id": "7",
                "from": "noreply@example.com",
                "to": "user@example.com",
                "subject": "Welcome!",
                "template": "welcome",
                "data": null,
                "priority": "low",
                "timestamp": "2024-05-01T14:00:00.123456789+02:00",
                "retry_count": 0,
                "max_retries": 3,
                "status": "pending"
            }
        }"#;

        let event = EmailEvent::from_bytes(raw).unwrap();
        assert!(event.message.data.is_empty());
        assert_eq!(event.message.priority, EmailPriority::Low);
        assert_eq!(
            event.message.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
            "2024-05-01T12:00:00.123456789Z"
        );
        assert!(event.message.error_msg.is_none());
    }

    #[test]
    fn test_unknown_enum_strings_are_rewritten() {
        let raw = json!({
            "type": "digest",
            "message": { "priority": "urgent", "status": "queued" }
        });

        let event = EmailEvent::from_bytes(raw.to_string().as_bytes()).unwrap();
        let value: Value = serde_json::from_slice(&event.to_bytes().unwrap()).unwrap();
        assert_eq!(value["type"], "notification");
        assert_eq!(value["message"]["priority"], "normal");
        assert_eq!(value["message"]["status"], "pending");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = EmailEvent::from_bytes(b"not json").unwrap_err();
        assert!(matches!(err, MessagingError::Deserialization(_)));
    }
}
