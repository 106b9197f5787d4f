//! Email delivery as a pool job.

use async_trait::async_trait;
use postal_mail::EmailSender;
use postal_pool::{Job, JobError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broker::{BrokerMessage, MessagePosition};
use crate::error::{MessagingError, Result};
use crate::message::EmailEvent;

/// Delivers one queued email through an [`EmailSender`].
///
/// The job ID comes from the broker position (`email-{partition}-{offset}`),
/// so it is known before the payload is decoded. Decoding happens in
/// [`Job::execute`]; a malformed payload becomes a failed result.
pub struct EmailJob {
    id: String,
    message: BrokerMessage,
    sender: Arc<dyn EmailSender>,
}

impl EmailJob {
    pub fn new(message: BrokerMessage, sender: Arc<dyn EmailSender>) -> Self {
        Self {
            id: job_id(&message.position),
            message,
            sender,
        }
    }

    /// Broker position the job was built from.
    pub fn position(&self) -> &MessagePosition {
        &self.message.position
    }
}

/// Job ID for a broker position.
pub fn job_id(position: &MessagePosition) -> String {
    format!("email-{}-{}", position.partition, position.offset)
}

/// Deliver one event.
///
/// Updates the event's status, retry count, and error message in place.
/// Those changes are never written back to the broker.
pub async fn deliver(
    event: &mut EmailEvent,
    sender: &dyn EmailSender,
    cancel: &CancellationToken,
) -> Result<()> {
    let message = &mut event.message;

    if message.retries_exhausted() {
        warn!(
            message_id = %message.id,
            retry_count = message.retry_count,
            max_retries = message.max_retries,
            "Email exceeded max retries"
        );
        return Err(MessagingError::RetriesExceeded {
            message_id: message.id.clone(),
            retry_count: message.retry_count,
            max_retries: message.max_retries,
        });
    }

    if cancel.is_cancelled() {
        return Err(MessagingError::Cancelled);
    }

    let sent = sender
        .send_email(
            &message.from,
            &message.to,
            &message.subject,
            &message.template,
            &message.data,
        )
        .await;

    match sent {
        Ok(()) => {
            message.mark_sent();
            info!(
                message_id = %message.id,
                to = %message.to,
                template = %message.template,
                "Email sent"
            );
            Ok(())
        }
        Err(e) => {
            message.mark_failed(&e);
            warn!(
                message_id = %message.id,
                to = %message.to,
                retry_count = message.retry_count,
                error = %e,
                "Failed to send email"
            );
            Err(MessagingError::Mail(e))
        }
    }
}

#[async_trait]
impl Job for EmailJob {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, cancel: CancellationToken) -> std::result::Result<(), JobError> {
        let mut event = EmailEvent::from_bytes(&self.message.payload).inspect_err(|e| {
            warn!(job_id = %self.id, error = %e, "Dropping undecodable email event");
        })?;
        deliver(&mut event, self.sender.as_ref(), &cancel).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{EmailMessage, EmailStatus};
    use postal_mail::MailError;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubSender {
        fail: bool,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EmailSender for StubSender {
        async fn send_email(
            &self,
            _from: &str,
            to: &str,
            _subject: &str,
            _template: &str,
            _data: &HashMap<String, Value>,
        ) -> postal_mail::Result<()> {
            self.calls.lock().unwrap().push(to.to_string());
            if self.fail {
                Err(MailError::Smtp("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    fn broker_message(partition: i32, offset: i64, payload: Vec<u8>) -> BrokerMessage {
        BrokerMessage {
            position: MessagePosition {
                topic: "email-queue".into(),
                partition,
                offset,
            },
            key: None,
            payload,
            headers: Vec::new(),
            timestamp: None,
        }
    }

    fn event() -> EmailEvent {
        EmailEvent::new(EmailMessage::new(
            "noreply@example.com",
            "user@example.com",
            "Welcome",
            "welcome",
        ))
    }

    #[test]
    fn test_id_from_position() {
        let job = EmailJob::new(
            broker_message(2, 41, Vec::new()),
            Arc::new(StubSender::default()),
        );
        assert_eq!(job.id(), "email-2-41");
        assert_eq!(job.position().offset, 41);
    }

    #[tokio::test]
    async fn test_deliver_success_marks_sent() {
        let sender = StubSender::default();
        let mut event = event();

        deliver(&mut event, &sender, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(event.message.status, EmailStatus::Sent);
        assert_eq!(event.message.retry_count, 0);
        assert_eq!(sender.calls.lock().unwrap().as_slice(), ["user@example.com"]);
    }

    #[tokio::test]
    async fn test_deliver_failure_marks_failed() {
        let sender = StubSender {
            fail: true,
            ..Default::default()
        };
        let mut event = event();

        let err = deliver(&mut event, &sender, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, MessagingError::Mail(MailError::Smtp(_))));
        assert_eq!(event.message.status, EmailStatus::Failed);
        assert_eq!(event.message.retry_count, 1);
        assert!(event.message.error_msg.as_deref().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_exhausted_retries_skip_sender() {
        let sender = StubSender::default();
        let mut event = event();
        event.message.retry_count = 3;

        let err = deliver(&mut event, &sender, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "message exceeded max retries");
        assert!(sender.calls.lock().unwrap().is_empty());
        assert_eq!(event.message.status, EmailStatus::Pending);
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let sender = StubSender::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = deliver(&mut event(), &sender, &cancel).await.unwrap_err();
        assert!(matches!(err, MessagingError::Cancelled));
        assert!(sender.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execute_rejects_bad_payload() {
        let sender = Arc::new(StubSender::default());
        let job = EmailJob::new(broker_message(0, 0, b"{oops".to_vec()), sender.clone());

        let err = job.execute(CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("failed to unmarshal event"));
        assert!(sender.calls.lock().unwrap().is_empty());
    }
}
