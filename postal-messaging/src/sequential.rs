//! One-at-a-time queue consumer.
//!
//! Delivers each email inline and commits its offset only after delivery
//! succeeded. A failed email is not committed and comes back after a
//! rebalance or restart.

use postal_mail::EmailSender;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::broker::{BrokerMessage, BrokerReader};
use crate::consumer::{DEFAULT_FETCH_BACKOFF, fetch_next};
use crate::error::{MessagingError, Result};
use crate::job::{deliver, job_id};
use crate::message::EmailEvent;

/// Broker consumer without a worker pool.
pub struct SequentialConsumer {
    reader: Arc<dyn BrokerReader>,
    sender: Arc<dyn EmailSender>,
    fetch_backoff: Duration,
}

impl SequentialConsumer {
    pub fn new(reader: Arc<dyn BrokerReader>, sender: Arc<dyn EmailSender>) -> Self {
        Self {
            reader,
            sender,
            fetch_backoff: DEFAULT_FETCH_BACKOFF,
        }
    }

    pub fn with_fetch_backoff(mut self, backoff: Duration) -> Self {
        self.fetch_backoff = backoff;
        self
    }

    /// Consume until `cancel` fires.
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        info!("Starting sequential email consumer");

        loop {
            let message = fetch_next(self.reader.as_ref(), &cancel, self.fetch_backoff).await?;
            let position = message.position.clone();
            let id = job_id(&position);

            match self.process_message(&message, &cancel).await {
                Ok(_) => {
                    if let Err(e) = self.reader.commit(&position).await {
                        error!(job_id = %id, position = %position, error = %e, "Failed to commit offset");
                    }
                }
                Err(MessagingError::Cancelled) => return Err(MessagingError::Cancelled),
                Err(e) => {
                    error!(job_id = %id, error = %e, "Failed to process message, offset not committed");
                }
            }
        }
    }

    /// Decode and deliver one record, returning the updated event.
    pub async fn process_message(
        &self,
        message: &BrokerMessage,
        cancel: &CancellationToken,
    ) -> Result<EmailEvent> {
        let mut event = EmailEvent::from_bytes(&message.payload)?;
        debug!(message_id = %event.message.id, event_type = %event.event_type, "Processing email event");
        deliver(&mut event, self.sender.as_ref(), cancel).await?;
        Ok(event)
    }

    /// Stop reading from the broker.
    pub async fn close(&self) -> Result<()> {
        info!("Closing sequential email consumer");
        self.reader.close().await
    }
}
