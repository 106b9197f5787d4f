// Postal - queue-backed transactional email
//
// A bounded worker pool consuming a durable broker topic, delivering each
// queued email at least once through SMTP.

pub mod service;

// Re-export member crates
pub use postal_config as config;
pub use postal_log as log;
pub use postal_mail as mail;
pub use postal_messaging as messaging;
pub use postal_pool as pool;

// Prelude for common imports
pub mod prelude {
    pub use crate::service::{mailer_from_config, pool_config, run_consumer, smtp_config};
    pub use postal_config::{ServiceConfig, Validate};
    pub use postal_mail::{EmailSender, TemplateMailer};
    pub use postal_messaging::{
        BrokerReader, BrokerWriter, EmailEvent, EmailMessage, EmailPriority, EmailProducer,
        EmailRequest, EmailStatus, EmailType, InMemoryBroker, MessagingError, PooledConsumer,
        ResultHandler, SequentialConsumer,
    };
    pub use postal_pool::{CancellationToken, FnJob, Job, JobResult, PoolConfig, WorkerPool};
}
