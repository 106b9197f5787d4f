//! Wiring from [`ServiceConfig`] to the runtime components.

use postal_config::{ServiceConfig, SmtpSettings, TlsMode};
use postal_mail::{SmtpConfig, SmtpSecurity, TemplateMailer};
use postal_messaging::{MessagingError, PooledConsumer};
use postal_pool::{CancellationToken, PoolConfig, WorkerPool};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// SMTP transport settings for the configured server.
pub fn smtp_config(settings: &SmtpSettings) -> SmtpConfig {
    let security = match settings.security {
        TlsMode::None => SmtpSecurity::None,
        TlsMode::StartTls => SmtpSecurity::StartTls,
        TlsMode::Tls => SmtpSecurity::Tls,
    };

    let config = SmtpConfig::new(&settings.host)
        .port(settings.port)
        .security(security);

    match (&settings.username, &settings.password) {
        (Some(user), Some(password)) => config.credentials(user, password),
        _ => config,
    }
}

/// Worker pool sizing for the configured service.
pub fn pool_config(config: &ServiceConfig) -> PoolConfig {
    PoolConfig::new(config.workers.count, config.workers.buffer_size).with_name("email-workers")
}

/// SMTP mailer rendering the configured template directory.
pub fn mailer_from_config(config: &ServiceConfig) -> postal_mail::Result<TemplateMailer> {
    TemplateMailer::smtp(smtp_config(&config.smtp), &config.template_dir)
}

/// Run `consumer` until `shutdown` resolves or the consumer stops by itself,
/// then close the reader and drain `pool` within `shutdown_timeout`.
///
/// The pool must already be started. Fails if the consumer ended for any
/// reason other than cancellation.
pub async fn run_consumer(
    consumer: Arc<PooledConsumer>,
    pool: &WorkerPool,
    shutdown_timeout: Duration,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let mut consuming = {
        let consumer = consumer.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { consumer.start(cancel).await })
    };

    let finished = tokio::select! {
        _ = shutdown => None,
        joined = &mut consuming => Some(joined),
    };
    cancel.cancel();
    let stopped = match finished {
        Some(joined) => joined,
        None => consuming.await,
    };
    info!("Shutting down email consumer");

    let failure = match stopped {
        Ok(Ok(())) | Ok(Err(MessagingError::Cancelled)) => None,
        Ok(Err(e)) => {
            error!(error = %e, "Consumer stopped with error");
            Some(anyhow::Error::new(e).context("email consumer stopped"))
        }
        Err(e) => {
            error!(error = %e, "Consumer task failed");
            Some(anyhow::Error::new(e).context("email consumer task failed"))
        }
    };

    if let Err(e) = consumer.close().await {
        warn!(error = %e, "Failed to close consumer");
    }

    match pool.stop_with_timeout(shutdown_timeout).await {
        Ok(()) => consumer.wait_for_results().await,
        Err(e) => warn!(error = %e, "Worker pool did not drain in time"),
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
