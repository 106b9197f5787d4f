//! Email transport implementations.

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
    transport::smtp::authentication::Credentials,
};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

use crate::{Email, MailError, Result};

/// Email transport trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send an email.
    async fn send(&self, email: &Email) -> Result<()>;

    /// Check if the transport is healthy.
    async fn is_healthy(&self) -> bool {
        true
    }
}

/// SMTP security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SmtpSecurity {
    /// No encryption.
    None,
    /// STARTTLS upgrade.
    #[default]
    StartTls,
    /// Implicit TLS.
    Tls,
}

/// SMTP configuration.
#[derive(Clone)]
pub struct SmtpConfig {
    /// SMTP server host.
    pub host: String,
    /// SMTP server port.
    pub port: u16,
    /// Security mode.
    pub security: SmtpSecurity,
    /// Username for authentication.
    pub username: Option<String>,
    /// Password for authentication.
    pub password: Option<String>,
    /// Connect and send timeout.
    pub timeout: Duration,
}

impl SmtpConfig {
    /// Create a new SMTP configuration.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 587,
            security: SmtpSecurity::StartTls,
            username: None,
            password: None,
            timeout: Duration::from_secs(10),
        }
    }

    /// Set credentials.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the security mode.
    pub fn security(mut self, security: SmtpSecurity) -> Self {
        self.security = security;
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// SMTP transport.
pub struct SmtpTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    config: SmtpConfig,
}

impl SmtpTransport {
    /// Create a new SMTP transport.
    ///
    /// No connection is opened until the first send.
    pub fn new(config: SmtpConfig) -> Result<Self> {
        if config.host.trim().is_empty() {
            return Err(MailError::Config("SMTP host is empty".to_string()));
        }

        let mut builder = match config.security {
            SmtpSecurity::None => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            }
            SmtpSecurity::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            }
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?,
        };

        builder = builder.port(config.port).timeout(Some(config.timeout));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        let transport = builder.build();

        info!(
            host = %config.host,
            port = config.port,
            security = ?config.security,
            "SMTP transport initialized"
        );

        Ok(Self { transport, config })
    }

    /// Get the configuration.
    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    /// Test the SMTP connection.
    pub async fn test_connection(&self) -> Result<bool> {
        self.transport
            .test_connection()
            .await
            .map_err(MailError::from)
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, email: &Email) -> Result<()> {
        let message = email.to_lettre()?;

        debug!(
            to = ?email.to,
            subject = %email.subject,
            "Sending email via SMTP"
        );

        self.transport.send(message).await?;
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        self.test_connection().await.unwrap_or(false)
    }
}

/// Transport that keeps sent emails in memory.
///
/// Used by tests and local runs without an SMTP server.
#[derive(Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<Email>>,
    fail_with: Mutex<Option<String>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following send fail with an SMTP error.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.fail_with.lock().unwrap_or_else(|e| e.into_inner()) = Some(message.into());
    }

    /// Let sends succeed again.
    pub fn recover(&self) {
        *self.fail_with.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Emails sent so far.
    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of emails sent so far.
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, email: &Email) -> Result<()> {
        email.validate()?;

        let failure = self
            .fail_with
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(message) = failure {
            return Err(MailError::Smtp(message));
        }

        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(email.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smtp_config_builder() {
        let config = SmtpConfig::new("smtp.mailtrap.io")
            .port(2525)
            .security(SmtpSecurity::StartTls)
            .credentials("user", "pass");

        assert_eq!(config.host, "smtp.mailtrap.io");
        assert_eq!(config.port, 2525);
        assert_eq!(config.security, SmtpSecurity::StartTls);
        assert_eq!(config.username.as_deref(), Some("user"));
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert!(!format!("{:?}", config).contains("pass\""));
    }

    #[test]
    fn test_smtp_transport_rejects_empty_host() {
        assert!(matches!(
            SmtpTransport::new(SmtpConfig::new("")),
            Err(MailError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_smtp_transport_builds_without_connecting() {
        let transport = SmtpTransport::new(
            SmtpConfig::new("localhost")
                .port(2525)
                .security(SmtpSecurity::None),
        )
        .unwrap();
        assert_eq!(transport.config().port, 2525);
    }

    #[tokio::test]
    async fn test_memory_transport_records_and_fails() {
        let transport = MemoryTransport::new();
        let email = Email::new()
            .from("a@example.com")
            .to("b@example.com")
            .subject("hi");

        transport.send(&email).await.unwrap();
        assert_eq!(transport.sent_count(), 1);

        transport.fail_with("connection refused");
        let err = transport.send(&email).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(transport.sent_count(), 1);

        transport.recover();
        transport.send(&email).await.unwrap();
        assert_eq!(transport.sent()[1].subject, "hi");
    }
}
