//! Typed configuration for the messaging service.

use crate::{ConfigValidator, EnvLoader, Result, Validate};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Transport security requested for the SMTP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// Plain connection.
    None,
    /// Upgrade with STARTTLS.
    #[default]
    StartTls,
    /// Implicit TLS.
    Tls,
}

impl FromStr for TlsMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "plain" | "insecure" => Ok(TlsMode::None),
            "starttls" => Ok(TlsMode::StartTls),
            "tls" | "ssl" => Ok(TlsMode::Tls),
            other => Err(format!("unknown SMTP security mode: {}", other)),
        }
    }
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaSettings {
    /// Bootstrap brokers.
    pub brokers: Vec<String>,
    /// Topic carrying email events.
    pub topic: String,
    /// Consumer group ID.
    pub group_id: String,
}

/// SMTP connection settings.
#[derive(Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub security: TlsMode,
}

impl fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("security", &self.security)
            .finish()
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Number of concurrent workers.
    pub count: usize,
    /// Capacity of the job and result queues.
    pub buffer_size: usize,
}

/// Full configuration of the messaging service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Environment label (`development`, `production`, ...).
    pub env: String,
    pub kafka: KafkaSettings,
    pub smtp: SmtpSettings,
    pub workers: WorkerSettings,
    /// Directory holding `<name>.html.hbs` / `<name>.plain.hbs` templates.
    pub template_dir: PathBuf,
    /// Budget for draining the worker pool on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            env: "development".to_string(),
            kafka: KafkaSettings {
                brokers: vec!["localhost:9093".to_string()],
                topic: "email-queue".to_string(),
                group_id: "messaging-service-group".to_string(),
            },
            smtp: SmtpSettings {
                host: "smtp.mailtrap.io".to_string(),
                port: 2525,
                username: None,
                password: None,
                security: TlsMode::StartTls,
            },
            workers: WorkerSettings {
                count: 10,
                buffer_size: 100,
            },
            template_dir: PathBuf::from("./templates/email"),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServiceConfig {
    /// Load `.env` (if present) and then the process environment.
    pub fn from_env() -> Result<Self> {
        EnvLoader::load_dotenv(None)?;
        Self::from_loader(&EnvLoader::default())
    }

    /// Build the configuration from a loader, applying defaults for unset keys.
    pub fn from_loader(loader: &EnvLoader) -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            env: loader.load_var_or("APP_ENV", &defaults.env),
            kafka: KafkaSettings {
                brokers: loader.list_var_or("KAFKA_BROKERS", &defaults.kafka.brokers.join(",")),
                topic: loader.load_var_or("KAFKA_TOPIC", &defaults.kafka.topic),
                group_id: loader.load_var_or("KAFKA_GROUP_ID", &defaults.kafka.group_id),
            },
            smtp: SmtpSettings {
                host: loader.load_var_or("SMTP_HOST", &defaults.smtp.host),
                port: loader.parse_var_or("SMTP_PORT", defaults.smtp.port)?,
                username: loader.load_var("SMTP_USER").ok(),
                password: loader.load_var("SMTP_PASSWORD").ok(),
                security: loader.parse_var_or("SMTP_SECURITY", defaults.smtp.security)?,
            },
            workers: WorkerSettings {
                count: loader.parse_var_or("EMAIL_WORKER_COUNT", defaults.workers.count)?,
                buffer_size: loader
                    .parse_var_or("EMAIL_WORKER_BUFFER", defaults.workers.buffer_size)?,
            },
            template_dir: loader
                .load_var("EMAIL_TEMPLATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.template_dir),
            shutdown_timeout: Duration::from_secs(
                loader.parse_var_or("SHUTDOWN_TIMEOUT_SECS", defaults.shutdown_timeout.as_secs())?,
            ),
        };

        tracing::debug!(
            brokers = ?config.kafka.brokers,
            topic = %config.kafka.topic,
            workers = config.workers.count,
            "Loaded service configuration"
        );

        Ok(config)
    }
}

impl Validate for ServiceConfig {
    fn validate(&self) -> Result<()> {
        ConfigValidator::not_empty_list(&self.kafka.brokers, "kafka brokers")?;
        for broker in &self.kafka.brokers {
            ConfigValidator::is_host_port(broker, "kafka broker")?;
        }
        ConfigValidator::not_empty(&self.kafka.topic, "kafka topic")?;
        ConfigValidator::not_empty(&self.kafka.group_id, "kafka group id")?;
        ConfigValidator::not_empty(&self.smtp.host, "smtp host")?;
        ConfigValidator::is_port(self.smtp.port, "smtp port")?;
        ConfigValidator::at_least(self.workers.count, 1, "worker count")?;
        ConfigValidator::at_least(self.workers.buffer_size, 1, "worker buffer size")?;
        Ok(())
    }
}
