//! Email delivery service.
//!
//! Consumes email events from Kafka and delivers them over SMTP on a bounded
//! worker pool. Configuration comes from the environment (and `.env`);
//! command-line flags override it.

use anyhow::{Context, Result};
use clap::Parser;
use postal::prelude::*;
use postal::messaging::{KafkaConfig, KafkaReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Queue-backed email delivery service
#[derive(Parser)]
#[command(name = "postal-messaging-service")]
#[command(version)]
#[command(about = "Consume queued email events and deliver them over SMTP")]
struct Cli {
    /// Comma-separated Kafka bootstrap brokers
    #[arg(long, value_delimiter = ',')]
    brokers: Option<Vec<String>>,

    /// Topic carrying email events
    #[arg(long)]
    topic: Option<String>,

    /// Kafka consumer group
    #[arg(long)]
    group_id: Option<String>,

    /// Number of concurrent delivery workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Job queue capacity
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Directory containing `<name>.html.hbs` / `<name>.plain.hbs` templates
    #[arg(long)]
    template_dir: Option<PathBuf>,

    /// Seconds to wait for in-flight deliveries on shutdown
    #[arg(long)]
    shutdown_timeout: Option<u64>,

    /// SMTP server host
    #[arg(long)]
    smtp_host: Option<String>,

    /// SMTP server port
    #[arg(long)]
    smtp_port: Option<u16>,

    /// SMTP username
    #[arg(long)]
    smtp_user: Option<String>,

    /// SMTP password
    #[arg(long)]
    smtp_pass: Option<String>,

    /// Deployment environment name
    #[arg(long)]
    env: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut ServiceConfig) {
        if let Some(brokers) = self.brokers {
            config.kafka.brokers = brokers;
        }
        if let Some(topic) = self.topic {
            config.kafka.topic = topic;
        }
        if let Some(group_id) = self.group_id {
            config.kafka.group_id = group_id;
        }
        if let Some(workers) = self.workers {
            config.workers.count = workers;
        }
        if let Some(buffer_size) = self.buffer_size {
            config.workers.buffer_size = buffer_size;
        }
        if let Some(template_dir) = self.template_dir {
            config.template_dir = template_dir;
        }
        if let Some(secs) = self.shutdown_timeout {
            config.shutdown_timeout = Duration::from_secs(secs);
        }
        if let Some(host) = self.smtp_host {
            config.smtp.host = host;
        }
        if let Some(port) = self.smtp_port {
            config.smtp.port = port;
        }
        if let Some(user) = self.smtp_user {
            config.smtp.username = Some(user);
        }
        if let Some(pass) = self.smtp_pass {
            config.smtp.password = Some(pass);
        }
        if let Some(env) = self.env {
            config.env = env;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ServiceConfig::from_env().context("failed to load configuration")?;
    cli.apply(&mut config);
    config.validate().context("invalid configuration")?;

    postal::log::init();
    info!(
        env = %config.env,
        brokers = ?config.kafka.brokers,
        topic = %config.kafka.topic,
        workers = config.workers.count,
        "Starting email service"
    );

    let mailer = mailer_from_config(&config).context("failed to create mailer")?;
    let kafka = KafkaConfig::new(config.kafka.brokers.clone(), &config.kafka.topic)
        .with_group_id(&config.kafka.group_id);
    let reader = KafkaReader::new(&kafka).context("failed to create Kafka consumer")?;

    let pool = WorkerPool::with_config(pool_config(&config));
    pool.start()?;

    let consumer = Arc::new(PooledConsumer::new(Arc::new(reader), Arc::new(mailer), pool.clone()));
    run_consumer(consumer, &pool, config.shutdown_timeout, shutdown_signal()).await?;

    info!("Email service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
    info!("Shutting down email service");
}
