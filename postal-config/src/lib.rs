// Configuration management for postal services

pub mod env;
pub mod error;
pub mod service;
pub mod validation;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use service::{KafkaSettings, ServiceConfig, SmtpSettings, TlsMode, WorkerSettings};
pub use validation::{ConfigValidator, Validate};
