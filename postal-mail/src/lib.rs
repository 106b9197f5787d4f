//! # Postal Mail
//!
//! Templated email delivery for postal services.
//!
//! ## Features
//!
//! - **SMTP Transport**: lettre-backed SMTP with STARTTLS or implicit TLS
//! - **Templates**: paired `<name>.html.hbs` / `<name>.plain.hbs` Handlebars templates
//! - **Send Primitive**: [`EmailSender`], the single call the email pipeline makes
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use postal_mail::{EmailSender, SmtpConfig, TemplateMailer};
//! use std::collections::HashMap;
//!
//! let config = SmtpConfig::new("smtp.mailtrap.io")
//!     .port(2525)
//!     .credentials("user", "password");
//! let mailer = TemplateMailer::smtp(config, "./templates/email")?;
//!
//! let data = HashMap::from([("name".to_string(), serde_json::json!("Ada"))]);
//! mailer
//!     .send_email("noreply@example.com", "ada@example.com", "Welcome!", "welcome", &data)
//!     .await?;
//! ```
//!
//! ## Testing without SMTP
//!
//! ```
//! use postal_mail::prelude::*;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! let mut templates = HandlebarsEngine::new();
//! templates
//!     .register_template("welcome", "<p>Hi {{name}}</p>", "Hi {{name}}")
//!     .unwrap();
//! let transport = Arc::new(MemoryTransport::new());
//! let mailer = TemplateMailer::from_parts(transport.clone(), Arc::new(templates));
//!
//! let data = HashMap::from([("name".to_string(), serde_json::json!("Ada"))]);
//! tokio_test::block_on(mailer.send_email(
//!     "noreply@example.com",
//!     "ada@example.com",
//!     "Welcome!",
//!     "welcome",
//!     &data,
//! ))
//! .unwrap();
//! assert_eq!(transport.sent()[0].text, "Hi Ada");
//! ```

mod email;
mod error;
mod mailer;
mod template_handlebars;
mod transport;

pub use email::Email;
pub use error::{MailError, Result};
pub use mailer::{EmailSender, TemplateMailer};
pub use template_handlebars::HandlebarsEngine;
pub use transport::{MemoryTransport, SmtpConfig, SmtpSecurity, SmtpTransport, Transport};

/// Template engine trait for rendering email templates.
pub trait TemplateEngine: Send + Sync {
    /// Render a template with the given name and context.
    fn render(&self, name: &str, context: &serde_json::Value) -> Result<RenderedTemplate>;

    /// Check if a template exists.
    fn has_template(&self, name: &str) -> bool;

    /// Register a template from its HTML and plain-text sources.
    fn register_template(&mut self, name: &str, html: &str, text: &str) -> Result<()>;
}

/// Rendered template output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTemplate {
    /// HTML content.
    pub html: String,
    /// Plain text content.
    pub text: String,
}

/// Prelude for common imports.
pub mod prelude {
    pub use crate::email::Email;
    pub use crate::error::{MailError, Result};
    pub use crate::mailer::{EmailSender, TemplateMailer};
    pub use crate::transport::{MemoryTransport, SmtpConfig, SmtpSecurity, SmtpTransport, Transport};
    pub use crate::{HandlebarsEngine, RenderedTemplate, TemplateEngine};
}
