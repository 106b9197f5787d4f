//! Template-driven mailer.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use crate::{Email, HandlebarsEngine, Result, SmtpConfig, SmtpTransport, TemplateEngine, Transport};

/// Sends one templated email.
///
/// Errors propagate verbatim so callers can decide whether to retry.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(
        &self,
        from: &str,
        to: &str,
        subject: &str,
        template: &str,
        data: &HashMap<String, Value>,
    ) -> Result<()>;
}

/// Renders a named template and delivers it through a transport.
#[derive(Clone)]
pub struct TemplateMailer {
    transport: Arc<dyn Transport>,
    templates: Arc<dyn TemplateEngine>,
}

impl TemplateMailer {
    /// Create a mailer from a transport and a template engine.
    pub fn new(transport: impl Transport + 'static, templates: impl TemplateEngine + 'static) -> Self {
        Self {
            transport: Arc::new(transport),
            templates: Arc::new(templates),
        }
    }

    /// Create a mailer from shared parts.
    pub fn from_parts(transport: Arc<dyn Transport>, templates: Arc<dyn TemplateEngine>) -> Self {
        Self {
            transport,
            templates,
        }
    }

    /// SMTP delivery with handlebars templates loaded from `template_dir`.
    pub fn smtp(config: SmtpConfig, template_dir: impl AsRef<Path>) -> Result<Self> {
        let transport = SmtpTransport::new(config)?;
        let templates = HandlebarsEngine::from_directory(template_dir)?;
        Ok(Self::new(transport, templates))
    }

    /// Render a template into an email without sending it.
    pub fn render(
        &self,
        from: &str,
        to: &str,
        subject: &str,
        template: &str,
        data: &HashMap<String, Value>,
    ) -> Result<Email> {
        let context = Value::Object(data.clone().into_iter().collect());
        let rendered = self.templates.render(template, &context)?;

        Ok(Email::new()
            .from(from)
            .to(to)
            .subject(subject)
            .html(rendered.html)
            .text(rendered.text))
    }

    /// Check the transport.
    pub async fn is_healthy(&self) -> bool {
        self.transport.is_healthy().await
    }
}

#[async_trait]
impl EmailSender for TemplateMailer {
    async fn send_email(
        &self,
        from: &str,
        to: &str,
        subject: &str,
        template: &str,
        data: &HashMap<String, Value>,
    ) -> Result<()> {
        let email = self.render(from, to, subject, template, data).inspect_err(|e| {
            error!(template = %template, error = %e, "Failed to render email template");
        })?;

        self.transport.send(&email).await.inspect_err(|e| {
            error!(to = %to, error = %e, "Failed to send email");
        })?;

        info!(from = %from, to = %to, subject = %subject, "Email sent successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MailError, MemoryTransport};
    use serde_json::json;

    fn mailer() -> (TemplateMailer, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let mut templates = HandlebarsEngine::new();
        templates
            .register_template(
                "password-reset",
                "<a href=\"{{link}}\">Reset</a>",
                "Reset: {{link}}",
            )
            .unwrap();
        let mailer = TemplateMailer::from_parts(transport.clone(), Arc::new(templates));
        (mailer, transport)
    }

    fn data() -> HashMap<String, Value> {
        HashMap::from([("link".to_string(), json!("https://example.com/r/abc"))])
    }

    #[tokio::test]
    async fn test_send_renders_both_bodies() {
        let (mailer, transport) = mailer();

        mailer
            .send_email(
                "noreply@example.com",
                "user@example.com",
                "Reset your password",
                "password-reset",
                &data(),
            )
            .await
            .unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["user@example.com"]);
        assert_eq!(sent[0].text, "Reset: https://example.com/r/abc");
        assert!(sent[0].html.contains("https://example.com/r/abc"));
    }

    #[tokio::test]
    async fn test_unknown_template_is_not_sent() {
        let (mailer, transport) = mailer();

        let err = mailer
            .send_email("a@example.com", "b@example.com", "Hi", "welcome", &data())
            .await
            .unwrap_err();

        assert!(matches!(err, MailError::TemplateNotFound(_)));
        assert_eq!(transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let (mailer, transport) = mailer();
        transport.fail_with("421 service not available");

        let err = mailer
            .send_email("a@example.com", "b@example.com", "Hi", "password-reset", &data())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "SMTP error: 421 service not available");
    }
}
