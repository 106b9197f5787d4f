//! Outgoing email representation.

use lettre::message::{Mailbox, MultiPart};
use serde::{Deserialize, Serialize};

use crate::{MailError, Result};

/// A rendered email ready for a transport.
///
/// Every message carries both an HTML and a plain-text body and goes out as
/// `multipart/alternative`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    /// Sender address.
    pub from: String,
    /// Recipient addresses.
    pub to: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// HTML body.
    pub html: String,
    /// Plain-text body.
    pub text: String,
}

impl Email {
    /// Create an empty email.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sender.
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    /// Add a recipient.
    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.to.push(to.into());
        self
    }

    /// Set the subject.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Set the HTML body.
    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.html = html.into();
        self
    }

    /// Set the plain-text body.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Check required fields.
    pub fn validate(&self) -> Result<()> {
        if self.from.trim().is_empty() {
            return Err(MailError::MissingField("from"));
        }
        if self.to.is_empty() {
            return Err(MailError::MissingField("to"));
        }
        Ok(())
    }

    pub(crate) fn to_lettre(&self) -> Result<lettre::Message> {
        self.validate()?;

        let from: Mailbox = self.from.parse()?;
        let mut builder = lettre::Message::builder()
            .from(from)
            .subject(self.subject.as_str());

        for addr in &self.to {
            builder = builder.to(addr.parse::<Mailbox>()?);
        }

        let body = MultiPart::alternative_plain_html(self.text.clone(), self.html.clone());
        Ok(builder.multipart(body)?)
    }
}
