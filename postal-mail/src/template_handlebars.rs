//! Handlebars template engine integration.

use handlebars::Handlebars;
use std::path::Path;
use tracing::debug;

use crate::{MailError, RenderedTemplate, Result, TemplateEngine};

const HTML_SUFFIX: &str = ".html.hbs";
const TEXT_SUFFIX: &str = ".plain.hbs";

/// Handlebars-based template engine for emails.
///
/// A template `name` is a pair of `name/html` and `name/plain` entries. Both
/// must be present for the template to render.
pub struct HandlebarsEngine {
    handlebars: Handlebars<'static>,
}

impl HandlebarsEngine {
    /// Create an empty engine.
    ///
    /// Strict mode is off: missing data keys render as empty strings.
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        Self { handlebars }
    }

    /// Load templates from a directory.
    ///
    /// Expected structure:
    /// ```text
    /// templates/email/
    ///   password-reset.html.hbs
    ///   password-reset.plain.hbs
    ///   welcome.html.hbs
    ///   welcome.plain.hbs
    /// ```
    pub fn from_directory(path: impl AsRef<Path>) -> Result<Self> {
        let mut engine = Self::new();
        let path = path.as_ref();

        if !path.is_dir() {
            return Err(MailError::Config(format!(
                "Template directory not found: {}",
                path.display()
            )));
        }

        for entry in std::fs::read_dir(path)? {
            let entry_path = entry?.path();
            if !entry_path.is_file() {
                continue;
            }

            let Some(file_name) = entry_path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            let key = if let Some(name) = file_name.strip_suffix(HTML_SUFFIX) {
                format!("{}/html", name)
            } else if let Some(name) = file_name.strip_suffix(TEXT_SUFFIX) {
                format!("{}/plain", name)
            } else {
                continue;
            };

            let content = std::fs::read_to_string(&entry_path)?;
            engine.handlebars.register_template_string(&key, content)?;
            debug!(template = %key, "Loaded email template");
        }

        Ok(engine)
    }

    /// Register a partial template.
    pub fn register_partial(mut self, name: &str, content: &str) -> Result<Self> {
        self.handlebars.register_partial(name, content)?;
        Ok(self)
    }

    /// Names of templates that have both bodies.
    pub fn template_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlebars
            .get_templates()
            .keys()
            .filter_map(|key| key.strip_suffix("/html"))
            .filter(|name| self.has_template(name))
            .map(String::from)
            .collect();
        names.sort();
        names
    }
}

impl Default for HandlebarsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine for HandlebarsEngine {
    fn render(&self, name: &str, context: &serde_json::Value) -> Result<RenderedTemplate> {
        let html_key = format!("{}/html", name);
        let text_key = format!("{}/plain", name);

        if !self.handlebars.has_template(&html_key) {
            return Err(MailError::TemplateNotFound(format!("{}{}", name, HTML_SUFFIX)));
        }
        if !self.handlebars.has_template(&text_key) {
            return Err(MailError::TemplateNotFound(format!("{}{}", name, TEXT_SUFFIX)));
        }

        Ok(RenderedTemplate {
            html: self.handlebars.render(&html_key, context)?,
            text: self.handlebars.render(&text_key, context)?,
        })
    }

    fn has_template(&self, name: &str) -> bool {
        self.handlebars.has_template(&format!("{}/html", name))
            && self.handlebars.has_template(&format!("{}/plain", name))
    }

    fn register_template(&mut self, name: &str, html: &str, text: &str) -> Result<()> {
        self.handlebars
            .register_template_string(&format!("{}/html", name), html)?;
        self.handlebars
            .register_template_string(&format!("{}/plain", name), text)?;
        Ok(())
    }
}
