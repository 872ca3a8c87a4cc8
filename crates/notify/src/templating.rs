//! Minijinja template rendering for interface messages.
//!
//! Templates are arbitrary strings from configuration (not pre-registered),
//! so a fresh [`minijinja::Environment`] is created per render call.

use serde::{Deserialize, Serialize};

use crate::traits::{InterfaceError, Message};

/// Context data available to message templates.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MessageContext {
    /// Rouser name.
    pub rouser: String,
    /// Active (or just stopped) alarm name.
    pub alarm: Option<String>,
    /// `"idle"`, `"sounding"` or `"snoozed"`.
    pub phase: String,
    /// The host's local network address, if known.
    pub address: Option<String>,
    /// The previous address, for change notices.
    pub previous_address: Option<String>,
    /// Current time, RFC 3339.
    pub now: String,
}

/// A subject/body template pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub subject: String,
    pub body: String,
}

impl MessageTemplate {
    fn new(subject: &str, body: &str) -> Self {
        Self {
            subject: subject.to_string(),
            body: body.to_string(),
        }
    }
}

/// Templates for every message an interface sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageTemplates {
    pub online: MessageTemplate,
    pub alarm_started: MessageTemplate,
    pub alarm_stopped: MessageTemplate,
    pub address_changed: MessageTemplate,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            online: MessageTemplate::new(
                "{{ rouser }} is online",
                "{{ rouser }} started at {{ now }}.\n\
                 {% if address %}Local address: {{ address }}{% else %}Local address unknown.{% endif %}",
            ),
            alarm_started: MessageTemplate::new(
                "Alarm {{ alarm or 'unnamed' }} started",
                "{{ rouser }} started alarm {{ alarm or 'unnamed' }} at {{ now }}.",
            ),
            alarm_stopped: MessageTemplate::new(
                "Alarm {{ alarm or 'unnamed' }} stopped",
                "{{ rouser }} stopped alarm {{ alarm or 'unnamed' }} at {{ now }}.",
            ),
            address_changed: MessageTemplate::new(
                "{{ rouser }} address changed",
                "Local address changed from {{ previous_address }} to {{ address }} at {{ now }}.",
            ),
        }
    }
}

/// Renders message templates using minijinja.
#[derive(Debug, Default)]
pub struct TemplateRenderer {
    _private: (),
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self { _private: () }
    }

    fn build_env() -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();

        // Registered explicitly; the "builtins" feature may be off.
        env.add_filter("lower", lower_filter);
        env.add_filter("upper", upper_filter);

        env.add_function("env", env_function);

        env
    }

    /// Render a single template string.
    pub fn render(&self, template_str: &str, ctx: &MessageContext) -> Result<String, InterfaceError> {
        let env = Self::build_env();
        env.render_str(template_str, ctx)
            .map_err(|e| InterfaceError::Template(e.to_string()))
    }

    /// Render a subject/body pair.
    pub fn render_message(
        &self,
        template: &MessageTemplate,
        ctx: &MessageContext,
    ) -> Result<Message, InterfaceError> {
        Ok(Message {
            subject: self.render(&template.subject, ctx)?,
            body: self.render(&template.body, ctx)?,
        })
    }

    /// Check that a template string parses, without evaluating it.
    pub fn validate(&self, template_str: &str) -> Result<(), InterfaceError> {
        let env = Self::build_env();
        env.template_from_str(template_str)
            .map_err(|e| InterfaceError::Template(e.to_string()))?;
        Ok(())
    }

    /// Validate every template in the set.
    pub fn validate_all(&self, templates: &MessageTemplates) -> Result<(), InterfaceError> {
        for t in [
            &templates.online,
            &templates.alarm_started,
            &templates.alarm_stopped,
            &templates.address_changed,
        ] {
            self.validate(&t.subject)?;
            self.validate(&t.body)?;
        }
        Ok(())
    }
}

fn lower_filter(value: String) -> String {
    value.to_lowercase()
}

fn upper_filter(value: String) -> String {
    value.to_uppercase()
}

/// `env("NAME")`: environment variable, or empty string when unset.
fn env_function(name: String) -> String {
    std::env::var(name).unwrap_or_default()
}
