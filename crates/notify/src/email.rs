//! SMTP email interface via `lettre`.
//!
//! Sends an "online" notice at startup, acknowledgements when the rouser's
//! alarm starts or stops, and a notice whenever the host's local address
//! changes. Delivery runs on a small private tokio runtime so the
//! orchestrator's synchronous tick can call into it; every SMTP round trip is
//! bounded by `timeout_secs`.

use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Tokio1Executor,
};
use serde::Deserialize;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use rouse_rouser::{AlarmPhase, AlarmStatus};

use crate::ip_watch::{AddressChange, AddressProbe, AddressWatcher, RouteProbe};
use crate::templating::{MessageContext, MessageTemplate, MessageTemplates, TemplateRenderer};
use crate::traits::{Interface, InterfaceContext, InterfaceError, Message};

/// One `[email.<key>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_server: String,
    /// Defaults to 587, or 25 when `tls` is false.
    #[serde(default)]
    pub smtp_port: Option<u16>,
    /// STARTTLS unless explicitly `false`. Port 465 always uses implicit TLS.
    #[serde(default)]
    pub tls: Option<bool>,
    /// Sender address; also the recipient when `to` is empty.
    pub address: String,
    #[serde(default)]
    pub to: Vec<String>,
    /// Falls back to `SMTP_USERNAME`, then to `address`.
    #[serde(default)]
    pub username: Option<String>,
    /// Falls back to `SMTP_PASSWORD`.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_ip_check_secs")]
    pub ip_check_secs: u64,
    #[serde(default)]
    pub templates: MessageTemplates,
}

fn default_timeout_secs() -> u64 { 10 }
fn default_ip_check_secs() -> u64 { 300 }

impl EmailConfig {
    pub fn recipients(&self) -> Vec<String> {
        if self.to.is_empty() {
            vec![self.address.clone()]
        } else {
            self.to.clone()
        }
    }

    /// Login for the relay. `None` (unauthenticated) when no password is
    /// configured.
    pub fn credentials(&self) -> Option<(String, String)> {
        let password = self
            .password
            .clone()
            .or_else(|| std::env::var("SMTP_PASSWORD").ok())?;
        let username = self
            .username
            .clone()
            .or_else(|| std::env::var("SMTP_USERNAME").ok())
            .unwrap_or_else(|| self.address.clone());
        Some((username, password))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn ip_check_interval(&self) -> Duration {
        Duration::from_secs(self.ip_check_secs.max(1))
    }
}

/// Message delivery backend.
#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &Message) -> Result<(), InterfaceError>;

    /// `Ok(true)` when the server accepted a connection.
    async fn test_connection(&self) -> Result<bool, InterfaceError>;
}

/// [`Mailer`] over an SMTP relay.
#[derive(Debug)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl SmtpMailer {
    pub fn from_config(config: &EmailConfig) -> Result<Self, InterfaceError> {
        let from: Mailbox = config
            .address
            .parse()
            .map_err(|e: lettre::address::AddressError| InterfaceError::Config(e.to_string()))?;

        let to = config
            .recipients()
            .iter()
            .map(|addr| {
                addr.parse()
                    .map_err(|e: lettre::address::AddressError| InterfaceError::Config(e.to_string()))
            })
            .collect::<Result<Vec<Mailbox>, _>>()?;

        let use_tls = config.tls.unwrap_or(true);
        let port = config
            .smtp_port
            .unwrap_or(if use_tls { 587 } else { 25 });
        let host = config.smtp_server.as_str();

        // Port 465 is implicit TLS; elsewhere TLS means STARTTLS.
        let builder = if port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| InterfaceError::Config(e.to_string()))?
        } else if use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| InterfaceError::Config(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        };
        let mut builder = builder.port(port).timeout(Some(config.timeout()));

        if let Some((username, password)) = config.credentials() {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }
}

#[async_trait::async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: &Message) -> Result<(), InterfaceError> {
        let mut builder = lettre::Message::builder().from(self.from.clone());
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }
        let email = builder
            .subject(&message.subject)
            .body(message.body.clone())
            .map_err(|e| InterfaceError::Smtp(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| InterfaceError::Smtp(e.to_string()))?;

        info!(
            channel = "email",
            subject = %message.subject,
            recipients = self.to.len(),
            "message delivered"
        );
        Ok(())
    }

    async fn test_connection(&self) -> Result<bool, InterfaceError> {
        self.transport
            .test_connection()
            .await
            .map_err(|e| InterfaceError::Smtp(e.to_string()))
    }
}

/// Which alarm the interface last reported as active. `Some(None)` is an
/// unnamed alarm.
type SeenAlarm = Option<Option<String>>;

/// Email [`Interface`].
pub struct EmailInterface<M: Mailer = SmtpMailer> {
    label: String,
    rouser: String,
    config: EmailConfig,
    mailer: M,
    probe: Arc<dyn AddressProbe>,
    renderer: TemplateRenderer,
    runtime: Runtime,
    watcher: Option<AddressWatcher>,
    address: Option<IpAddr>,
    last_alarm: SeenAlarm,
}

impl EmailInterface<SmtpMailer> {
    /// Email interface for the rouser called `rouser`, configured from the
    /// `[email.<key>]` section.
    pub fn new(key: &str, rouser: &str, config: EmailConfig) -> Result<Self, InterfaceError> {
        let mailer = SmtpMailer::from_config(&config)?;
        Self::with_mailer(key, rouser, config, mailer)
    }
}

impl<M: Mailer> EmailInterface<M> {
    pub fn with_mailer(
        key: &str,
        rouser: &str,
        config: EmailConfig,
        mailer: M,
    ) -> Result<Self, InterfaceError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(format!("rouse-email-{key}"))
            .enable_all()
            .build()?;

        Ok(Self {
            label: format!("email:{key}"),
            rouser: rouser.to_string(),
            config,
            mailer,
            probe: Arc::new(RouteProbe::default()),
            renderer: TemplateRenderer::new(),
            runtime,
            watcher: None,
            address: None,
            last_alarm: None,
        })
    }

    pub fn with_probe(mut self, probe: Arc<dyn AddressProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn mailer(&self) -> &M {
        &self.mailer
    }

    /// Last known local address.
    pub fn address(&self) -> Option<IpAddr> {
        self.address
    }

    fn context(&self, now: DateTime<Utc>) -> MessageContext {
        MessageContext {
            rouser: self.rouser.clone(),
            alarm: None,
            phase: phase_label(AlarmPhase::Idle).to_string(),
            address: self.address.map(|a| a.to_string()),
            previous_address: None,
            now: now.to_rfc3339(),
        }
    }

    fn deliver(&self, template: &MessageTemplate, ctx: &MessageContext) -> Result<(), InterfaceError> {
        let message = self.renderer.render_message(template, ctx)?;
        bounded(&self.runtime, self.config.timeout(), self.mailer.send(&message))
    }

    fn address_notices(&mut self, changes: Vec<AddressChange>, now: DateTime<Utc>) -> Vec<(MessageTemplate, MessageContext)> {
        let mut out = Vec::new();
        for change in changes {
            self.address = Some(change.current);
            let mut ctx = self.context(now);
            ctx.previous_address = change.previous.map(|a| a.to_string());
            out.push((self.config.templates.address_changed.clone(), ctx));
        }
        out
    }

    fn alarm_notices(&mut self, status: &AlarmStatus, now: DateTime<Utc>) -> Vec<(MessageTemplate, MessageContext)> {
        let current: SeenAlarm = match status.phase {
            AlarmPhase::Idle => None,
            _ => Some(status.alarm.clone()),
        };
        if current == self.last_alarm {
            return Vec::new();
        }

        let mut out = Vec::new();
        if let Some(previous) = self.last_alarm.take() {
            let mut ctx = self.context(now);
            ctx.alarm = previous;
            out.push((self.config.templates.alarm_stopped.clone(), ctx));
        }
        if let Some(name) = &current {
            let mut ctx = self.context(now);
            ctx.alarm = name.clone();
            ctx.phase = phase_label(status.phase).to_string();
            out.push((self.config.templates.alarm_started.clone(), ctx));
        }
        self.last_alarm = current;
        out
    }
}

impl<M: Mailer> Interface for EmailInterface<M> {
    fn name(&self) -> &str {
        &self.label
    }

    fn startup(&mut self) -> Result<(), InterfaceError> {
        self.renderer.validate_all(&self.config.templates)?;

        let reachable = bounded(
            &self.runtime,
            self.config.timeout(),
            self.mailer.test_connection(),
        )?;
        if !reachable {
            return Err(InterfaceError::Smtp(format!(
                "{} did not accept a connection",
                self.config.smtp_server
            )));
        }

        self.address = match self.probe.local_address() {
            Ok(addr) => Some(addr),
            Err(e) => {
                warn!(interface = %self.label, error = %e, "could not determine local address");
                None
            }
        };

        let ctx = self.context(Utc::now());
        self.deliver(&self.config.templates.online, &ctx)?;

        self.watcher = Some(AddressWatcher::spawn(
            self.runtime.handle(),
            Arc::clone(&self.probe),
            self.config.ip_check_interval(),
            self.address,
        ));
        info!(interface = %self.label, address = ?self.address, "email interface online");
        Ok(())
    }

    fn check(&mut self, ctx: &InterfaceContext<'_>) -> Result<(), InterfaceError> {
        let changes = self
            .watcher
            .as_mut()
            .ok_or(InterfaceError::NotStarted)?
            .drain();

        let mut outbox = self.address_notices(changes, ctx.now);
        outbox.extend(self.alarm_notices(&ctx.rouser.status(), ctx.now));

        // Deliver everything queued; report the first failure.
        let mut first_error = None;
        for (template, message_ctx) in &outbox {
            if let Err(e) = self.deliver(template, message_ctx) {
                debug!(interface = %self.label, error = %e, "delivery failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn shutdown(&mut self) -> Result<(), InterfaceError> {
        if let Some(watcher) = self.watcher.take() {
            self.runtime.block_on(watcher.stop());
        }
        info!(interface = %self.label, "email interface stopped");
        Ok(())
    }
}

/// Run `fut` on `runtime`, giving up after `timeout`.
fn bounded<T, F>(runtime: &Runtime, timeout: Duration, fut: F) -> Result<T, InterfaceError>
where
    F: Future<Output = Result<T, InterfaceError>>,
{
    runtime
        .block_on(async { tokio::time::timeout(timeout, fut).await })
        .map_err(|_| InterfaceError::Timeout(timeout))?
}

fn phase_label(phase: AlarmPhase) -> &'static str {
    match phase {
        AlarmPhase::Idle => "idle",
        AlarmPhase::Sounding => "sounding",
        AlarmPhase::Snoozed => "snoozed",
    }
}
