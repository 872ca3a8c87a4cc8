//! External interfaces for the rouse daemon.
//!
//! This crate provides:
//! - `Interface` trait polled by the orchestrator once per tick
//! - SMTP email interface with online, alarm and address-change notices
//! - Minijinja template rendering for interface messages
//! - A cancellable background watcher for the host's local address

pub mod email;
pub mod ip_watch;
pub mod templating;
pub mod traits;

pub use email::{EmailConfig, EmailInterface, Mailer, SmtpMailer};
pub use ip_watch::{AddressChange, AddressProbe, AddressWatcher, RouteProbe};
pub use templating::{MessageContext, MessageTemplate, MessageTemplates, TemplateRenderer};
pub use traits::{Interface, InterfaceContext, InterfaceError, Message};
