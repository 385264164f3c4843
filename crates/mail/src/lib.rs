//! Outbound email for opsdesk.
//!
//! The only mail the system sends today is the contract renewal reminder,
//! so the surface is small: a [`Mailer`] trait, an SMTP implementation over
//! a STARTTLS relay, and a scriptable mock for tests and dry runs. Delivery
//! is off unless `[email]` is configured and enabled; a disabled mailer
//! reports healthy and refuses to send.

use std::collections::VecDeque;

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use opsdesk_core::config::EmailConfig;
use opsdesk_core::domain::contracts::RenewalNotice;
use secrecy::ExposeSecret;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MailError {
    #[error("email delivery is disabled")]
    Disabled,
    #[error("mail configuration is invalid: {0}")]
    Configuration(String),
    #[error("message could not be built: {0}")]
    Build(String),
    #[error("message could not be delivered: {0}")]
    Delivery(String),
    #[error("smtp connection check failed: {0}")]
    Connection(String),
}

/// A fully rendered message, ready for any [`Mailer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl OutboundMessage {
    pub fn new(
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self { to: to.into(), subject: subject.into(), body: body.into() }
    }

    pub fn renewal(to: impl Into<String>, notice: &RenewalNotice) -> Self {
        Self::new(to, notice.subject(), notice.body())
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), MailError>;
    async fn health_check(&self) -> Result<(), MailError>;
    fn is_enabled(&self) -> bool;
}

/// STARTTLS relay transport driven by the `[email]` config section.
pub struct SmtpMailer {
    config: EmailConfig,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl SmtpMailer {
    /// Builds the transport eagerly so bad relay settings fail at startup,
    /// not on the first notice. A disabled config yields a mailer that
    /// refuses sends but passes health checks.
    pub fn from_config(config: &EmailConfig) -> Result<Self, MailError> {
        if !config.enabled {
            return Ok(Self { config: config.clone(), transport: None });
        }

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|error| {
                MailError::Configuration(format!(
                    "smtp relay setup failed for `{}`: {error}",
                    config.smtp_host
                ))
            })?
            .port(config.smtp_port);

        if let Some(username) = config.username.as_deref().filter(|name| !name.is_empty()) {
            let password = config
                .password
                .as_ref()
                .map(|secret| secret.expose_secret().to_owned())
                .unwrap_or_default();
            builder = builder.credentials(Credentials::new(username.to_owned(), password));
        }

        Ok(Self { config: config.clone(), transport: Some(builder.build()) })
    }

    fn from_mailbox(&self) -> Result<Mailbox, MailError> {
        format!("{} <{}>", self.config.from_name, self.config.from_address)
            .parse()
            .map_err(|error| {
                MailError::Configuration(format!(
                    "invalid from address `{}`: {error}",
                    self.config.from_address
                ))
            })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: &OutboundMessage) -> Result<(), MailError> {
        let transport = self.transport.as_ref().ok_or(MailError::Disabled)?;

        let to: Mailbox = message.to.parse().map_err(|error| {
            MailError::Build(format!("invalid recipient `{}`: {error}", message.to))
        })?;
        let email = Message::builder()
            .from(self.from_mailbox()?)
            .to(to)
            .subject(&message.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|error| MailError::Build(error.to_string()))?;

        transport.send(email).await.map_err(|error| MailError::Delivery(error.to_string()))?;

        info!(to = %message.to, subject = %message.subject, "email sent");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), MailError> {
        let Some(transport) = self.transport.as_ref() else {
            return Ok(());
        };
        transport
            .test_connection()
            .await
            .map_err(|error| MailError::Connection(error.to_string()))?;
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

/// Records every accepted message; failures can be scripted per send.
#[derive(Default)]
pub struct MockMailer {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    sent: Vec<OutboundMessage>,
    failures: VecDeque<MailError>,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_with(failures: Vec<MailError>) -> Self {
        Self { state: Mutex::new(MockState { sent: Vec::new(), failures: failures.into() }) }
    }

    pub async fn sent(&self) -> Vec<OutboundMessage> {
        self.state.lock().await.sent.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.state.lock().await.sent.len()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, message: &OutboundMessage) -> Result<(), MailError> {
        let mut state = self.state.lock().await;
        if let Some(failure) = state.failures.pop_front() {
            return Err(failure);
        }
        state.sent.push(message.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<(), MailError> {
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        true
    }
}
