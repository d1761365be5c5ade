//! Email delivery via SMTP.
//!
//! [`SmtpDelivery`] wraps the `lettre` async SMTP transport to send the HTML
//! content of a sequence step. Configuration is loaded from environment
//! variables; `SMTP_HOST` is mandatory so a missing relay is reported at
//! start-up instead of silently dropping mail.

use async_trait::async_trait;
use lettre::address::AddressError;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{DeliveryChannel, DeliveryError, DeliveryReceipt};

// ---------------------------------------------------------------------------
// EmailConfig
// ---------------------------------------------------------------------------

/// Default SMTP port (STARTTLS).
const DEFAULT_SMTP_PORT: u16 = 587;

/// Default sender address when `SMTP_FROM` is not set.
const DEFAULT_FROM_ADDRESS: &str = "hello@id8labs.app";

/// Error type for email configuration problems.
#[derive(Debug, thiserror::Error)]
pub enum EmailConfigError {
    #[error("SMTP_HOST must be set")]
    MissingHost,

    #[error("SMTP_PORT must be a valid port number, got '{0}'")]
    InvalidPort(String),
}

/// Configuration for the SMTP email delivery service.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// SMTP server hostname.
    pub smtp_host: String,
    /// SMTP server port (defaults to 587).
    pub smtp_port: u16,
    /// RFC 5322 "From" address.
    pub from_address: String,
    /// Optional SMTP username.
    pub smtp_user: Option<String>,
    /// Optional SMTP password.
    pub smtp_password: Option<String>,
}

impl EmailConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable        | Required | Default              |
    /// |-----------------|----------|----------------------|
    /// | `SMTP_HOST`     | yes      |                      |
    /// | `SMTP_PORT`     | no       | `587`                |
    /// | `SMTP_FROM`     | no       | `hello@id8labs.app`  |
    /// | `SMTP_USER`     | no       |                      |
    /// | `SMTP_PASSWORD` | no       |                      |
    pub fn from_env() -> Result<Self, EmailConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads values through `lookup`.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, EmailConfigError> {
        let smtp_host = lookup("SMTP_HOST")
            .filter(|h| !h.trim().is_empty())
            .ok_or(EmailConfigError::MissingHost)?;

        let smtp_port = match lookup("SMTP_PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| EmailConfigError::InvalidPort(raw))?,
            None => DEFAULT_SMTP_PORT,
        };

        Ok(Self {
            smtp_host,
            smtp_port,
            from_address: lookup("SMTP_FROM").unwrap_or_else(|| DEFAULT_FROM_ADDRESS.to_string()),
            smtp_user: lookup("SMTP_USER"),
            smtp_password: lookup("SMTP_PASSWORD"),
        })
    }
}

// ---------------------------------------------------------------------------
// SmtpDelivery
// ---------------------------------------------------------------------------

/// Sends sequence emails via SMTP.
///
/// The transport is built once at start-up and shared by every send.
pub struct SmtpDelivery {
    config: EmailConfig,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpDelivery {
    /// Create a new SMTP channel with the given configuration.
    ///
    /// No connection is opened until the first message is sent.
    pub fn new(config: EmailConfig) -> Result<Self, DeliveryError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| DeliveryError::Transport(e.to_string()))?
            .port(config.smtp_port);

        if let (Some(user), Some(pass)) = (&config.smtp_user, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            mailer: builder.build(),
            config,
        })
    }

    /// Build the MIME message and the `Message-ID` it carries.
    fn build_message(
        &self,
        to: &str,
        subject: &str,
        html: &str,
    ) -> Result<(Message, String), DeliveryError> {
        let from: Mailbox = self
            .config
            .from_address
            .parse()
            .map_err(|e: AddressError| DeliveryError::Address(e.to_string()))?;
        let to: Mailbox = to
            .parse()
            .map_err(|e: AddressError| DeliveryError::Address(e.to_string()))?;

        let message_id = format!(
            "<{}@{}>",
            uuid::Uuid::new_v4(),
            sender_domain(&self.config.from_address)
        );

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .message_id(Some(message_id.clone()))
            .header(ContentType::TEXT_HTML)
            .body(html.to_string())
            .map_err(|e| DeliveryError::Build(e.to_string()))?;

        Ok((message, message_id))
    }
}

#[async_trait]
impl DeliveryChannel for SmtpDelivery {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        html: &str,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let (message, message_id) = self.build_message(to, subject, html)?;

        self.mailer
            .send(message)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        tracing::info!(to, message_id = %message_id, "Sequence email sent");
        Ok(DeliveryReceipt { id: message_id })
    }
}

/// Domain part of the sender address, used to scope generated message ids.
fn sender_domain(from: &str) -> &str {
    from.rsplit('@')
        .next()
        .map(|d| d.trim_end_matches('>'))
        .filter(|d| !d.is_empty() && *d != from)
        .unwrap_or("localhost")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
