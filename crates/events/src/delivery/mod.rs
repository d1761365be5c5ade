//! External delivery channels for sequence steps.

use async_trait::async_trait;
use serde::Serialize;

pub mod email;

/// Acknowledgement returned by a channel after it accepted a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReceipt {
    /// Channel-assigned message id (the SMTP `Message-ID` for email).
    pub id: String,
}

/// Error type for delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The recipient or sender address could not be parsed.
    #[error("Invalid address: {0}")]
    Address(String),

    /// The message could not be assembled.
    #[error("Message build error: {0}")]
    Build(String),

    /// The transport failed (connection, authentication, rejection, ...).
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Sends rendered content to a single recipient.
///
/// Implementations must either deliver the message and return a receipt, or
/// return an error having sent nothing the caller can observe.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str)
        -> Result<DeliveryReceipt, DeliveryError>;
}
