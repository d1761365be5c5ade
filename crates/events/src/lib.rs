//! Outbound delivery for drip sequence emails.
//!
//! - [`DeliveryChannel`] -- the seam the sequencer sends through.
//! - [`SmtpDelivery`] -- production channel backed by `lettre`'s async SMTP
//!   transport, configured through [`EmailConfig`].

pub mod delivery;

pub use delivery::email::{EmailConfig, EmailConfigError, SmtpDelivery};
pub use delivery::{DeliveryChannel, DeliveryError, DeliveryReceipt};
