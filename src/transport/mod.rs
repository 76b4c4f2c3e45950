//! Transport seam.
//!
//! The composer produces RFC 5322 bytes; a [`MailTransport`] moves them to a
//! mail server. The transport owns its session settings and authentication.
//! [`SmtpRelay`] is the SMTP implementation shipped with the crate, and
//! [`crate::mocks::MockTransport`] records deliveries for tests.

use async_trait::async_trait;
use std::fmt;

use crate::address::Address;
use crate::errors::CommsResult;

pub mod smtp;

pub use smtp::SmtpRelay;

/// Sender and recipients of one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Reverse path.
    pub from: Address,
    /// Every recipient: to, then cc, then bcc.
    pub recipients: Vec<Address>,
}

impl Envelope {
    /// Builds an envelope from the header recipients and blind copies.
    pub fn new(from: Address, to: &[Address], cc: &[Address], bcc: &[Address]) -> Self {
        let recipients = to.iter().chain(cc).chain(bcc).cloned().collect();
        Self { from, recipients }
    }

    /// Returns the number of recipients.
    pub fn recipient_count(&self) -> usize {
        self.recipients.len()
    }
}

/// Delivers encoded messages.
#[async_trait]
pub trait MailTransport: Send + Sync + fmt::Debug {
    /// Delivers `message` to every recipient in `envelope`.
    async fn transmit(&self, envelope: &Envelope, message: &[u8]) -> CommsResult<()>;
}
