//! Mock implementations for testing.
//!
//! Provides a recording transport and message fixtures.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::errors::{CommsError, CommsResult};
use crate::transport::{Envelope, MailTransport};

/// One message accepted by a [`MockTransport`].
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Envelope the message was sent with.
    pub envelope: Envelope,
    /// Encoded message bytes.
    pub message: Vec<u8>,
}

impl Delivery {
    /// Returns the message as text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.message).into_owned()
    }
}

/// Mock transport that records deliveries.
#[derive(Debug, Default)]
pub struct MockTransport {
    /// Accepted deliveries.
    deliveries: Arc<Mutex<Vec<Delivery>>>,
    /// Queued failures, consumed one per transmit.
    failures: Arc<Mutex<VecDeque<CommsError>>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next transmit fail with `error`.
    ///
    /// Calls queue up; each transmit consumes one failure.
    pub fn fail_next_with(&self, error: CommsError) -> &Self {
        self.failures.lock().unwrap().push_back(error);
        self
    }

    /// Returns every accepted delivery.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    /// Returns the most recent delivery.
    pub fn last_delivery(&self) -> Option<Delivery> {
        self.deliveries.lock().unwrap().last().cloned()
    }

    /// Returns the number of accepted deliveries.
    pub fn delivery_count(&self) -> usize {
        self.deliveries.lock().unwrap().len()
    }

    /// Clears recorded deliveries and queued failures.
    pub fn clear(&self) {
        self.deliveries.lock().unwrap().clear();
        self.failures.lock().unwrap().clear();
    }
}

#[async_trait]
impl MailTransport for MockTransport {
    async fn transmit(&self, envelope: &Envelope, message: &[u8]) -> CommsResult<()> {
        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        self.deliveries.lock().unwrap().push(Delivery {
            envelope: envelope.clone(),
            message: message.to_vec(),
        });
        Ok(())
    }
}

/// Message fixtures.
pub mod fixtures {
    use crate::address::Address;
    use crate::types::OutboundMessage;

    /// Sender used by the fixtures.
    pub const SENDER: &str = "tom@dilatush.com";

    /// Parses an address known to be valid.
    pub fn address(address: &str) -> Address {
        Address::parse(address).unwrap()
    }

    /// Two `to` recipients.
    pub fn recipients() -> Vec<Address> {
        vec![address("alice@dilatush.com"), address("bob@dilatush.com")]
    }

    /// A text-only message.
    pub fn text_message(text: &str) -> OutboundMessage {
        OutboundMessage::new(address(SENDER), "Test Subject", Some(text.to_string()), None).unwrap()
    }

    /// An HTML-only message.
    pub fn html_message(html: &str) -> OutboundMessage {
        OutboundMessage::new(address(SENDER), "Test Subject", None, Some(html.to_string())).unwrap()
    }

    /// A message with both bodies.
    pub fn multipart_message(text: &str, html: &str) -> OutboundMessage {
        OutboundMessage::new(
            address(SENDER),
            "Test Subject",
            Some(text.to_string()),
            Some(html.to_string()),
        )
        .unwrap()
    }
}
