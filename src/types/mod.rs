//! Core message types.
//!
//! This module provides:
//! - The outbound message record
//! - Image references produced by content-ID rewriting
//! - Send receipts

use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::errors::{CommsError, CommsErrorKind, CommsResult};

/// A message to compose and send.
///
/// At least one of `text` and `html` is always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawOutboundMessage")]
pub struct OutboundMessage {
    from: Address,
    subject: String,
    text: Option<String>,
    html: Option<String>,
}

impl OutboundMessage {
    /// Creates a message, failing with `MissingBody` when both bodies are absent.
    pub fn new(
        from: Address,
        subject: impl Into<String>,
        text: Option<String>,
        html: Option<String>,
    ) -> CommsResult<Self> {
        if text.is_none() && html.is_none() {
            return Err(CommsError::new(
                CommsErrorKind::MissingBody,
                "Message must have a text or HTML body",
            ));
        }

        Ok(Self {
            from,
            subject: subject.into(),
            text,
            html,
        })
    }

    /// Creates a message builder.
    pub fn builder() -> OutboundMessageBuilder {
        OutboundMessageBuilder::default()
    }

    /// Returns the sender.
    pub fn from(&self) -> &Address {
        &self.from
    }

    /// Returns the subject.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the plain-text body.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Returns the HTML body.
    pub fn html(&self) -> Option<&str> {
        self.html.as_deref()
    }
}

#[derive(Deserialize)]
struct RawOutboundMessage {
    from: Address,
    #[serde(default)]
    subject: String,
    text: Option<String>,
    html: Option<String>,
}

impl TryFrom<RawOutboundMessage> for OutboundMessage {
    type Error = CommsError;

    fn try_from(raw: RawOutboundMessage) -> CommsResult<Self> {
        OutboundMessage::new(raw.from, raw.subject, raw.text, raw.html)
    }
}

/// Builder for outbound messages.
#[derive(Debug, Default)]
pub struct OutboundMessageBuilder {
    from: Option<Address>,
    subject: String,
    text: Option<String>,
    html: Option<String>,
}

impl OutboundMessageBuilder {
    /// Sets the sender address.
    pub fn from(mut self, address: impl TryInto<Address, Error = CommsError>) -> CommsResult<Self> {
        self.from = Some(address.try_into()?);
        Ok(self)
    }

    /// Sets the subject.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Sets the plain-text body.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Sets the HTML body.
    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    /// Builds the message.
    pub fn build(self) -> CommsResult<OutboundMessage> {
        let from = self.from.ok_or_else(|| {
            CommsError::new(CommsErrorKind::MissingSender, "Sender address is required")
        })?;
        OutboundMessage::new(from, self.subject, self.text, self.html)
    }
}

/// An image referenced from the HTML body and embedded as an inline part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    /// The `src` value as written in the HTML.
    pub original_url: String,
    /// Sequential content ID, starting at 0.
    pub content_id: usize,
}

impl ImageReference {
    /// Creates a reference.
    pub fn new(original_url: impl Into<String>, content_id: usize) -> Self {
        Self {
            original_url: original_url.into(),
            content_id,
        }
    }

    /// Returns the `cid:` reference used in HTML.
    pub fn cid_reference(&self) -> String {
        format!("cid:{}", self.content_id)
    }

    /// Returns the `Content-ID` header value.
    pub fn content_id_header(&self) -> String {
        format!("<{}>", self.content_id)
    }
}

/// Outcome of a successful send.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// Message-ID written into the headers.
    pub message_id: String,
    /// Envelope recipient count (to + cc + bcc).
    pub recipients: usize,
    /// Size of the encoded message in bytes.
    pub bytes: usize,
    /// Number of embedded inline images.
    pub images: usize,
    /// Number of READ_AUTO files deleted after the send.
    pub deleted_files: usize,
    /// Send duration.
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> Address {
        Address::parse("tom@dilatush.com").unwrap()
    }

    #[test]
    fn test_requires_a_body() {
        let err = OutboundMessage::new(sender(), "Hi", None, None).unwrap_err();
        assert_eq!(err.kind(), CommsErrorKind::MissingBody);
    }

    #[test]
    fn test_builder() {
        let message = OutboundMessage::builder()
            .from("Tom D<tom@dilatush.com>")
            .unwrap()
            .subject("Status")
            .html("<p>ok</p>")
            .build()
            .unwrap();

        assert_eq!(message.from().display_name(), Some("Tom D"));
        assert_eq!(message.subject(), "Status");
        assert_eq!(message.text(), None);
        assert_eq!(message.html(), Some("<p>ok</p>"));
    }

    #[test]
    fn test_builder_rejects_bad_sender() {
        let err = OutboundMessage::builder().from("tom@example.com").unwrap_err();
        assert_eq!(err.kind(), CommsErrorKind::ReservedDomain);
    }

    #[test]
    fn test_builder_requires_sender() {
        let err = OutboundMessage::builder().text("body").build().unwrap_err();
        assert_eq!(err.kind(), CommsErrorKind::MissingSender);
        assert!(!err.kind().is_address_error());
    }

    #[test]
    fn test_deserialize_validates() {
        let message: OutboundMessage = serde_json::from_str(
            r#"{ "from": "tom@dilatush.com", "subject": "s", "text": "body" }"#,
        )
        .unwrap();
        assert_eq!(message.text(), Some("body"));

        let result: Result<OutboundMessage, _> =
            serde_json::from_str(r#"{ "from": "tom@dilatush.com", "subject": "s" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_image_reference() {
        let image = ImageReference::new("https://cdn.dilatush.com/logo.png", 3);
        assert_eq!(image.cid_reference(), "cid:3");
        assert_eq!(image.content_id_header(), "<3>");
    }
}
