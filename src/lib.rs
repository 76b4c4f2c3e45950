//! # Comms Integration Library
//!
//! Composes and sends multi-part email built from templated content:
//! - Address parsing and validation
//! - Named transfer directories with access modes (read, write, auto-delete)
//! - Recursive `<include-file src="..."/>` expansion from transfer
//!   directories and HTTP(S) locations
//! - Inline images rewritten to `cid:` references and embedded as MIME parts
//! - RFC 5322 encoding and delivery through a pluggable transport, with an
//!   SMTP relay included
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integrations_comms::{Address, CommsClient, CommsConfig, OutboundMessage, SessionConfig, TransferMode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CommsConfig::builder()
//!         .session(
//!             SessionConfig::builder()
//!                 .host("smtp.dilatush.com")
//!                 .credentials("tom@dilatush.com", "password")
//!                 .build()?,
//!         )
//!         .transfer_directory("templates", "/srv/mail/templates", TransferMode::ReadOnly)
//!         .build()?;
//!
//!     let client = CommsClient::new(config)?;
//!
//!     let message = OutboundMessage::builder()
//!         .from("tom@dilatush.com")?
//!         .subject("Weekly report")
//!         .html(r#"<include-file src="transfer://templates/report.html"/>"#)
//!         .build()?;
//!
//!     let to = [Address::parse("Jane Doe<jane@dilatush.com>")?];
//!     let receipt = client.send(&to, &[], &[], Some(&message)).await?;
//!     println!("Message sent with ID: {}", receipt.message_id);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod address;
pub mod config;
pub mod errors;
pub mod types;

// Transfer directories and resource resolution
pub mod resolver;
pub mod transfer;

// Composition
pub mod compose;
pub mod images;
pub mod include;
pub mod markup;

// MIME encoding
pub mod mime;

// Delivery
pub mod auth;
pub mod protocol;
pub mod sender;
pub mod transport;

// Observability
pub mod observability;

// Client
pub mod client;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use address::Address;
pub use client::{CommsClient, CommsClientBuilder};
pub use compose::{BodyShape, ComposedBody, MessageComposer};
pub use config::{
    CommsConfig, CommsConfigBuilder, ComposeConfig, SessionConfig, SessionConfigBuilder,
    TlsMode, TransferDirectoryConfig,
};
pub use errors::{CommsError, CommsErrorKind, CommsResult, ErrorSeverity};
pub use images::ImageEmbedder;
pub use include::IncludeExpander;
pub use mime::{ContentType, MimeEncoder, MimePart, TransferEncoding};
pub use observability::{CommsMetrics, MetricsSnapshot};
pub use resolver::{PendingDeletes, ResolvedResource, ResourceResolver};
pub use sender::MessageSender;
pub use transfer::{TransferDirectory, TransferMode, TransferRegistry};
pub use transport::{Envelope, MailTransport, SmtpRelay};
pub use types::{ImageReference, OutboundMessage, OutboundMessageBuilder, SendReceipt};
