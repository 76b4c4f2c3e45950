//! Error types for message composition and delivery.
//!
//! Every failure in the crate is a [`CommsError`] tagged with a
//! [`CommsErrorKind`]. Parse and resolution errors carry the offending input
//! fragment so callers can report exactly what was rejected.

use std::fmt;
use thiserror::Error;

/// Result type for composition and delivery operations.
pub type CommsResult<T> = Result<T, CommsError>;

/// Error kinds categorizing different failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommsErrorKind {
    // Address parsing
    /// Address input was empty.
    EmptyInput,
    /// Angle-bracket form with an empty display name.
    EmptyDisplayName,
    /// No `@` in the address.
    MissingAtSign,
    /// Domain does not match the LDH label grammar.
    InvalidDomain,
    /// Domain longer than 255 characters.
    DomainTooLong,
    /// Top-level label is numeric or a reserved test label.
    ReservedTld,
    /// Domain is a reserved example domain.
    ReservedDomain,
    /// Mailbox does not match the dot-atom or quoted-string grammar.
    InvalidMailbox,
    /// Mailbox part was empty.
    EmptyMailbox,

    // Resource resolution
    /// `transfer://` reference did not match `transfer://<name>/<path>`.
    MalformedTransferUrl,
    /// No transfer directory with the referenced name.
    UnknownTransferDirectory,
    /// Transfer directory mode does not permit reading.
    DirectoryNotReadable,
    /// Transfer directory mode does not permit writing.
    DirectoryNotWritable,
    /// Reference uses a scheme other than http, https or transfer.
    UnsupportedUrlScheme,
    /// Relative path would leave the transfer directory root.
    PathEscapesRoot,
    /// Local file could not be opened or read.
    ResourceIo,
    /// Network resource could not be fetched.
    ResourceFetch,

    // Composition
    /// Include expansion exceeded its pass or size limit.
    IncludeExpansionLimitExceeded,
    /// Content could not be decoded or encoded.
    EncodingFailed,
    /// Message has neither a text nor an HTML body.
    MissingBody,
    /// Message has no sender address.
    MissingSender,
    /// A READ_AUTO source file could not be deleted.
    AutoDeleteFailed,
    /// Header name or value is not valid.
    InvalidHeader,

    // Sending
    /// No message was supplied.
    MissingMessage,
    /// The `to` list was empty.
    NoRecipients,
    /// The transport collaborator failed.
    SendFailed,

    // Transport
    /// Could not connect to the mail server.
    ConnectionFailed,
    /// A network operation timed out.
    Timeout,
    /// TLS handshake failed.
    TlsHandshakeFailed,
    /// STARTTLS required but not offered.
    StarttlsNotSupported,
    /// Server rejected the credentials.
    AuthenticationFailed,
    /// Unexpected or malformed server response.
    ProtocolError,
    /// Server rejected one or more recipients.
    RecipientsRejected,

    // Configuration
    /// Configuration is invalid.
    ConfigurationInvalid,
    /// Transfer directory failed its construction checks.
    TransferDirectoryInvalid,
}

impl CommsErrorKind {
    /// Returns true if this error kind is typically retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CommsErrorKind::ResourceFetch
                | CommsErrorKind::ConnectionFailed
                | CommsErrorKind::Timeout
        )
    }

    /// Returns true for the address-parsing kinds.
    pub fn is_address_error(&self) -> bool {
        matches!(
            self,
            CommsErrorKind::EmptyInput
                | CommsErrorKind::EmptyDisplayName
                | CommsErrorKind::MissingAtSign
                | CommsErrorKind::InvalidDomain
                | CommsErrorKind::DomainTooLong
                | CommsErrorKind::ReservedTld
                | CommsErrorKind::ReservedDomain
                | CommsErrorKind::InvalidMailbox
                | CommsErrorKind::EmptyMailbox
        )
    }

    /// Returns the severity level of this error kind.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            CommsErrorKind::ConfigurationInvalid
            | CommsErrorKind::TransferDirectoryInvalid
            | CommsErrorKind::AutoDeleteFailed
            | CommsErrorKind::PathEscapesRoot => ErrorSeverity::Critical,

            CommsErrorKind::ResourceFetch
            | CommsErrorKind::ConnectionFailed
            | CommsErrorKind::Timeout => ErrorSeverity::Warning,

            _ if self.is_address_error() => ErrorSeverity::Info,

            _ => ErrorSeverity::Error,
        }
    }
}

impl fmt::Display for CommsErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommsErrorKind::EmptyInput => write!(f, "Empty input"),
            CommsErrorKind::EmptyDisplayName => write!(f, "Empty display name"),
            CommsErrorKind::MissingAtSign => write!(f, "Missing @ sign"),
            CommsErrorKind::InvalidDomain => write!(f, "Invalid domain"),
            CommsErrorKind::DomainTooLong => write!(f, "Domain too long"),
            CommsErrorKind::ReservedTld => write!(f, "Reserved top-level domain"),
            CommsErrorKind::ReservedDomain => write!(f, "Reserved domain"),
            CommsErrorKind::InvalidMailbox => write!(f, "Invalid mailbox"),
            CommsErrorKind::EmptyMailbox => write!(f, "Empty mailbox"),
            CommsErrorKind::MalformedTransferUrl => write!(f, "Malformed transfer URL"),
            CommsErrorKind::UnknownTransferDirectory => write!(f, "Unknown transfer directory"),
            CommsErrorKind::DirectoryNotReadable => write!(f, "Transfer directory not readable"),
            CommsErrorKind::DirectoryNotWritable => write!(f, "Transfer directory not writable"),
            CommsErrorKind::UnsupportedUrlScheme => write!(f, "Unsupported URL scheme"),
            CommsErrorKind::PathEscapesRoot => write!(f, "Path escapes transfer directory"),
            CommsErrorKind::ResourceIo => write!(f, "Resource I/O error"),
            CommsErrorKind::ResourceFetch => write!(f, "Resource fetch failed"),
            CommsErrorKind::IncludeExpansionLimitExceeded => {
                write!(f, "Include expansion limit exceeded")
            }
            CommsErrorKind::EncodingFailed => write!(f, "Encoding failed"),
            CommsErrorKind::MissingBody => write!(f, "Missing message body"),
            CommsErrorKind::MissingSender => write!(f, "Missing sender"),
            CommsErrorKind::AutoDeleteFailed => write!(f, "Auto-delete failed"),
            CommsErrorKind::InvalidHeader => write!(f, "Invalid header"),
            CommsErrorKind::MissingMessage => write!(f, "Missing message"),
            CommsErrorKind::NoRecipients => write!(f, "No recipients"),
            CommsErrorKind::SendFailed => write!(f, "Send failed"),
            CommsErrorKind::ConnectionFailed => write!(f, "Connection failed"),
            CommsErrorKind::Timeout => write!(f, "Timed out"),
            CommsErrorKind::TlsHandshakeFailed => write!(f, "TLS handshake failed"),
            CommsErrorKind::StarttlsNotSupported => write!(f, "STARTTLS not supported"),
            CommsErrorKind::AuthenticationFailed => write!(f, "Authentication failed"),
            CommsErrorKind::ProtocolError => write!(f, "Protocol error"),
            CommsErrorKind::RecipientsRejected => write!(f, "Recipients rejected"),
            CommsErrorKind::ConfigurationInvalid => write!(f, "Invalid configuration"),
            CommsErrorKind::TransferDirectoryInvalid => write!(f, "Invalid transfer directory"),
        }
    }
}

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational - bad caller input.
    Info,
    /// Warning - temporary issue, may recover.
    Warning,
    /// Error - operation failed.
    Error,
    /// Critical - requires immediate attention.
    Critical,
}

/// Error with kind, message and optional diagnostic context.
#[derive(Error, Debug)]
pub struct CommsError {
    /// Error kind.
    kind: CommsErrorKind,
    /// Human-readable message.
    message: String,
    /// Offending input fragment, when there is one.
    fragment: Option<String>,
    /// SMTP reply code, for transport errors.
    smtp_code: Option<u16>,
    /// Underlying cause.
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl CommsError {
    /// Creates a new error.
    pub fn new(kind: CommsErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            fragment: None,
            smtp_code: None,
            cause: None,
        }
    }

    /// Sets the offending input fragment.
    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.fragment = Some(fragment.into());
        self
    }

    /// Sets the SMTP reply code.
    pub fn with_smtp_code(mut self, code: u16) -> Self {
        self.smtp_code = Some(code);
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause<E: std::error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> CommsErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the offending input fragment, if recorded.
    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    /// Returns the SMTP reply code if available.
    pub fn smtp_code(&self) -> Option<u16> {
        self.smtp_code
    }

    /// Returns true if this error is retryable.
    ///
    /// A `SendFailed` error defers to the transport error it wraps.
    pub fn is_retryable(&self) -> bool {
        if let Some(code) = self.smtp_code {
            return matches!(code, 421 | 450 | 451 | 452);
        }
        if self.kind == CommsErrorKind::SendFailed {
            return self
                .cause
                .as_ref()
                .and_then(|c| c.downcast_ref::<CommsError>())
                .map(|c| c.is_retryable())
                .unwrap_or(false);
        }
        self.kind.is_retryable()
    }

    /// Returns the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        self.kind.severity()
    }

    // Convenience constructors

    /// Creates an address-parsing error carrying the rejected input.
    pub fn address(kind: CommsErrorKind, message: impl Into<String>, input: &str) -> Self {
        Self::new(kind, message).with_fragment(input)
    }

    /// Creates a resolution error carrying the rejected reference.
    pub fn resolution(kind: CommsErrorKind, message: impl Into<String>, reference: &str) -> Self {
        Self::new(kind, message).with_fragment(reference)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(CommsErrorKind::ConfigurationInvalid, message)
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(CommsErrorKind::ProtocolError, message)
    }

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(CommsErrorKind::ConnectionFailed, message)
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(CommsErrorKind::Timeout, message)
    }

    /// Creates a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::new(CommsErrorKind::TlsHandshakeFailed, message)
    }

    /// Creates an error from an SMTP reply.
    pub fn from_smtp_response(code: u16, message: impl Into<String>) -> Self {
        let kind = match code {
            530 | 534 | 535 => CommsErrorKind::AuthenticationFailed,
            421 => CommsErrorKind::ConnectionFailed,
            _ => CommsErrorKind::ProtocolError,
        };
        Self::new(kind, message).with_smtp_code(code)
    }

    /// Wraps a transport failure as `SendFailed`, keeping the cause.
    pub fn send_failed(cause: CommsError) -> Self {
        Self::new(
            CommsErrorKind::SendFailed,
            format!("Problem sending email: {}", cause),
        )
        .with_cause(cause)
    }
}

impl fmt::Display for CommsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(fragment) = &self.fragment {
            write!(f, " [{}]", fragment)?;
        }
        if let Some(code) = self.smtp_code {
            write!(f, " (SMTP {})", code)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_kind_retryable() {
        assert!(CommsErrorKind::ResourceFetch.is_retryable());
        assert!(CommsErrorKind::Timeout.is_retryable());
        assert!(!CommsErrorKind::PathEscapesRoot.is_retryable());
        assert!(!CommsErrorKind::InvalidDomain.is_retryable());
    }

    #[test]
    fn test_fragment_in_display() {
        let err = CommsError::address(CommsErrorKind::ReservedTld, "Reserved TLD", "tom@bogus.test");
        assert_eq!(err.fragment(), Some("tom@bogus.test"));
        assert!(err.to_string().contains("[tom@bogus.test]"));
    }

    #[test]
    fn test_smtp_reply_mapping() {
        let err = CommsError::from_smtp_response(535, "Authentication failed");
        assert_eq!(err.kind(), CommsErrorKind::AuthenticationFailed);
        assert_eq!(err.smtp_code(), Some(535));
        assert!(!err.is_retryable());

        let err = CommsError::from_smtp_response(451, "Try later");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_send_failed_wraps_cause() {
        let err = CommsError::send_failed(CommsError::timeout("Read timed out"));
        assert_eq!(err.kind(), CommsErrorKind::SendFailed);
        assert!(err.message().contains("Read timed out"));
        assert!(err.source().is_some());
        assert!(err.is_retryable());

        let err = CommsError::send_failed(CommsError::from_smtp_response(550, "No such user"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(CommsErrorKind::PathEscapesRoot.severity(), ErrorSeverity::Critical);
        assert_eq!(CommsErrorKind::Timeout.severity(), ErrorSeverity::Warning);
        assert_eq!(CommsErrorKind::EmptyMailbox.severity(), ErrorSeverity::Info);
        assert_eq!(CommsErrorKind::SendFailed.severity(), ErrorSeverity::Error);
    }
}
