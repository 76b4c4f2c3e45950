//! MIME body tree and RFC 5322 encoding.
//!
//! Provides:
//! - A [`MimePart`] tree built by the composer
//! - Header encoding (RFC 2047) and folding
//! - Quoted-printable text parts and Base64 inline images
//! - Nested multipart serialization

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::address::Address;
use crate::errors::{CommsError, CommsErrorKind, CommsResult};
use crate::types::{ImageReference, OutboundMessage};

/// Line length for Base64 bodies.
const BASE64_LINE_LENGTH: usize = 76;

/// MIME content types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentType {
    /// Plain text.
    TextPlain,
    /// HTML content.
    TextHtml,
    /// Multipart alternative (text + HTML).
    MultipartAlternative(String),
    /// Multipart related (HTML + inline images).
    MultipartRelated(String),
    /// Other content type, such as an image type.
    Other(String),
}

impl ContentType {
    /// Returns the `Content-Type` header value.
    pub fn mime_type(&self) -> String {
        match self {
            ContentType::TextPlain => "text/plain; charset=UTF-8".to_string(),
            ContentType::TextHtml => "text/html; charset=UTF-8".to_string(),
            ContentType::MultipartAlternative(boundary) => {
                format!("multipart/alternative; boundary=\"{}\"", boundary)
            }
            ContentType::MultipartRelated(boundary) => {
                format!("multipart/related; boundary=\"{}\"", boundary)
            }
            ContentType::Other(s) => s.clone(),
        }
    }

    /// Returns the boundary of a multipart type.
    pub fn boundary(&self) -> Option<&str> {
        match self {
            ContentType::MultipartAlternative(b) | ContentType::MultipartRelated(b) => Some(b),
            _ => None,
        }
    }
}

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII, used for multipart containers.
    SevenBit,
    /// Quoted-printable encoding.
    QuotedPrintable,
    /// Base64 encoding.
    Base64,
}

impl TransferEncoding {
    /// Returns the header value.
    pub fn header_value(&self) -> &'static str {
        match self {
            TransferEncoding::SevenBit => "7bit",
            TransferEncoding::QuotedPrintable => "quoted-printable",
            TransferEncoding::Base64 => "base64",
        }
    }
}

/// Body of a MIME part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartContent {
    /// Text, sent quoted-printable.
    Text(String),
    /// Binary data, sent Base64.
    Binary(Vec<u8>),
    /// Child parts.
    Multipart(Vec<MimePart>),
}

/// One node of a MIME body tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimePart {
    content_type: ContentType,
    headers: Vec<(String, String)>,
    content: PartContent,
}

impl MimePart {
    /// Creates a `text/plain; charset=UTF-8` part.
    pub fn text_plain(text: impl Into<String>) -> Self {
        Self {
            content_type: ContentType::TextPlain,
            headers: Vec::new(),
            content: PartContent::Text(text.into()),
        }
    }

    /// Creates a `text/html; charset=UTF-8` part.
    pub fn html(html: impl Into<String>) -> Self {
        Self {
            content_type: ContentType::TextHtml,
            headers: Vec::new(),
            content: PartContent::Text(html.into()),
        }
    }

    /// Creates an inline image part carrying the image's `Content-ID`.
    pub fn inline_image(image: &ImageReference, content_type: &mime::Mime, data: Vec<u8>) -> Self {
        Self {
            content_type: ContentType::Other(content_type.to_string()),
            headers: vec![
                ("Content-ID".to_string(), image.content_id_header()),
                ("Content-Disposition".to_string(), "inline".to_string()),
            ],
            content: PartContent::Binary(data),
        }
    }

    /// Creates a `multipart/alternative` part. Later parts are preferred by clients.
    pub fn alternative(parts: Vec<MimePart>) -> Self {
        Self {
            content_type: ContentType::MultipartAlternative(generate_boundary()),
            headers: Vec::new(),
            content: PartContent::Multipart(parts),
        }
    }

    /// Creates a `multipart/related` part. The first part is the root.
    pub fn related(parts: Vec<MimePart>) -> Self {
        Self {
            content_type: ContentType::MultipartRelated(generate_boundary()),
            headers: Vec::new(),
            content: PartContent::Multipart(parts),
        }
    }

    /// Returns the content type.
    pub fn content_type(&self) -> &ContentType {
        &self.content_type
    }

    /// Returns the extra headers.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Returns the value of an extra header (case-insensitive name).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the content.
    pub fn content(&self) -> &PartContent {
        &self.content
    }

    /// Returns the child parts; empty for leaf parts.
    pub fn children(&self) -> &[MimePart] {
        match &self.content {
            PartContent::Multipart(parts) => parts,
            _ => &[],
        }
    }

    /// Returns the text of a text part.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            PartContent::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the transfer encoding used for this part.
    pub fn transfer_encoding(&self) -> TransferEncoding {
        match self.content {
            PartContent::Text(_) => TransferEncoding::QuotedPrintable,
            PartContent::Binary(_) => TransferEncoding::Base64,
            PartContent::Multipart(_) => TransferEncoding::SevenBit,
        }
    }
}

/// An encoded message ready for the transport.
#[derive(Debug, Clone)]
pub struct EncodedMessage {
    /// Message-ID without angle brackets.
    pub message_id: String,
    /// RFC 5322 message bytes.
    pub bytes: Vec<u8>,
}

/// MIME encoder for outbound messages.
#[derive(Debug)]
pub struct MimeEncoder {
    /// Date for the message.
    date: DateTime<Utc>,
}

impl MimeEncoder {
    /// Creates a new encoder dated now.
    pub fn new() -> Self {
        Self { date: Utc::now() }
    }

    /// Encodes headers and body to RFC 5322 format.
    ///
    /// Blind-copy recipients never appear in the headers; they are only
    /// part of the transport envelope.
    pub fn encode(
        &self,
        message: &OutboundMessage,
        to: &[Address],
        cc: &[Address],
        body: &MimePart,
    ) -> CommsResult<EncodedMessage> {
        let mut output = Vec::new();
        let message_id = self.generate_message_id(message.from().domain());

        self.write_header(&mut output, "Date", &self.format_date())?;
        self.write_header(&mut output, "From", &message.from().to_header())?;

        if !to.is_empty() {
            let to_list: Vec<String> = to.iter().map(|a| a.to_header()).collect();
            self.write_header(&mut output, "To", &to_list.join(", "))?;
        }

        if !cc.is_empty() {
            let cc_list: Vec<String> = cc.iter().map(|a| a.to_header()).collect();
            self.write_header(&mut output, "Cc", &cc_list.join(", "))?;
        }

        self.write_header(&mut output, "Subject", &encode_header(message.subject()))?;
        self.write_header(&mut output, "Message-ID", &format!("<{}>", message_id))?;
        self.write_header(&mut output, "MIME-Version", "1.0")?;

        self.write_part(&mut output, body)?;

        Ok(EncodedMessage {
            message_id,
            bytes: output,
        })
    }

    fn write_part(&self, output: &mut Vec<u8>, part: &MimePart) -> CommsResult<()> {
        self.write_header(output, "Content-Type", &part.content_type.mime_type())?;
        if !matches!(part.content, PartContent::Multipart(_)) {
            self.write_header(output, "Content-Transfer-Encoding", part.transfer_encoding().header_value())?;
        }
        for (name, value) in &part.headers {
            self.write_header(output, name, value)?;
        }
        output.extend_from_slice(b"\r\n");

        match &part.content {
            PartContent::Text(text) => {
                output.extend_from_slice(&quoted_printable::encode(normalize_line_endings(text).as_bytes()));
                output.extend_from_slice(b"\r\n");
            }
            PartContent::Binary(data) => {
                let encoded = BASE64.encode(data);
                for chunk in encoded.as_bytes().chunks(BASE64_LINE_LENGTH) {
                    output.extend_from_slice(chunk);
                    output.extend_from_slice(b"\r\n");
                }
            }
            PartContent::Multipart(children) => {
                let boundary = part.content_type.boundary().ok_or_else(|| {
                    CommsError::new(CommsErrorKind::EncodingFailed, "Multipart part has no boundary")
                })?;
                for child in children {
                    output.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
                    self.write_part(output, child)?;
                }
                output.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
            }
        }

        Ok(())
    }

    /// Writes a header line.
    fn write_header(&self, output: &mut Vec<u8>, name: &str, value: &str) -> CommsResult<()> {
        // Validate header name (no control characters, CRLF)
        if name.is_empty() || name.chars().any(|c| c.is_control() || c == ':' || c == ' ') {
            return Err(CommsError::new(
                CommsErrorKind::InvalidHeader,
                format!("Invalid header name: {}", name),
            )
            .with_fragment(name));
        }

        if value.contains(['\r', '\n']) {
            return Err(CommsError::new(
                CommsErrorKind::InvalidHeader,
                format!("Header {} contains a line break", name),
            )
            .with_fragment(value));
        }

        let header = format!("{}: {}", name, value);
        output.extend_from_slice(fold_header(&header).as_bytes());
        output.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Generates a unique message ID.
    fn generate_message_id(&self, domain: &str) -> String {
        let uuid = Uuid::new_v4();
        format!("{}.{}@{}", uuid.simple(), self.date.timestamp(), domain)
    }

    /// Formats the date for the Date header.
    fn format_date(&self) -> String {
        self.date.format("%a, %d %b %Y %H:%M:%S %z").to_string()
    }
}

impl Default for MimeEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Folds a header line at 78 characters.
fn fold_header(header: &str) -> String {
    if header.len() <= 78 {
        return header.to_string();
    }

    let mut result = String::new();
    let mut current_line = String::new();

    for word in header.split(' ') {
        if current_line.is_empty() {
            current_line = word.to_string();
        } else if current_line.len() + 1 + word.len() <= 76 {
            current_line.push(' ');
            current_line.push_str(word);
        } else {
            result.push_str(&current_line);
            result.push_str("\r\n ");
            current_line = word.to_string();
        }
    }

    result.push_str(&current_line);
    result
}

/// Encodes a header value using RFC 2047 when it is not plain ASCII.
pub fn encode_header(value: &str) -> String {
    if value.chars().all(|c| c.is_ascii() && !c.is_control()) {
        return value.to_string();
    }
    format!("=?UTF-8?B?{}?=", BASE64.encode(value.as_bytes()))
}

/// Generates a unique multipart boundary.
fn generate_boundary() -> String {
    format!("----=_Part_{}", Uuid::new_v4().simple())
}

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\n', "\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(text: Option<&str>, html: Option<&str>) -> OutboundMessage {
        OutboundMessage::new(
            Address::parse("Tom D<tom@dilatush.com>").unwrap(),
            "Weekly report",
            text.map(str::to_string),
            html.map(str::to_string),
        )
        .unwrap()
    }

    fn to() -> Vec<Address> {
        vec![Address::parse("ops@dilatush.com").unwrap()]
    }

    #[test]
    fn test_header_encoding() {
        assert_eq!(encode_header("Hello"), "Hello");
        assert!(encode_header("Héllo").starts_with("=?UTF-8?B?"));
    }

    #[test]
    fn test_header_folding() {
        let long = format!("Subject: {}", "word ".repeat(30));
        let folded = fold_header(long.trim_end());
        assert!(folded.contains("\r\n "));
        assert!(folded.split("\r\n").all(|line| line.len() <= 78));
    }

    #[test]
    fn test_boundaries_unique() {
        let a = MimePart::alternative(vec![]);
        let b = MimePart::related(vec![]);
        assert_ne!(a.content_type().boundary(), b.content_type().boundary());
    }

    #[test]
    fn test_inline_image_part() {
        let part = MimePart::inline_image(&ImageReference::new("logo.png", 2), &mime::IMAGE_PNG, vec![1, 2, 3]);
        assert_eq!(part.header("content-id"), Some("<2>"));
        assert_eq!(part.header("Content-Disposition"), Some("inline"));
        assert_eq!(part.content_type().mime_type(), "image/png");
        assert_eq!(part.transfer_encoding(), TransferEncoding::Base64);
    }

    #[test]
    fn test_simple_encoding() {
        let body = MimePart::text_plain("Hello World!");
        let encoded = MimeEncoder::new()
            .encode(&message(Some("Hello World!"), None), &to(), &[], &body)
            .unwrap();
        let content = String::from_utf8_lossy(&encoded.bytes);

        assert!(content.contains("From: Tom D <tom@dilatush.com>\r\n"));
        assert!(content.contains("To: ops@dilatush.com\r\n"));
        assert!(content.contains("Subject: Weekly report\r\n"));
        assert!(content.contains("MIME-Version: 1.0\r\n"));
        assert!(content.contains("Content-Type: text/plain; charset=UTF-8\r\n"));
        assert!(content.contains("Content-Transfer-Encoding: quoted-printable\r\n"));
        assert!(content.contains(&format!("Message-ID: <{}>", encoded.message_id)));
        assert!(encoded.message_id.ends_with("@dilatush.com"));
        assert!(!content.contains("Cc:"));
    }

    #[test]
    fn test_nested_multipart_encoding() {
        let related = MimePart::related(vec![
            MimePart::html("<p>hi</p>"),
            MimePart::inline_image(&ImageReference::new("dot.gif", 0), &mime::IMAGE_GIF, vec![0u8; 100]),
        ]);
        let related_boundary = related.content_type().boundary().unwrap().to_string();
        let body = MimePart::alternative(vec![MimePart::text_plain("hi"), related]);
        let alt_boundary = body.content_type().boundary().unwrap().to_string();

        let encoded = MimeEncoder::new()
            .encode(&message(Some("hi"), Some("<p>hi</p>")), &to(), &[], &body)
            .unwrap();
        let content = String::from_utf8(encoded.bytes).unwrap();

        let text = content.find("Content-Type: text/plain").unwrap();
        let related_open = content.find(&format!("--{}\r\n", related_boundary)).unwrap();
        let html = content.find("Content-Type: text/html").unwrap();
        let image = content.find("Content-Type: image/gif").unwrap();
        let related_close = content.find(&format!("--{}--", related_boundary)).unwrap();
        let alt_close = content.find(&format!("--{}--", alt_boundary)).unwrap();

        assert!(text < related_open);
        assert!(related_open < html && html < image);
        assert!(image < related_close && related_close < alt_close);
        assert!(content.contains("Content-ID: <0>\r\n"));

        let base64_lines: Vec<&str> = content[image..related_close]
            .split("\r\n")
            .skip_while(|l| !l.is_empty())
            .skip(1)
            .filter(|l| !l.is_empty())
            .collect();
        assert!(base64_lines.iter().all(|l| l.len() <= BASE64_LINE_LENGTH));
        assert_eq!(base64_lines.concat(), BASE64.encode([0u8; 100]));
    }

    #[test]
    fn test_subject_line_breaks_encoded() {
        let msg = OutboundMessage::new(
            Address::parse("tom@dilatush.com").unwrap(),
            "Hi\r\nBcc: victim@dilatush.com",
            Some("x".to_string()),
            None,
        )
        .unwrap();
        let encoded = MimeEncoder::new()
            .encode(&msg, &to(), &[], &MimePart::text_plain("x"))
            .unwrap();
        let content = String::from_utf8_lossy(&encoded.bytes);
        assert!(content.contains("Subject: =?UTF-8?B?"));
        assert!(!content.contains("\r\nBcc:"));
    }

    #[test]
    fn test_rejects_bad_header_name() {
        let mut output = Vec::new();
        let err = MimeEncoder::new()
            .write_header(&mut output, "X Bad", "value")
            .unwrap_err();
        assert_eq!(err.kind(), CommsErrorKind::InvalidHeader);

        let err = MimeEncoder::new()
            .write_header(&mut output, "X-Note", "a\r\nb")
            .unwrap_err();
        assert_eq!(err.kind(), CommsErrorKind::InvalidHeader);
        assert!(output.is_empty());
    }

    #[test]
    fn test_line_endings_normalized() {
        assert_eq!(normalize_line_endings("a\nb\r\nc"), "a\r\nb\r\nc");
    }
}
