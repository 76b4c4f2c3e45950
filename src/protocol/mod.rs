//! SMTP protocol subset used by the relay transport.
//!
//! Commands, reply parsing and EHLO capability discovery (RFC 5321).

use std::collections::HashSet;
use std::fmt;

use crate::auth::AuthMethod;
use crate::errors::{CommsError, CommsResult};

/// SMTP commands issued by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    /// Extended HELLO with client identity.
    Ehlo(String),
    /// Basic HELLO, for servers without ESMTP.
    Helo(String),
    /// Start TLS negotiation.
    StartTls,
    /// Authenticate.
    Auth {
        /// Authentication mechanism.
        mechanism: String,
        /// Initial response (optional).
        initial_response: Option<String>,
    },
    /// MAIL FROM command.
    MailFrom {
        /// Reverse path, already in `<a@b>` form.
        address: String,
        /// SIZE parameter, when the server advertises SIZE.
        size: Option<usize>,
    },
    /// RCPT TO command.
    RcptTo(String),
    /// DATA command.
    Data,
    /// Quit connection.
    Quit,
}

impl SmtpCommand {
    /// Formats the command without the trailing CRLF.
    pub fn to_smtp_string(&self) -> String {
        match self {
            SmtpCommand::Ehlo(domain) => format!("EHLO {}", domain),
            SmtpCommand::Helo(domain) => format!("HELO {}", domain),
            SmtpCommand::StartTls => "STARTTLS".to_string(),
            SmtpCommand::Auth {
                mechanism,
                initial_response: Some(response),
            } => format!("AUTH {} {}", mechanism, response),
            SmtpCommand::Auth { mechanism, .. } => format!("AUTH {}", mechanism),
            SmtpCommand::MailFrom { address, size } => match size {
                Some(size) => format!("MAIL FROM:{} SIZE={}", address, size),
                None => format!("MAIL FROM:{}", address),
            },
            SmtpCommand::RcptTo(address) => format!("RCPT TO:{}", address),
            SmtpCommand::Data => "DATA".to_string(),
            SmtpCommand::Quit => "QUIT".to_string(),
        }
    }

    /// Returns the form safe to log; AUTH payloads are masked.
    pub fn redacted(&self) -> String {
        match self {
            SmtpCommand::Auth { mechanism, .. } => format!("AUTH {} ****", mechanism),
            other => other.to_smtp_string(),
        }
    }
}

impl fmt::Display for SmtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.redacted())
    }
}

/// A server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpResponse {
    /// Reply code (e.g. 250, 354, 550).
    pub code: u16,
    /// Text of each reply line.
    pub message: Vec<String>,
}

impl SmtpResponse {
    /// Creates a single-line reply.
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: vec![message.into()],
        }
    }

    /// Parses a reply from its raw lines (without CRLF).
    ///
    /// Every line must start with the same three-digit code.
    pub fn parse(lines: &[String]) -> CommsResult<Self> {
        let mut code = None;
        let mut message = Vec::with_capacity(lines.len());

        for line in lines {
            let parsed: u16 = line
                .get(..3)
                .and_then(|c| c.parse().ok())
                .ok_or_else(|| CommsError::protocol("Malformed reply line").with_fragment(line.as_str()))?;

            match code {
                None => code = Some(parsed),
                Some(first) if first != parsed => {
                    return Err(CommsError::protocol("Inconsistent codes in multiline reply")
                        .with_fragment(line.as_str()))
                }
                Some(_) => {}
            }

            message.push(line.get(4..).unwrap_or("").to_string());
        }

        let code = code.ok_or_else(|| CommsError::protocol("Empty reply"))?;
        Ok(Self { code, message })
    }

    /// True for 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// True for 3xx.
    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// Returns the first line of text.
    pub fn first_message(&self) -> &str {
        self.message.first().map(String::as_str).unwrap_or("")
    }

    /// Returns all lines joined.
    pub fn full_message(&self) -> String {
        self.message.join("\n")
    }

    /// Converts the reply into an error.
    pub fn to_error(&self) -> CommsError {
        CommsError::from_smtp_response(self.code, self.full_message())
    }
}

impl fmt::Display for SmtpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.first_message())
    }
}

/// Capabilities advertised in an EHLO reply.
#[derive(Debug, Clone, Default)]
pub struct EsmtpCapabilities {
    /// Maximum message size.
    pub size: Option<usize>,
    /// Supported authentication mechanisms.
    pub auth_mechanisms: HashSet<AuthMethod>,
    /// STARTTLS offered.
    pub starttls: bool,
}

impl EsmtpCapabilities {
    /// Reads capabilities from an EHLO reply. The first line is the greeting.
    pub fn from_ehlo_response(response: &SmtpResponse) -> Self {
        let mut caps = Self::default();

        for line in response.message.iter().skip(1) {
            let line = line.trim().to_ascii_uppercase();
            let (keyword, params) = line.split_once(' ').unwrap_or((line.as_str(), ""));

            match keyword {
                "SIZE" => caps.size = params.trim().parse().ok().filter(|s| *s > 0),
                "AUTH" => caps
                    .auth_mechanisms
                    .extend(params.split_whitespace().filter_map(AuthMethod::from_capability)),
                "STARTTLS" => caps.starttls = true,
                _ => {}
            }
        }

        caps
    }
}

/// Reply codes the relay checks for.
pub mod codes {
    /// Service ready.
    pub const SERVICE_READY: u16 = 220;
    /// Authentication successful.
    pub const AUTH_SUCCESS: u16 = 235;
    /// OK.
    pub const OK: u16 = 250;
    /// Continue (AUTH).
    pub const AUTH_CONTINUE: u16 = 334;
    /// Start mail input.
    pub const START_MAIL_INPUT: u16 = 354;
}
