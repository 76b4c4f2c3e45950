//! Email address parsing and validation.
//!
//! Accepts a bounded subset of RFC 5322 / RFC 2606 syntax:
//! - bare `mailbox@domain`, or `Display Name<mailbox@domain>`
//! - dot-atom or quoted-string mailboxes
//! - ASCII LDH domains with at least two labels
//!
//! Domain comments, IP literals, and internationalized domains are not supported.
//! Reserved test TLDs and example domains are rejected.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{CommsError, CommsErrorKind, CommsResult};

/// Maximum domain length in characters.
pub const MAX_DOMAIN_LENGTH: usize = 255;

/// Maximum DNS label length.
pub const MAX_LABEL_LENGTH: usize = 63;

const RESERVED_TLDS: [&str; 4] = ["test", "example", "invalid", "localhost"];
const RESERVED_DOMAINS: [&str; 3] = ["example.com", "example.net", "example.org"];

/// A validated email address with optional display name.
///
/// Immutable once constructed; the only way to build one is [`Address::parse`]
/// (or one of the conversion traits that delegate to it).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    mailbox: String,
    domain: String,
    display_name: Option<String>,
}

impl Address {
    /// Parses and validates an address.
    pub fn parse(input: &str) -> CommsResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(CommsError::address(
                CommsErrorKind::EmptyInput,
                "Address cannot be empty",
                input,
            ));
        }

        let (display_name, working) = split_display_name(trimmed)?;

        let at = working.rfind('@').ok_or_else(|| {
            CommsError::address(CommsErrorKind::MissingAtSign, "Address has no @", working)
        })?;
        let mailbox = &working[..at];
        let domain = &working[at + 1..];

        if mailbox.is_empty() {
            return Err(CommsError::address(
                CommsErrorKind::EmptyMailbox,
                "Mailbox cannot be empty",
                working,
            ));
        }

        validate_domain(domain)?;
        validate_mailbox(mailbox)?;

        Ok(Self {
            mailbox: mailbox.to_string(),
            domain: domain.to_string(),
            display_name: display_name.map(str::to_string),
        })
    }

    /// Returns the mailbox (local part).
    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    /// Returns the domain.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Returns the display name if present.
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Returns `mailbox@domain` without the display name.
    pub fn addr_spec(&self) -> String {
        format!("{}@{}", self.mailbox, self.domain)
    }

    /// Formats the address for SMTP MAIL FROM/RCPT TO commands.
    pub fn to_smtp(&self) -> String {
        format!("<{}>", self.addr_spec())
    }

    /// Formats the address for message headers.
    pub fn to_header(&self) -> String {
        match &self.display_name {
            Some(name) if !name.is_ascii() => {
                format!("=?UTF-8?B?{}?= <{}>", BASE64.encode(name.as_bytes()), self.addr_spec())
            }
            Some(name) => {
                if name.contains(|c: char| !c.is_ascii_alphanumeric() && c != ' ') {
                    let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
                    format!("\"{}\" <{}>", escaped, self.addr_spec())
                } else {
                    format!("{} <{}>", name, self.addr_spec())
                }
            }
            None => self.addr_spec(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display_name {
            // Parsing strips one pair of outer quotes, so a name that starts
            // or ends with a quote is wrapped again to render the same name.
            Some(name) if name.starts_with('"') || name.ends_with('"') => {
                write!(f, "\"{}\"<{}@{}>", name, self.mailbox, self.domain)
            }
            Some(name) => write!(f, "{}<{}@{}>", name, self.mailbox, self.domain),
            None => write!(f, "{}@{}", self.mailbox, self.domain),
        }
    }
}

impl FromStr for Address {
    type Err = CommsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

impl TryFrom<&str> for Address {
    type Error = CommsError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Address::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = CommsError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Address::parse(&s)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

/// Splits `Name<addr>` into its parts; anything else is a bare address.
fn split_display_name(input: &str) -> CommsResult<(Option<&str>, &str)> {
    if !input.ends_with('>') {
        return Ok((None, input));
    }
    let Some(open) = input.rfind('<') else {
        return Ok((None, input));
    };

    let name = input[..open].trim();
    let name = name
        .strip_prefix('"')
        .and_then(|n| n.strip_suffix('"'))
        .unwrap_or(name)
        .trim();
    if name.is_empty() {
        return Err(CommsError::address(
            CommsErrorKind::EmptyDisplayName,
            "Display name cannot be empty",
            input,
        ));
    }

    Ok((Some(name), &input[open + 1..input.len() - 1]))
}

fn validate_domain(domain: &str) -> CommsResult<()> {
    if domain.len() > MAX_DOMAIN_LENGTH {
        return Err(CommsError::address(
            CommsErrorKind::DomainTooLong,
            format!("Domain exceeds {} characters", MAX_DOMAIN_LENGTH),
            domain,
        ));
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || !labels.iter().all(|l| is_ldh_label(l)) {
        return Err(CommsError::address(
            CommsErrorKind::InvalidDomain,
            "Domain must be two or more letter-digit-hyphen labels",
            domain,
        ));
    }

    let tld = labels[labels.len() - 1];
    if tld.bytes().all(|b| b.is_ascii_digit())
        || RESERVED_TLDS.iter().any(|r| tld.eq_ignore_ascii_case(r))
    {
        return Err(CommsError::address(
            CommsErrorKind::ReservedTld,
            format!("Top-level domain '{}' is numeric or reserved", tld),
            domain,
        ));
    }

    let lower = domain.to_ascii_lowercase();
    let reserved = RESERVED_DOMAINS.iter().any(|r| {
        lower == *r
            || lower
                .strip_suffix(r)
                .map(|rest| rest.ends_with('.'))
                .unwrap_or(false)
    });
    if reserved {
        return Err(CommsError::address(
            CommsErrorKind::ReservedDomain,
            "Domain is reserved for documentation",
            domain,
        ));
    }

    Ok(())
}

fn is_ldh_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= MAX_LABEL_LENGTH
        && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        && !label.starts_with('-')
        && !label.ends_with('-')
}

fn validate_mailbox(mailbox: &str) -> CommsResult<()> {
    let valid = if mailbox.starts_with('"') {
        is_quoted_string(mailbox)
    } else {
        is_dot_atom(mailbox)
    };

    if valid {
        Ok(())
    } else {
        Err(CommsError::address(
            CommsErrorKind::InvalidMailbox,
            "Mailbox must be a dot-atom or a quoted string",
            mailbox,
        ))
    }
}

fn is_quoted_string(s: &str) -> bool {
    s.len() >= 3
        && s.ends_with('"')
        && s[1..s.len() - 1].chars().all(|c| c != '"' && c.is_ascii() && !c.is_ascii_control())
}

fn is_atext(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-/=?^_`{|}~".contains(c)
}

/// Dot-separated atoms; `\x` escapes any printable ASCII character.
fn is_dot_atom(s: &str) -> bool {
    let mut atom_len = 0usize;
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if atom_len == 0 {
                    return false;
                }
                atom_len = 0;
            }
            '\\' => match chars.next() {
                Some(escaped) if escaped.is_ascii() && !escaped.is_ascii_control() => atom_len += 1,
                _ => return false,
            },
            c if is_atext(c) => atom_len += 1,
            _ => return false,
        }
    }

    atom_len > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_bare_address() {
        let addr = Address::parse("tom@dilatush.com").unwrap();
        assert_eq!(addr.mailbox(), "tom");
        assert_eq!(addr.domain(), "dilatush.com");
        assert!(addr.display_name().is_none());
        assert_eq!(addr.to_string(), "tom@dilatush.com");
    }

    #[test]
    fn test_display_name() {
        let addr = Address::parse("Tom D<tom@dilatush.com>").unwrap();
        assert_eq!(addr.display_name(), Some("Tom D"));
        assert_eq!(addr.mailbox(), "tom");
        assert_eq!(addr.to_string(), "Tom D<tom@dilatush.com>");

        let addr = Address::parse("\"Dilatush, Tom\" <tom@dilatush.com>").unwrap();
        assert_eq!(addr.display_name(), Some("Dilatush, Tom"));
        assert_eq!(addr.to_header(), "\"Dilatush, Tom\" <tom@dilatush.com>");
    }

    #[rstest]
    #[case("", CommsErrorKind::EmptyInput)]
    #[case("   ", CommsErrorKind::EmptyInput)]
    #[case("<tom@dilatush.com>", CommsErrorKind::EmptyDisplayName)]
    #[case("tom.dilatush.com", CommsErrorKind::MissingAtSign)]
    #[case("@dilatush.com", CommsErrorKind::EmptyMailbox)]
    #[case("tom@", CommsErrorKind::InvalidDomain)]
    #[case("tom@localhost", CommsErrorKind::InvalidDomain)]
    #[case("tom@-bad.com", CommsErrorKind::InvalidDomain)]
    #[case("tom@bad-.com", CommsErrorKind::InvalidDomain)]
    #[case("tom@bad..com", CommsErrorKind::InvalidDomain)]
    #[case("tom@bogus.test", CommsErrorKind::ReservedTld)]
    #[case("tom@bogus.EXAMPLE", CommsErrorKind::ReservedTld)]
    #[case("tom@10.0.0.1", CommsErrorKind::ReservedTld)]
    #[case("tom@example.com", CommsErrorKind::ReservedDomain)]
    #[case("tom@mail.example.org", CommsErrorKind::ReservedDomain)]
    #[case("to..m@dilatush.com", CommsErrorKind::InvalidMailbox)]
    #[case(".tom@dilatush.com", CommsErrorKind::InvalidMailbox)]
    #[case("to m@dilatush.com", CommsErrorKind::InvalidMailbox)]
    #[case("\"to\"m\"@dilatush.com", CommsErrorKind::InvalidMailbox)]
    fn test_rejections(#[case] input: &str, #[case] kind: CommsErrorKind) {
        let err = Address::parse(input).unwrap_err();
        assert_eq!(err.kind(), kind, "input: {:?}", input);
        assert!(err.fragment().is_some());
    }

    #[rstest]
    #[case("first.last@dilatush.com")]
    #[case("o'reilly+tag@sub.dilatush.com")]
    #[case("a\\ b@dilatush.com")]
    #[case("\"tom dilatush\"@dilatush.com")]
    #[case("x@myexample.com")]
    #[case("x@a1.b2.io")]
    fn test_acceptances(#[case] input: &str) {
        assert!(Address::parse(input).is_ok(), "input: {:?}", input);
    }

    #[test]
    fn test_domain_too_long() {
        let label = "a".repeat(60);
        let domain = vec![label.as_str(); 5].join(".");
        let err = Address::parse(&format!("tom@{}.com", domain)).unwrap_err();
        assert_eq!(err.kind(), CommsErrorKind::DomainTooLong);
    }

    #[test]
    fn test_split_on_last_at() {
        let addr = Address::parse("\"tom@home\"@dilatush.com").unwrap();
        assert_eq!(addr.mailbox(), "\"tom@home\"");
        assert_eq!(addr.domain(), "dilatush.com");
    }

    #[rstest]
    #[case("tom@dilatush.com")]
    #[case("Tom D<tom@dilatush.com>")]
    #[case("  \"Tom D\"   <tom@dilatush.com>  ")]
    #[case("\"q s\"@dilatush.com")]
    #[case("\"\"Tom\"\" <tom@dilatush.com>")]
    #[case("\"Tom\"\"<tom@dilatush.com>")]
    #[case("Tom \"T\" D<tom@dilatush.com>")]
    #[case("\"<tom@dilatush.com>")]
    fn test_render_is_idempotent(#[case] input: &str) {
        let parsed = Address::parse(input).unwrap();
        let once = parsed.to_string();
        let reparsed = Address::parse(&once).unwrap();
        assert_eq!(reparsed, parsed);
        assert_eq!(reparsed.to_string(), once);
    }

    #[test]
    fn test_quoted_display_name_kept() {
        let addr = Address::parse("\"\"Tom\"\" <tom@dilatush.com>").unwrap();
        assert_eq!(addr.display_name(), Some("\"Tom\""));
        assert_eq!(addr.to_string(), "\"\"Tom\"\"<tom@dilatush.com>");
    }

    #[test]
    fn test_serde_validates() {
        let addr: Address = serde_json::from_str("\"Tom D<tom@dilatush.com>\"").unwrap();
        assert_eq!(addr.display_name(), Some("Tom D"));
        assert!(serde_json::from_str::<Address>("\"tom@example.com\"").is_err());
        assert_eq!(serde_json::to_string(&addr).unwrap(), "\"Tom D<tom@dilatush.com>\"");
    }

    #[test]
    fn test_smtp_and_header_forms() {
        let addr = Address::parse("Tom<tom@dilatush.com>").unwrap();
        assert_eq!(addr.to_smtp(), "<tom@dilatush.com>");
        assert_eq!(addr.to_header(), "Tom <tom@dilatush.com>");

        let addr = Address::parse("Tòm<tom@dilatush.com>").unwrap();
        assert!(addr.to_header().starts_with("=?UTF-8?B?"));
    }
}
