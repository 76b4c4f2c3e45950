//! SMTP authentication.
//!
//! Supports the two password mechanisms relays commonly offer:
//! - PLAIN (RFC 4616)
//! - LOGIN (obsolete but widely used)
//!
//! Both send the password in recoverable form and are only used over TLS.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{CommsError, CommsErrorKind, CommsResult};

/// Authentication methods supported by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// PLAIN authentication (RFC 4616).
    Plain,
    /// LOGIN authentication (obsolete).
    Login,
}

impl AuthMethod {
    /// Returns the SMTP AUTH mechanism name.
    pub fn mechanism_name(&self) -> &'static str {
        match self {
            AuthMethod::Plain => "PLAIN",
            AuthMethod::Login => "LOGIN",
        }
    }

    /// Parses from an EHLO AUTH keyword.
    pub fn from_capability(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PLAIN" => Some(AuthMethod::Plain),
            "LOGIN" => Some(AuthMethod::Login),
            _ => None,
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mechanism_name())
    }
}

/// Username and password for the relay.
#[derive(Clone)]
pub struct Credentials {
    /// Username.
    pub username: String,
    /// Password (protected).
    pub password: SecretString,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Builds AUTH exchanges.
pub struct Authenticator;

impl Authenticator {
    /// Generates the initial response for PLAIN authentication.
    pub fn plain_initial_response(credentials: &Credentials) -> String {
        // \0username\0password
        let response = format!("\0{}\0{}", credentials.username, credentials.password.expose_secret());
        BASE64.encode(response)
    }

    /// Generates the LOGIN username response.
    pub fn login_username(credentials: &Credentials) -> String {
        BASE64.encode(&credentials.username)
    }

    /// Generates the LOGIN password response.
    pub fn login_password(credentials: &Credentials) -> String {
        BASE64.encode(credentials.password.expose_secret())
    }

    /// Picks the mechanism to use.
    ///
    /// A configured preference wins if the server offers it. Otherwise PLAIN
    /// is preferred over LOGIN. Nothing is selected without TLS.
    pub fn select_method(
        available: &[AuthMethod],
        preferred: Option<AuthMethod>,
        tls_enabled: bool,
    ) -> CommsResult<AuthMethod> {
        if !tls_enabled {
            return Err(CommsError::new(
                CommsErrorKind::AuthenticationFailed,
                "Refusing to send credentials over an unencrypted connection",
            ));
        }

        if let Some(method) = preferred.filter(|m| available.contains(m)) {
            return Ok(method);
        }

        [AuthMethod::Plain, AuthMethod::Login]
            .into_iter()
            .find(|m| available.contains(m))
            .ok_or_else(|| {
                CommsError::new(
                    CommsErrorKind::AuthenticationFailed,
                    "No compatible authentication method available",
                )
            })
    }
}
