//! Configuration types.
//!
//! The configuration collaborator hands the crate one [`CommsConfig`] value at
//! startup. It is validated once and then shared immutably:
//! - SMTP session settings for the transport
//! - transfer directory declarations
//! - composition limits

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::auth::AuthMethod;
use crate::errors::{CommsError, CommsResult};
use crate::transfer::TransferMode;

/// Default SMTP port (submission with STARTTLS).
pub const DEFAULT_PORT: u16 = 587;

/// Default timeout for connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for commands.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Default cap on include expansion passes.
pub const DEFAULT_MAX_INCLUDE_PASSES: usize = 16;

/// Default cap on the size of expanded HTML (4 MiB).
pub const DEFAULT_MAX_EXPANDED_SIZE: usize = 4 * 1024 * 1024;

/// Default timeout for fetching network resources.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// TLS mode for SMTP connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// No TLS (insecure, not recommended).
    None,
    /// Opportunistic STARTTLS (default).
    #[default]
    StartTls,
    /// Required STARTTLS (fail if not supported).
    StartTlsRequired,
    /// Implicit TLS (port 465).
    Implicit,
}

/// SMTP session settings consumed by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// SMTP server hostname.
    pub host: String,
    /// SMTP server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// TLS mode.
    #[serde(default)]
    pub tls: TlsMode,
    /// Authentication username.
    pub username: Option<String>,
    /// Authentication password (serialization skipped for security).
    #[serde(skip)]
    pub password: Option<SecretString>,
    /// Preferred authentication method.
    pub auth_method: Option<AuthMethod>,
    /// Connect timeout.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Command timeout.
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,
    /// Client identifier for EHLO.
    pub client_id: Option<String>,
}

fn default_port() -> u16 { DEFAULT_PORT }
fn default_connect_timeout() -> Duration { DEFAULT_CONNECT_TIMEOUT }
fn default_command_timeout() -> Duration { DEFAULT_COMMAND_TIMEOUT }

impl SessionConfig {
    /// Creates a new session builder.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Validates the session settings.
    pub fn validate(&self) -> CommsResult<()> {
        if self.host.is_empty() {
            return Err(CommsError::configuration("Host is required"));
        }

        if self.port == 0 {
            return Err(CommsError::configuration("Port must be non-zero"));
        }

        if self.password.is_some() && self.username.is_none() {
            return Err(CommsError::configuration("Password set without a username"));
        }

        Ok(())
    }

    /// Returns the full server address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns true if authentication is configured.
    pub fn has_auth(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// Returns the client identifier for EHLO.
    pub fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or("localhost")
    }
}

/// Builder for session settings.
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    host: Option<String>,
    port: u16,
    tls: TlsMode,
    username: Option<String>,
    password: Option<SecretString>,
    auth_method: Option<AuthMethod>,
    connect_timeout: Duration,
    command_timeout: Duration,
    client_id: Option<String>,
}

impl SessionConfigBuilder {
    /// Sets the SMTP server host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the SMTP server port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets plain credentials.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(SecretString::new(password.into()));
        self
    }

    /// Sets the authentication method.
    pub fn auth_method(mut self, method: AuthMethod) -> Self {
        self.auth_method = Some(method);
        self
    }

    /// Sets the TLS mode.
    pub fn tls_mode(mut self, mode: TlsMode) -> Self {
        self.tls = mode;
        self
    }

    /// Disables TLS (insecure).
    pub fn no_tls(mut self) -> Self {
        self.tls = TlsMode::None;
        self
    }

    /// Sets connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets command timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the client identifier for EHLO.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Builds the session settings.
    pub fn build(self) -> CommsResult<SessionConfig> {
        let config = SessionConfig {
            host: self.host.ok_or_else(|| CommsError::configuration("Host is required"))?,
            port: if self.port == 0 { DEFAULT_PORT } else { self.port },
            tls: self.tls,
            username: self.username,
            password: self.password,
            auth_method: self.auth_method,
            connect_timeout: if self.connect_timeout == Duration::ZERO {
                DEFAULT_CONNECT_TIMEOUT
            } else {
                self.connect_timeout
            },
            command_timeout: if self.command_timeout == Duration::ZERO {
                DEFAULT_COMMAND_TIMEOUT
            } else {
                self.command_timeout
            },
            client_id: self.client_id,
        };

        config.validate()?;
        Ok(config)
    }
}

/// One declared transfer directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDirectoryConfig {
    /// Unique directory name, used in `transfer://<name>/...`.
    pub name: String,
    /// Absolute path, or relative to the working directory.
    pub path: PathBuf,
    /// Access mode.
    pub mode: TransferMode,
}

impl TransferDirectoryConfig {
    /// Creates a declaration.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, mode: TransferMode) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            mode,
        }
    }
}

/// Composition limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeConfig {
    /// Maximum include expansion passes.
    #[serde(default = "default_max_include_passes")]
    pub max_include_passes: usize,
    /// Maximum size in bytes of the expanded HTML.
    #[serde(default = "default_max_expanded_size")]
    pub max_expanded_size: usize,
    /// Timeout for each network fetch.
    #[serde(default = "default_fetch_timeout", with = "humantime_serde")]
    pub fetch_timeout: Duration,
}

fn default_max_include_passes() -> usize { DEFAULT_MAX_INCLUDE_PASSES }
fn default_max_expanded_size() -> usize { DEFAULT_MAX_EXPANDED_SIZE }
fn default_fetch_timeout() -> Duration { DEFAULT_FETCH_TIMEOUT }

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            max_include_passes: default_max_include_passes(),
            max_expanded_size: default_max_expanded_size(),
            fetch_timeout: default_fetch_timeout(),
        }
    }
}

impl ComposeConfig {
    /// Validates the limits.
    pub fn validate(&self) -> CommsResult<()> {
        if self.max_include_passes == 0 {
            return Err(CommsError::configuration("max_include_passes must be positive"));
        }
        if self.max_expanded_size == 0 {
            return Err(CommsError::configuration("max_expanded_size must be positive"));
        }
        Ok(())
    }
}

/// Complete crate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommsConfig {
    /// SMTP session settings.
    pub session: SessionConfig,
    /// Transfer directory declarations.
    pub transfer_directories: Vec<TransferDirectoryConfig>,
    /// Composition limits.
    #[serde(default)]
    pub compose: ComposeConfig,
}

impl CommsConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> CommsConfigBuilder {
        CommsConfigBuilder::default()
    }

    /// Parses and validates a JSON configuration document.
    pub fn from_json(json: &str) -> CommsResult<Self> {
        let config: CommsConfig = serde_json::from_str(json).map_err(|e| {
            CommsError::configuration(format!("Invalid configuration document: {}", e)).with_cause(e)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> CommsResult<()> {
        self.session.validate()?;
        self.compose.validate()?;

        if self.transfer_directories.is_empty() {
            return Err(CommsError::configuration("No transfer directories configured"));
        }

        let mut seen = HashSet::new();
        for dir in &self.transfer_directories {
            if dir.name.is_empty() {
                return Err(CommsError::configuration("Transfer directory name is missing"));
            }
            if dir.path.as_os_str().is_empty() {
                return Err(CommsError::configuration(format!(
                    "Transfer directory path is missing: {}",
                    dir.name
                )));
            }
            if !seen.insert(dir.name.as_str()) {
                return Err(CommsError::configuration(format!(
                    "Transfer directory name is a duplicate: {}",
                    dir.name
                )));
            }
        }

        Ok(())
    }
}

/// Builder for the crate configuration.
#[derive(Debug, Default)]
pub struct CommsConfigBuilder {
    session: Option<SessionConfig>,
    transfer_directories: Vec<TransferDirectoryConfig>,
    compose: ComposeConfig,
}

impl CommsConfigBuilder {
    /// Sets the session settings.
    pub fn session(mut self, session: SessionConfig) -> Self {
        self.session = Some(session);
        self
    }

    /// Declares a transfer directory.
    pub fn transfer_directory(
        mut self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        mode: TransferMode,
    ) -> Self {
        self.transfer_directories
            .push(TransferDirectoryConfig::new(name, path, mode));
        self
    }

    /// Sets the composition limits.
    pub fn compose(mut self, compose: ComposeConfig) -> Self {
        self.compose = compose;
        self
    }

    /// Sets the include pass limit.
    pub fn max_include_passes(mut self, passes: usize) -> Self {
        self.compose.max_include_passes = passes;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> CommsResult<CommsConfig> {
        let config = CommsConfig {
            session: self
                .session
                .ok_or_else(|| CommsError::configuration("Session settings are required"))?,
            transfer_directories: self.transfer_directories,
            compose: self.compose,
        };

        config.validate()?;
        Ok(config)
    }
}

// Humantime serde support
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CommsErrorKind;

    fn session() -> SessionConfig {
        SessionConfig::builder().host("smtp.gmail.com").build().unwrap()
    }

    #[test]
    fn test_session_defaults() {
        let config = session();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.tls, TlsMode::StartTls);
        assert!(!config.has_auth());
        assert_eq!(config.client_id(), "localhost");
    }

    #[test]
    fn test_session_credentials() {
        let config = SessionConfig::builder()
            .host("smtp.gmail.com")
            .port(465)
            .tls_mode(TlsMode::Implicit)
            .credentials("user", "pass")
            .build()
            .unwrap();
        assert!(config.has_auth());
        assert_eq!(config.address(), "smtp.gmail.com:465");
    }

    #[test]
    fn test_missing_host() {
        let err = SessionConfig::builder().build().unwrap_err();
        assert_eq!(err.kind(), CommsErrorKind::ConfigurationInvalid);
    }

    #[test]
    fn test_requires_transfer_directory() {
        let err = CommsConfig::builder().session(session()).build().unwrap_err();
        assert!(err.message().contains("No transfer directories"));
    }

    #[test]
    fn test_duplicate_directory_names() {
        let err = CommsConfig::builder()
            .session(session())
            .transfer_directory("default", "transfer", TransferMode::ReadWrite)
            .transfer_directory("default", "other", TransferMode::ReadOnly)
            .build()
            .unwrap_err();
        assert!(err.message().contains("duplicate"));
    }

    #[test]
    fn test_zero_passes_rejected() {
        let result = CommsConfig::builder()
            .session(session())
            .transfer_directory("default", "transfer", TransferMode::ReadWrite)
            .max_include_passes(0)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_json() {
        let config = CommsConfig::from_json(
            r#"{
                "session": {
                    "host": "smtp.gmail.com",
                    "tls": "start_tls_required",
                    "username": "comms",
                    "connect_timeout": "10s"
                },
                "transfer_directories": [
                    { "name": "default", "path": "transfer", "mode": "READ_WRITE" },
                    { "name": "inbox", "path": "/var/comms/in", "mode": "READ_AUTO" }
                ],
                "compose": { "max_include_passes": 4 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.session.port, DEFAULT_PORT);
        assert_eq!(config.session.tls, TlsMode::StartTlsRequired);
        assert_eq!(config.session.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.transfer_directories[1].mode, TransferMode::ReadAuto);
        assert_eq!(config.compose.max_include_passes, 4);
        assert_eq!(config.compose.max_expanded_size, DEFAULT_MAX_EXPANDED_SIZE);
    }

    #[test]
    fn test_from_json_rejects_bad_mode() {
        let err = CommsConfig::from_json(
            r#"{
                "session": { "host": "smtp.gmail.com" },
                "transfer_directories": [ { "name": "d", "path": "t", "mode": "READ_SOMETIMES" } ]
            }"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), CommsErrorKind::ConfigurationInvalid);
    }
}
