//! SMTP relay transport.
//!
//! One connection per delivery: greeting, EHLO, optional STARTTLS or implicit
//! TLS, AUTH, then the mail transaction and QUIT. Nothing is retried.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::auth::{AuthMethod, Authenticator, Credentials};
use crate::config::{SessionConfig, TlsMode};
use crate::errors::{CommsError, CommsErrorKind, CommsResult};
use crate::protocol::{codes, EsmtpCapabilities, SmtpCommand, SmtpResponse};
use super::{Envelope, MailTransport};

/// Delivers messages to an SMTP server.
pub struct SmtpRelay {
    config: Arc<SessionConfig>,
}

impl fmt::Debug for SmtpRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpRelay")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("tls", &self.config.tls)
            .finish()
    }
}

impl SmtpRelay {
    /// Creates a relay from validated session settings.
    pub fn new(config: SessionConfig) -> CommsResult<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Returns the session settings.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

#[async_trait]
impl MailTransport for SmtpRelay {
    async fn transmit(&self, envelope: &Envelope, message: &[u8]) -> CommsResult<()> {
        let config = &self.config;
        let tcp = connect(config).await?;

        match config.tls {
            TlsMode::None => {
                let mut session = Session::new(tcp, config.command_timeout, false);
                session.greeting().await?;
                let caps = session.hello(config.client_id()).await?;
                deliver(session, &caps, config, envelope, message).await
            }
            TlsMode::Implicit => {
                let stream = tls_connect(tcp, config).await?;
                let mut session = Session::new(stream, config.command_timeout, true);
                session.greeting().await?;
                let caps = session.hello(config.client_id()).await?;
                deliver(session, &caps, config, envelope, message).await
            }
            TlsMode::StartTls | TlsMode::StartTlsRequired => {
                let mut session = Session::new(tcp, config.command_timeout, false);
                session.greeting().await?;
                let caps = session.hello(config.client_id()).await?;

                if !caps.starttls {
                    if config.tls == TlsMode::StartTlsRequired {
                        session.quit().await;
                        return Err(CommsError::new(
                            CommsErrorKind::StarttlsNotSupported,
                            format!("{} does not offer STARTTLS", config.host),
                        ));
                    }
                    #[cfg(feature = "tracing")]
                    tracing::warn!(host = %config.host, "STARTTLS not offered, continuing unencrypted");
                    return deliver(session, &caps, config, envelope, message).await;
                }

                session.expect(&SmtpCommand::StartTls, codes::SERVICE_READY).await?;
                let stream = tls_connect(session.into_inner(), config).await?;
                let mut session = Session::new(stream, config.command_timeout, true);
                let caps = session.hello(config.client_id()).await?;
                deliver(session, &caps, config, envelope, message).await
            }
        }
    }
}

async fn deliver<S>(
    mut session: Session<S>,
    caps: &EsmtpCapabilities,
    config: &SessionConfig,
    envelope: &Envelope,
    message: &[u8],
) -> CommsResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        let credentials = Credentials::new(username.clone(), password.clone());
        if let Err(e) = session.authenticate(caps, &credentials, config.auth_method).await {
            session.quit().await;
            return Err(e);
        }
    }

    let result = session.send_mail(caps, envelope, message).await;
    session.quit().await;
    result
}

async fn connect(config: &SessionConfig) -> CommsResult<TcpStream> {
    let address = config.address();

    let stream = timeout(config.connect_timeout, TcpStream::connect(&address))
        .await
        .map_err(|_| CommsError::timeout(format!("Connect to {} timed out", address)))?
        .map_err(|e| map_io_error(e, &address))?;

    stream.set_nodelay(true).ok();
    Ok(stream)
}

/// Maps IO errors to transport errors.
fn map_io_error(error: io::Error, address: &str) -> CommsError {
    match error.kind() {
        io::ErrorKind::TimedOut => CommsError::timeout(format!("Connect to {} timed out", address)),
        io::ErrorKind::ConnectionRefused => {
            CommsError::connection(format!("Connection refused to {}", address)).with_cause(error)
        }
        _ => CommsError::connection(format!("Connection error: {}", error)).with_cause(error),
    }
}

#[cfg(feature = "rustls-tls")]
async fn tls_connect(
    stream: TcpStream,
    config: &SessionConfig,
) -> CommsResult<tokio_rustls::client::TlsStream<TcpStream>> {
    use rustls::pki_types::ServerName;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config));
    let server_name = ServerName::try_from(config.host.clone())
        .map_err(|_| CommsError::tls(format!("Invalid server name: {}", config.host)))?;

    let tls_stream = timeout(config.connect_timeout, connector.connect(server_name, stream))
        .await
        .map_err(|_| CommsError::timeout("TLS handshake timed out"))?
        .map_err(|e| CommsError::tls(format!("TLS handshake failed: {}", e)).with_cause(e))?;

    #[cfg(feature = "tracing")]
    tracing::debug!(host = %config.host, "TLS established");

    Ok(tls_stream)
}

#[cfg(not(feature = "rustls-tls"))]
async fn tls_connect(_stream: TcpStream, _config: &SessionConfig) -> CommsResult<TcpStream> {
    Err(CommsError::configuration("No TLS implementation available"))
}

/// Prepares the DATA content with dot-stuffing and the terminating `.` line.
pub fn dot_stuff(message: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(message.len() + 100);
    let mut at_line_start = true;

    for &byte in message {
        if at_line_start && byte == b'.' {
            output.push(b'.');
        }
        output.push(byte);
        at_line_start = byte == b'\n';
    }

    if !output.ends_with(b"\r\n") {
        if output.ends_with(b"\n") {
            output.pop();
        }
        output.extend_from_slice(b"\r\n");
    }

    output.extend_from_slice(b".\r\n");
    output
}

/// One SMTP conversation over a plain or TLS stream.
struct Session<S> {
    reader: BufReader<S>,
    command_timeout: Duration,
    tls: bool,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn new(stream: S, command_timeout: Duration, tls: bool) -> Self {
        Self {
            reader: BufReader::new(stream),
            command_timeout,
            tls,
        }
    }

    fn into_inner(self) -> S {
        self.reader.into_inner()
    }

    async fn greeting(&mut self) -> CommsResult<()> {
        let greeting = self.read_response().await?;
        check(greeting, codes::SERVICE_READY).map(|_| ())
    }

    /// EHLO, falling back to HELO for servers without ESMTP.
    async fn hello(&mut self, client_id: &str) -> CommsResult<EsmtpCapabilities> {
        let response = self.command(&SmtpCommand::Ehlo(client_id.to_string())).await?;
        if response.is_success() {
            return Ok(EsmtpCapabilities::from_ehlo_response(&response));
        }

        self.expect(&SmtpCommand::Helo(client_id.to_string()), codes::OK).await?;
        Ok(EsmtpCapabilities::default())
    }

    async fn authenticate(
        &mut self,
        caps: &EsmtpCapabilities,
        credentials: &Credentials,
        preferred: Option<AuthMethod>,
    ) -> CommsResult<()> {
        let available: Vec<AuthMethod> = caps.auth_mechanisms.iter().copied().collect();
        let method = Authenticator::select_method(&available, preferred, self.tls)?;

        match method {
            AuthMethod::Plain => {
                let command = SmtpCommand::Auth {
                    mechanism: method.mechanism_name().to_string(),
                    initial_response: Some(Authenticator::plain_initial_response(credentials)),
                };
                self.expect(&command, codes::AUTH_SUCCESS).await?;
            }
            AuthMethod::Login => {
                let command = SmtpCommand::Auth {
                    mechanism: method.mechanism_name().to_string(),
                    initial_response: None,
                };
                self.expect(&command, codes::AUTH_CONTINUE).await?;
                let response = self.send_line(&Authenticator::login_username(credentials)).await?;
                check(response, codes::AUTH_CONTINUE)?;
                let response = self.send_line(&Authenticator::login_password(credentials)).await?;
                check(response, codes::AUTH_SUCCESS)?;
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(method = %method, "Authenticated");

        Ok(())
    }

    async fn send_mail(
        &mut self,
        caps: &EsmtpCapabilities,
        envelope: &Envelope,
        message: &[u8],
    ) -> CommsResult<()> {
        if let Some(max) = caps.size {
            if message.len() > max {
                return Err(CommsError::protocol(format!(
                    "Message of {} bytes exceeds the server limit of {}",
                    message.len(),
                    max
                )));
            }
        }

        let mail_from = SmtpCommand::MailFrom {
            address: envelope.from.to_smtp(),
            size: caps.size.map(|_| message.len()),
        };
        self.expect(&mail_from, codes::OK).await?;

        let mut rejected = Vec::new();
        for recipient in &envelope.recipients {
            let response = self.command(&SmtpCommand::RcptTo(recipient.to_smtp())).await?;
            if !response.is_success() {
                rejected.push((recipient.addr_spec(), response.code));
            }
        }

        if let Some(&(_, code)) = rejected.first() {
            let addresses: Vec<&str> = rejected.iter().map(|(a, _)| a.as_str()).collect();
            return Err(CommsError::new(
                CommsErrorKind::RecipientsRejected,
                format!(
                    "Server rejected {} of {} recipients",
                    rejected.len(),
                    envelope.recipients.len()
                ),
            )
            .with_fragment(addresses.join(", "))
            .with_smtp_code(code));
        }

        self.expect(&SmtpCommand::Data, codes::START_MAIL_INPUT).await?;
        self.write_all(&dot_stuff(message)).await?;
        let response = self.read_response().await?;
        check(response, codes::OK).map(|_| ())
    }

    async fn quit(&mut self) {
        let _ = self.command(&SmtpCommand::Quit).await;
    }

    async fn expect(&mut self, command: &SmtpCommand, code: u16) -> CommsResult<SmtpResponse> {
        let response = self.command(command).await?;
        check(response, code)
    }

    async fn command(&mut self, command: &SmtpCommand) -> CommsResult<SmtpResponse> {
        #[cfg(feature = "tracing")]
        tracing::debug!(command = %command, "Sending SMTP command");

        self.send_line(&command.to_smtp_string()).await
    }

    async fn send_line(&mut self, line: &str) -> CommsResult<SmtpResponse> {
        self.write_all(format!("{}\r\n", line).as_bytes()).await?;
        self.read_response().await
    }

    async fn write_all(&mut self, data: &[u8]) -> CommsResult<()> {
        let writer = self.reader.get_mut();

        timeout(self.command_timeout, writer.write_all(data))
            .await
            .map_err(|_| CommsError::timeout("Write timed out"))?
            .map_err(|e| CommsError::connection(format!("Write error: {}", e)).with_cause(e))?;

        timeout(self.command_timeout, writer.flush())
            .await
            .map_err(|_| CommsError::timeout("Flush timed out"))?
            .map_err(|e| CommsError::connection(format!("Flush error: {}", e)).with_cause(e))?;

        Ok(())
    }

    /// Reads lines until the reply is complete.
    async fn read_response(&mut self) -> CommsResult<SmtpResponse> {
        let mut lines = Vec::new();

        loop {
            let mut line = String::new();

            let read = timeout(self.command_timeout, self.reader.read_line(&mut line))
                .await
                .map_err(|_| CommsError::timeout("Read timed out"))?
                .map_err(|e| CommsError::connection(format!("Read error: {}", e)).with_cause(e))?;

            if read == 0 {
                return Err(CommsError::connection("Server closed connection"));
            }

            let line = line.trim_end().to_string();
            let is_continuation = line.as_bytes().get(3) == Some(&b'-');
            lines.push(line);

            if !is_continuation {
                break;
            }
        }

        let response = SmtpResponse::parse(&lines)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(code = response.code, message = %response.first_message(), "Received SMTP response");

        Ok(response)
    }
}

fn check(response: SmtpResponse, expected: u16) -> CommsResult<SmtpResponse> {
    if response.code == expected {
        Ok(response)
    } else {
        Err(response.to_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Minimal SMTP server: answers one session and returns what it received.
    async fn fake_server(ehlo: &'static str) -> (u16, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut transcript = Vec::new();
            reader.get_mut().write_all(b"220 fake ESMTP\r\n").await.unwrap();

            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                let line = line.trim_end().to_string();
                transcript.push(line.clone());

                let upper = line.to_ascii_uppercase();
                let reply: String = if upper.starts_with("EHLO") {
                    ehlo.to_string()
                } else if upper.starts_with("RCPT TO:") && upper.contains("NOBODY") {
                    "550 No such user\r\n".to_string()
                } else if upper == "DATA" {
                    reader.get_mut().write_all(b"354 Go ahead\r\n").await.unwrap();
                    loop {
                        let mut data = String::new();
                        reader.read_line(&mut data).await.unwrap();
                        if data == ".\r\n" {
                            break;
                        }
                        transcript.push(data);
                    }
                    "250 Queued\r\n".to_string()
                } else if upper == "QUIT" {
                    reader.get_mut().write_all(b"221 Bye\r\n").await.unwrap();
                    break;
                } else {
                    "250 OK\r\n".to_string()
                };
                reader.get_mut().write_all(reply.as_bytes()).await.unwrap();
            }
            transcript
        });

        (port, handle)
    }

    fn relay(port: u16, tls: TlsMode) -> SmtpRelay {
        let config = SessionConfig::builder()
            .host("127.0.0.1")
            .port(port)
            .tls_mode(tls)
            .client_id("relay.dilatush.com")
            .command_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        SmtpRelay::new(config).unwrap()
    }

    fn envelope(to: &[&str]) -> Envelope {
        let to: Vec<Address> = to.iter().map(|s| Address::parse(s).unwrap()).collect();
        Envelope::new(Address::parse("tom@dilatush.com").unwrap(), &to, &[], &[])
    }

    #[test]
    fn test_dot_stuffing() {
        let output = dot_stuff(b"Hello\r\n.World\r\n..Test\r\n");
        let output = String::from_utf8(output).unwrap();
        assert!(output.contains("\r\n..World"));
        assert!(output.contains("\r\n...Test"));
        assert!(output.ends_with("\r\n.\r\n"));

        assert_eq!(dot_stuff(b"no newline"), b"no newline\r\n.\r\n");
    }

    #[tokio::test]
    async fn test_transmit_plain() {
        let (port, server) = fake_server("250-fake\r\n250 SIZE 100000\r\n").await;
        let message = b"Subject: hi\r\n\r\n.hidden\r\nbody\r\n";

        relay(port, TlsMode::None)
            .transmit(&envelope(&["ops@dilatush.com", "dev@dilatush.com"]), message)
            .await
            .unwrap();

        let transcript = server.await.unwrap();
        assert_eq!(transcript[0], "EHLO relay.dilatush.com");
        assert_eq!(transcript[1], format!("MAIL FROM:<tom@dilatush.com> SIZE={}", message.len()));
        assert_eq!(transcript[2], "RCPT TO:<ops@dilatush.com>");
        assert_eq!(transcript[3], "RCPT TO:<dev@dilatush.com>");
        assert_eq!(transcript[4], "DATA");
        assert!(transcript.contains(&"..hidden\r\n".to_string()));
        assert_eq!(transcript.last().unwrap(), "QUIT");
    }

    #[tokio::test]
    async fn test_helo_fallback() {
        let (port, server) = fake_server("502 Not implemented\r\n").await;
        relay(port, TlsMode::None)
            .transmit(&envelope(&["ops@dilatush.com"]), b"x\r\n")
            .await
            .unwrap();

        let transcript = server.await.unwrap();
        assert_eq!(transcript[1], "HELO relay.dilatush.com");
        assert_eq!(transcript[2], "MAIL FROM:<tom@dilatush.com>");
    }

    #[tokio::test]
    async fn test_rejected_recipient() {
        let (port, server) = fake_server("250 fake\r\n").await;
        let err = relay(port, TlsMode::None)
            .transmit(&envelope(&["ops@dilatush.com", "nobody@dilatush.com"]), b"x\r\n")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), CommsErrorKind::RecipientsRejected);
        assert_eq!(err.fragment(), Some("nobody@dilatush.com"));
        assert_eq!(err.smtp_code(), Some(550));

        let transcript = server.await.unwrap();
        assert!(!transcript.contains(&"DATA".to_string()));
    }

    #[tokio::test]
    async fn test_starttls_required() {
        let (port, _server) = fake_server("250 fake\r\n").await;
        let err = relay(port, TlsMode::StartTlsRequired)
            .transmit(&envelope(&["ops@dilatush.com"]), b"x\r\n")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), CommsErrorKind::StarttlsNotSupported);
    }

    #[tokio::test]
    async fn test_no_credentials_over_plaintext() {
        let (port, server) = fake_server("250-fake\r\n250 AUTH PLAIN LOGIN\r\n").await;
        let config = SessionConfig::builder()
            .host("127.0.0.1")
            .port(port)
            .no_tls()
            .credentials("user", "secret")
            .build()
            .unwrap();

        let err = SmtpRelay::new(config)
            .unwrap()
            .transmit(&envelope(&["ops@dilatush.com"]), b"x\r\n")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), CommsErrorKind::AuthenticationFailed);

        let transcript = server.await.unwrap();
        assert!(transcript.iter().all(|l| !l.starts_with("AUTH")));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = relay(port, TlsMode::None)
            .transmit(&envelope(&["ops@dilatush.com"]), b"x\r\n")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
