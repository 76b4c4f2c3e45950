//! Service facade.
//!
//! Wires the transfer registry, resolver, composer and transport from one
//! [`CommsConfig`] and exposes the pipeline as a single client.

use std::path::PathBuf;
use std::sync::Arc;

use crate::address::Address;
use crate::compose::{ComposedBody, MessageComposer};
use crate::config::CommsConfig;
use crate::errors::{CommsError, CommsErrorKind, CommsResult};
use crate::observability::{CommsMetrics, MetricsSnapshot};
use crate::resolver::ResourceResolver;
use crate::sender::MessageSender;
use crate::transfer::TransferRegistry;
use crate::transport::{MailTransport, SmtpRelay};
use crate::types::{OutboundMessage, SendReceipt};

/// High-level client for composing and sending mail.
#[derive(Debug, Clone)]
pub struct CommsClient {
    /// Configuration.
    config: Arc<CommsConfig>,
    /// Declared transfer directories.
    registry: Arc<TransferRegistry>,
    /// Body composer, shared with the sender.
    composer: MessageComposer,
    /// Sender.
    sender: MessageSender,
    /// Metrics collector.
    metrics: Arc<CommsMetrics>,
}

impl CommsClient {
    /// Creates a client that delivers through the configured SMTP relay.
    pub fn new(config: CommsConfig) -> CommsResult<Self> {
        Self::builder().config(config).build()
    }

    /// Creates a builder for the client.
    pub fn builder() -> CommsClientBuilder {
        CommsClientBuilder::default()
    }

    /// Composes and sends a message. See [`MessageSender::send`].
    pub async fn send(
        &self,
        to: &[Address],
        cc: &[Address],
        bcc: &[Address],
        message: Option<&OutboundMessage>,
    ) -> CommsResult<SendReceipt> {
        self.sender.send(to, cc, bcc, message).await
    }

    /// Composes a body without sending it.
    ///
    /// READ_AUTO files read during composition are listed in the result's
    /// `deletes` and left in place; commit them to consume the files.
    pub async fn compose(&self, message: &OutboundMessage) -> CommsResult<ComposedBody> {
        self.composer.compose(message).await
    }

    /// Stores a file in a writable transfer directory.
    pub async fn write_transfer_file(
        &self,
        directory: &str,
        relative: &str,
        bytes: &[u8],
    ) -> CommsResult<PathBuf> {
        let directory = self.registry.get(directory).ok_or_else(|| {
            CommsError::resolution(
                CommsErrorKind::UnknownTransferDirectory,
                "Unknown transfer directory",
                directory,
            )
        })?;
        directory.write_file(relative, bytes).await
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CommsConfig {
        &self.config
    }

    /// Returns the transfer registry.
    pub fn registry(&self) -> &TransferRegistry {
        &self.registry
    }

    /// Returns a snapshot of the client metrics.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

/// Builder for [`CommsClient`].
#[derive(Debug, Default)]
pub struct CommsClientBuilder {
    config: Option<CommsConfig>,
    transport: Option<Arc<dyn MailTransport>>,
    metrics: Option<Arc<CommsMetrics>>,
}

impl CommsClientBuilder {
    /// Sets the configuration.
    pub fn config(mut self, config: CommsConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replaces the SMTP relay with another transport.
    pub fn transport(mut self, transport: Arc<dyn MailTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Shares a metrics collector with the client.
    pub fn metrics(mut self, metrics: Arc<CommsMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Builds the client.
    ///
    /// Validates the configuration and every transfer directory. A custom
    /// transport skips building the SMTP relay.
    pub fn build(self) -> CommsResult<CommsClient> {
        let config = self
            .config
            .ok_or_else(|| CommsError::configuration("Configuration is required"))?;
        config.validate()?;

        let registry = Arc::new(TransferRegistry::from_config(&config.transfer_directories)?);
        let resolver = ResourceResolver::new(registry.clone(), config.compose.fetch_timeout)?;
        let composer = MessageComposer::new(resolver, &config.compose);

        let transport: Arc<dyn MailTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(SmtpRelay::new(config.session.clone())?),
        };

        let metrics = self.metrics.unwrap_or_default();
        let sender = MessageSender::new(composer.clone(), transport, metrics.clone());

        #[cfg(feature = "tracing")]
        tracing::debug!(
            directories = registry.len(),
            host = %config.session.host,
            "Comms client ready"
        );

        Ok(CommsClient {
            config: Arc::new(config),
            registry,
            composer,
            sender,
            metrics,
        })
    }
}
