//! Message sending.
//!
//! Drives one message through composition, encoding and the transport, then
//! deletes the READ_AUTO files it consumed. Failures are reported to the
//! caller as-is; retry policy belongs to the caller.

use std::sync::Arc;

use crate::address::Address;
use crate::compose::MessageComposer;
use crate::errors::{CommsError, CommsErrorKind, CommsResult};
use crate::mime::MimeEncoder;
use crate::observability::{CommsMetrics, Timer};
use crate::transport::{Envelope, MailTransport};
use crate::types::{OutboundMessage, SendReceipt};

/// Composes messages and hands them to a transport.
#[derive(Debug, Clone)]
pub struct MessageSender {
    composer: MessageComposer,
    transport: Arc<dyn MailTransport>,
    metrics: Arc<CommsMetrics>,
}

impl MessageSender {
    /// Creates a sender.
    pub fn new(composer: MessageComposer, transport: Arc<dyn MailTransport>, metrics: Arc<CommsMetrics>) -> Self {
        Self {
            composer,
            transport,
            metrics,
        }
    }

    /// Returns the metrics collector.
    pub fn metrics(&self) -> &CommsMetrics {
        &self.metrics
    }

    /// Composes and sends `message`.
    ///
    /// Checks run in order and stop at the first failure:
    /// 1. `MissingMessage` if there is no message
    /// 2. `NoRecipients` if `to` is empty, before any I/O
    /// 3. composition and encoding errors, unchanged
    /// 4. transport errors, wrapped as `SendFailed`
    /// 5. `AutoDeleteFailed` if a consumed READ_AUTO file cannot be deleted
    ///
    /// READ_AUTO files are only deleted after the transport accepted the
    /// message, so a failed send can be retried with the same sources.
    pub async fn send(
        &self,
        to: &[Address],
        cc: &[Address],
        bcc: &[Address],
        message: Option<&OutboundMessage>,
    ) -> CommsResult<SendReceipt> {
        let message = message
            .ok_or_else(|| CommsError::new(CommsErrorKind::MissingMessage, "No message to send"))?;

        if to.is_empty() {
            return Err(CommsError::new(CommsErrorKind::NoRecipients, "No recipients in the to list"));
        }

        let timer = Timer::start("send");

        let composed = match self.composer.compose(message).await {
            Ok(composed) => composed,
            Err(e) => return Err(self.composition_failed(e)),
        };
        self.metrics
            .record_composed(composed.includes, composed.images.len());

        let encoded = match MimeEncoder::new().encode(message, to, cc, &composed.body) {
            Ok(encoded) => encoded,
            Err(e) => return Err(self.composition_failed(e)),
        };

        let envelope = Envelope::new(message.from().clone(), to, cc, bcc);
        if let Err(e) = self.transport.transmit(&envelope, &encoded.bytes).await {
            self.metrics.record_send_failure();

            #[cfg(feature = "tracing")]
            tracing::warn!(message_id = %encoded.message_id, error = %e, "Send failed");

            return Err(CommsError::send_failed(e));
        }

        let deleted_files = match composed.deletes.commit().await {
            Ok(count) => count,
            Err(e) => {
                self.metrics.record_send_failure();

                #[cfg(feature = "tracing")]
                tracing::error!(message_id = %encoded.message_id, error = %e, "Message sent but READ_AUTO cleanup failed");

                return Err(e);
            }
        };

        self.metrics.record_send_success(deleted_files);
        let duration = timer.stop();

        #[cfg(feature = "tracing")]
        tracing::info!(
            message_id = %encoded.message_id,
            recipients = envelope.recipient_count(),
            bytes = encoded.bytes.len(),
            images = composed.images.len(),
            deleted_files,
            duration_ms = duration.as_millis() as u64,
            "Message sent"
        );

        Ok(SendReceipt {
            message_id: encoded.message_id,
            recipients: envelope.recipient_count(),
            bytes: encoded.bytes.len(),
            images: composed.images.len(),
            deleted_files,
            duration,
        })
    }

    fn composition_failed(&self, error: CommsError) -> CommsError {
        self.metrics.record_composition_failure();

        #[cfg(feature = "tracing")]
        tracing::warn!(error = %error, "Composition failed");

        error
    }
}
