//! Message body composition.
//!
//! Resolves the message shape once, then builds the MIME tree:
//!
//! ```text
//! text only:      text/plain
//! text and html:  multipart/alternative
//!                 ├── text/plain
//!                 └── multipart/related
//!                     ├── text/html      (includes expanded, images rewritten)
//!                     └── image/*        (Content-ID: <N>, inline) ...
//! ```
//!
//! An HTML-only message gets a fixed plain-text fallback and is composed as
//! text and html.

use crate::config::ComposeConfig;
use crate::errors::{CommsError, CommsErrorKind, CommsResult};
use crate::images::ImageEmbedder;
use crate::include::IncludeExpander;
use crate::mime::MimePart;
use crate::resolver::{PendingDeletes, ResourceResolver};
use crate::types::{ImageReference, OutboundMessage};

/// Plain-text body used when a message only has HTML.
pub const HTML_FALLBACK_TEXT: &str = "(must be viewed with HTML-capable email client)";

/// The shape of a message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyShape<'a> {
    /// Only plain text.
    TextOnly {
        /// Text body.
        text: &'a str,
    },
    /// Plain text plus HTML.
    TextAndHtml {
        /// Text body, possibly the fallback.
        text: &'a str,
        /// HTML body before expansion.
        html: &'a str,
    },
}

impl<'a> BodyShape<'a> {
    /// Determines the shape of `message`.
    pub fn of(message: &'a OutboundMessage) -> CommsResult<Self> {
        match (message.text(), message.html()) {
            (Some(text), None) => Ok(BodyShape::TextOnly { text }),
            (None, Some(html)) => Ok(BodyShape::TextAndHtml {
                text: HTML_FALLBACK_TEXT,
                html,
            }),
            (Some(text), Some(html)) => Ok(BodyShape::TextAndHtml { text, html }),
            (None, None) => Err(CommsError::new(
                CommsErrorKind::MissingBody,
                "Message must have a text or HTML body",
            )),
        }
    }
}

/// A composed body and what it took to build it.
#[derive(Debug)]
pub struct ComposedBody {
    /// Root of the MIME tree.
    pub body: MimePart,
    /// Embedded images, in content-ID order.
    pub images: Vec<ImageReference>,
    /// Include directives expanded.
    pub includes: usize,
    /// READ_AUTO files to delete once the message is sent.
    pub deletes: PendingDeletes,
}

/// Builds MIME bodies from outbound messages.
#[derive(Debug, Clone)]
pub struct MessageComposer {
    resolver: ResourceResolver,
    expander: IncludeExpander,
    embedder: ImageEmbedder,
}

impl MessageComposer {
    /// Creates a composer.
    pub fn new(resolver: ResourceResolver, config: &ComposeConfig) -> Self {
        Self {
            expander: IncludeExpander::new(resolver.clone(), config),
            resolver,
            embedder: ImageEmbedder::new(),
        }
    }

    /// Composes the body of `message`.
    ///
    /// Any include or image failure aborts composition. Files read from
    /// READ_AUTO directories are listed in the result and not yet deleted.
    pub async fn compose(&self, message: &OutboundMessage) -> CommsResult<ComposedBody> {
        let mut deletes = PendingDeletes::new();

        match BodyShape::of(message)? {
            BodyShape::TextOnly { text } => Ok(ComposedBody {
                body: MimePart::text_plain(text),
                images: Vec::new(),
                includes: 0,
                deletes,
            }),
            BodyShape::TextAndHtml { text, html } => {
                let expansion = self.expander.expand_counted(html, &mut deletes).await?;
                let (html, images) = self.embedder.extract_and_rewrite(&expansion.html);

                let mut related = Vec::with_capacity(images.len() + 1);
                related.push(MimePart::html(html));
                for image in &images {
                    related.push(self.load_image(image, &mut deletes).await?);
                }

                let body = MimePart::alternative(vec![
                    MimePart::text_plain(text),
                    MimePart::related(related),
                ]);

                Ok(ComposedBody {
                    body,
                    images,
                    includes: expansion.includes,
                    deletes,
                })
            }
        }
    }

    async fn load_image(&self, image: &ImageReference, deletes: &mut PendingDeletes) -> CommsResult<MimePart> {
        let resource = self.resolver.resolve(&image.original_url).await?;
        let content_type = resource.content_type().clone();
        let data = resource.read_to_end(deletes).await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            content_id = image.content_id,
            url = %image.original_url,
            content_type = %content_type,
            bytes = data.len(),
            "Embedded inline image"
        );

        Ok(MimePart::inline_image(image, &content_type, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::mime::ContentType;
    use crate::transfer::{TransferDirectory, TransferMode, TransferRegistry};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn composer(tmp: &TempDir) -> MessageComposer {
        let registry = TransferRegistry::new([
            TransferDirectory::new("default", tmp.path(), TransferMode::ReadOnly).unwrap(),
        ])
        .unwrap();
        let resolver = ResourceResolver::new(Arc::new(registry), Duration::from_secs(5)).unwrap();
        MessageComposer::new(resolver, &ComposeConfig::default())
    }

    fn message(text: Option<&str>, html: Option<&str>) -> OutboundMessage {
        OutboundMessage::new(
            Address::parse("tom@dilatush.com").unwrap(),
            "Subject",
            text.map(str::to_string),
            html.map(str::to_string),
        )
        .unwrap()
    }

    #[test]
    fn test_body_shape() {
        let m = message(Some("t"), None);
        assert_eq!(BodyShape::of(&m).unwrap(), BodyShape::TextOnly { text: "t" });

        let m = message(None, Some("<p>h</p>"));
        assert_eq!(
            BodyShape::of(&m).unwrap(),
            BodyShape::TextAndHtml {
                text: HTML_FALLBACK_TEXT,
                html: "<p>h</p>"
            }
        );

        let m = message(Some("t"), Some("h"));
        assert_eq!(BodyShape::of(&m).unwrap(), BodyShape::TextAndHtml { text: "t", html: "h" });
    }

    #[tokio::test]
    async fn test_text_only() {
        let tmp = TempDir::new().unwrap();
        let composed = composer(&tmp).compose(&message(Some("plain"), None)).await.unwrap();
        assert_eq!(composed.body.content_type(), &ContentType::TextPlain);
        assert_eq!(composed.body.text(), Some("plain"));
        assert!(composed.images.is_empty());
    }

    #[tokio::test]
    async fn test_html_only_gets_fallback_text() {
        let tmp = TempDir::new().unwrap();
        let composed = composer(&tmp).compose(&message(None, Some("<p>hi</p>"))).await.unwrap();

        let parts = composed.body.children();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].text(), Some(HTML_FALLBACK_TEXT));
        assert!(matches!(parts[1].content_type(), ContentType::MultipartRelated(_)));
        assert_eq!(parts[1].children()[0].text(), Some("<p>hi</p>"));
    }

    #[tokio::test]
    async fn test_part_order_with_images() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.png"), [0x89, b'P', b'N', b'G']).unwrap();
        std::fs::write(tmp.path().join("b.jpg"), [0xff, 0xd8]).unwrap();
        std::fs::write(
            tmp.path().join("header.html"),
            r#"<img src="transfer://default/a.png">"#,
        )
        .unwrap();

        let html = concat!(
            r#"<include-file src="transfer://default/header.html"/>"#,
            r#"<img src="transfer://default/b.jpg"><img src="transfer://default/a.png">"#,
        );
        let composed = composer(&tmp).compose(&message(Some("text"), Some(html))).await.unwrap();

        assert!(matches!(composed.body.content_type(), ContentType::MultipartAlternative(_)));
        let alternatives = composed.body.children();
        assert_eq!(alternatives[0].content_type(), &ContentType::TextPlain);

        let related = alternatives[1].children();
        assert_eq!(related.len(), 3);
        assert_eq!(related[0].content_type(), &ContentType::TextHtml);
        assert_eq!(
            related[0].text(),
            Some(r#"<img src="cid:0"><img src="cid:1"><img src="cid:0">"#)
        );
        assert_eq!(related[1].header("Content-ID"), Some("<0>"));
        assert_eq!(related[1].content_type().mime_type(), "image/png");
        assert_eq!(related[2].header("Content-ID"), Some("<1>"));
        assert_eq!(related[2].content_type().mime_type(), "image/jpeg");

        assert_eq!(composed.includes, 1);
        assert_eq!(composed.images.len(), 2);
        assert!(composed.deletes.is_empty());
    }

    #[tokio::test]
    async fn test_missing_image_aborts() {
        let tmp = TempDir::new().unwrap();
        let err = composer(&tmp)
            .compose(&message(None, Some(r#"<img src="transfer://default/none.png">"#)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), CommsErrorKind::ResourceIo);
    }
}
