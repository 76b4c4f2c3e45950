//! Inline image extraction.
//!
//! Collects the distinct `src` URLs of `<img>` tags and rewrites them to
//! `cid:N` references. Only quoted `src` attribute values are rewritten, so
//! the same URL appearing in text or in other attributes is left alone.

use std::collections::{HashMap, HashSet};

use crate::markup;
use crate::types::ImageReference;

/// Rewrites image sources to content-ID references.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageEmbedder;

impl ImageEmbedder {
    /// Creates an embedder.
    pub fn new() -> Self {
        Self
    }

    /// Returns the rewritten HTML and the images to embed.
    ///
    /// Content IDs start at 0 and follow first-occurrence order. Every
    /// occurrence of a URL gets the same ID. Empty sources and sources that
    /// are already `cid:` references are not touched, and numeric IDs they
    /// already use are skipped.
    pub fn extract_and_rewrite(&self, html: &str) -> (String, Vec<ImageReference>) {
        let taken: HashSet<usize> = markup::tags(html, "img")
            .filter_map(|tag| tag.quoted_value("src").map(|src| src.text))
            .filter(|src| is_cid(src))
            .filter_map(|src| src[4..].parse().ok())
            .collect();

        let mut images: Vec<ImageReference> = Vec::new();
        let mut by_url: HashMap<&str, usize> = HashMap::new();
        let mut next_id = 0;
        let mut rewritten = String::with_capacity(html.len());
        let mut copied = 0;

        for tag in markup::tags(html, "img") {
            let Some(src) = tag.quoted_value("src") else {
                continue;
            };
            if src.text.is_empty() || is_cid(src.text) {
                continue;
            }

            let index = *by_url.entry(src.text).or_insert_with(|| {
                while taken.contains(&next_id) {
                    next_id += 1;
                }
                images.push(ImageReference::new(src.text, next_id));
                next_id += 1;
                images.len() - 1
            });

            rewritten.push_str(&html[copied..src.span.start]);
            rewritten.push_str(&images[index].cid_reference());
            copied = src.span.end;
        }
        rewritten.push_str(&html[copied..]);

        #[cfg(feature = "tracing")]
        if !images.is_empty() {
            tracing::debug!(images = images.len(), "Rewrote image sources to content IDs");
        }

        (rewritten, images)
    }
}

fn is_cid(src: &str) -> bool {
    src.get(..4).is_some_and(|scheme| scheme.eq_ignore_ascii_case("cid:"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedupes_in_first_occurrence_order() {
        let html = concat!(
            r#"<img src="https://cdn.dilatush.com/logo.png">"#,
            r#"<p>text</p><IMG alt="x" SRC='transfer://default/chart.png'/>"#,
            r#"<img src="https://cdn.dilatush.com/logo.png" />"#,
        );

        let (rewritten, images) = ImageEmbedder::new().extract_and_rewrite(html);

        assert_eq!(
            images,
            vec![
                ImageReference::new("https://cdn.dilatush.com/logo.png", 0),
                ImageReference::new("transfer://default/chart.png", 1),
            ]
        );
        assert_eq!(
            rewritten,
            concat!(
                r#"<img src="cid:0">"#,
                r#"<p>text</p><IMG alt="x" SRC='cid:1'/>"#,
                r#"<img src="cid:0" />"#,
            )
        );
    }

    #[test]
    fn test_only_src_values_rewritten() {
        let html = r#"<a href="a.png">a.png</a><img title="a.png" src="a.png">"#;
        let (rewritten, images) = ImageEmbedder::new().extract_and_rewrite(html);
        assert_eq!(images.len(), 1);
        assert_eq!(rewritten, r#"<a href="a.png">a.png</a><img title="a.png" src="cid:0">"#);
    }

    #[test]
    fn test_existing_cid_numbers_not_reused() {
        let html = r#"<img src="cid:0"><img src="a.png"><img src="cid:2"><img src="b.png"><img src="c.png">"#;
        let (rewritten, images) = ImageEmbedder::new().extract_and_rewrite(html);

        let ids: Vec<usize> = images.iter().map(|i| i.content_id).collect();
        assert_eq!(ids, [1, 3, 4]);
        assert_eq!(
            rewritten,
            r#"<img src="cid:0"><img src="cid:1"><img src="cid:2"><img src="cid:3"><img src="cid:4">"#
        );
    }

    #[test]
    fn test_skips_empty_and_cid_sources() {
        let html = r#"<img src=""><img src="CID:7"><img src=logo.png><img>"#;
        let (rewritten, images) = ImageEmbedder::new().extract_and_rewrite(html);
        assert!(images.is_empty());
        assert_eq!(rewritten, html);
    }
}
