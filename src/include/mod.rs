//! Include directive expansion.
//!
//! An HTML fragment may contain `<include-file src="REF"/>` directives. Each
//! one is replaced with the text of the referenced resource. The result is
//! scanned again so included fragments may include others. Passes and output
//! size are both bounded, so a self-referential include fails instead of
//! looping forever.

use crate::config::ComposeConfig;
use crate::errors::{CommsError, CommsErrorKind, CommsResult};
use crate::markup;
use crate::resolver::{PendingDeletes, ResourceResolver};

/// Tag name of the include directive.
pub const INCLUDE_TAG: &str = "include-file";

/// A piece of scanned HTML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Text copied through unchanged.
    Literal(&'a str),
    /// An include directive.
    Directive {
        /// The whole tag as written.
        tag: &'a str,
        /// The `src` reference.
        reference: &'a str,
    },
}

impl Segment<'_> {
    /// True for directives.
    pub fn is_directive(&self) -> bool {
        matches!(self, Segment::Directive { .. })
    }
}

/// Splits HTML into literal text and include directives, in document order.
///
/// A directive must be self-closing and carry a quoted `src` attribute. Tags
/// that fail either rule are kept as literal text.
pub fn tokenize(html: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut copied = 0;

    for tag in markup::tags(html, INCLUDE_TAG) {
        if !tag.self_closing {
            continue;
        }
        let Some(src) = tag.quoted_value("src") else {
            continue;
        };

        if tag.span.start > copied {
            segments.push(Segment::Literal(&html[copied..tag.span.start]));
        }
        segments.push(Segment::Directive {
            tag: &html[tag.span.clone()],
            reference: src.text,
        });
        copied = tag.span.end;
    }

    if copied < html.len() {
        segments.push(Segment::Literal(&html[copied..]));
    }
    segments
}

/// Expands include directives through a [`ResourceResolver`].
#[derive(Debug, Clone)]
pub struct IncludeExpander {
    resolver: ResourceResolver,
    max_passes: usize,
    max_size: usize,
}

/// Outcome of an expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    /// Fully expanded HTML.
    pub html: String,
    /// Directives replaced across all passes.
    pub includes: usize,
    /// Passes that replaced at least one directive.
    pub passes: usize,
}

impl IncludeExpander {
    /// Creates an expander with limits from `config`.
    pub fn new(resolver: ResourceResolver, config: &ComposeConfig) -> Self {
        Self {
            resolver,
            max_passes: config.max_include_passes,
            max_size: config.max_expanded_size,
        }
    }

    /// Expands every directive and returns the resulting HTML.
    ///
    /// HTML without directives is returned unchanged.
    pub async fn expand(&self, html: &str, pending: &mut PendingDeletes) -> CommsResult<String> {
        self.expand_counted(html, pending).await.map(|e| e.html)
    }

    /// Expands every directive, also reporting how much work was done.
    pub async fn expand_counted(&self, html: &str, pending: &mut PendingDeletes) -> CommsResult<Expansion> {
        let mut current = html.to_string();
        let mut passes = 0;
        let mut includes = 0;

        loop {
            let segments = tokenize(&current);
            if !segments.iter().any(Segment::is_directive) {
                return Ok(Expansion {
                    html: current,
                    includes,
                    passes,
                });
            }

            if passes >= self.max_passes {
                return Err(self.limit_exceeded(format!(
                    "Include directives remain after {} passes",
                    self.max_passes
                )));
            }
            passes += 1;

            let mut expanded = String::with_capacity(current.len());
            for segment in segments {
                match segment {
                    Segment::Literal(text) => expanded.push_str(text),
                    Segment::Directive { reference, .. } => {
                        let resource = self.resolver.resolve(reference).await?;
                        let text = resource.read_to_string(pending).await?;
                        expanded.push_str(&text);
                        includes += 1;
                    }
                }

                if expanded.len() > self.max_size {
                    return Err(self.limit_exceeded(format!(
                        "Expanded HTML exceeds {} bytes",
                        self.max_size
                    )));
                }
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(pass = passes, includes, size = expanded.len(), "Include pass complete");

            current = expanded;
        }
    }

    fn limit_exceeded(&self, message: String) -> CommsError {
        CommsError::new(CommsErrorKind::IncludeExpansionLimitExceeded, message)
    }
}
