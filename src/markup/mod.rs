//! Minimal HTML tag scanner.
//!
//! Finds start tags by name (ASCII case-insensitive) and parses their
//! attributes, reporting byte spans into the source so callers can splice
//! replacements without touching surrounding text. It is not an HTML parser:
//! comments, CDATA and scripts are not special-cased.

use std::ops::Range;

/// A start tag found in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag<'a> {
    /// Byte span of the whole tag, `<` through `>`.
    pub span: Range<usize>,
    /// True if the tag ends with `/>`.
    pub self_closing: bool,
    /// Attributes in source order.
    pub attributes: Vec<Attribute<'a>>,
}

impl<'a> Tag<'a> {
    /// Returns the first attribute with this name (ASCII case-insensitive).
    pub fn attribute(&self, name: &str) -> Option<&Attribute<'a>> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    /// Returns the value of a single- or double-quoted attribute.
    pub fn quoted_value(&self, name: &str) -> Option<&AttributeValue<'a>> {
        self.attribute(name)
            .and_then(|a| a.value.as_ref())
            .filter(|v| v.quote.is_some())
    }
}

/// A parsed attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute<'a> {
    /// Attribute name as written.
    pub name: &'a str,
    /// Value, absent for bare attributes such as `hidden`.
    pub value: Option<AttributeValue<'a>>,
}

/// An attribute value and where it sits in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeValue<'a> {
    /// Value text, without quotes.
    pub text: &'a str,
    /// Byte span of `text`.
    pub span: Range<usize>,
    /// Quote character, if the value was quoted.
    pub quote: Option<char>,
}

/// Iterator over the start tags with a given name.
#[derive(Debug, Clone)]
pub struct TagScanner<'a> {
    html: &'a str,
    name: &'a str,
    pos: usize,
}

/// Scans `html` for `<name ...>` tags in document order.
///
/// Malformed tags (unterminated, or with an unterminated quoted value) are
/// skipped and scanning resumes after their `<`.
pub fn tags<'a>(html: &'a str, name: &'a str) -> TagScanner<'a> {
    TagScanner { html, name, pos: 0 }
}

impl<'a> Iterator for TagScanner<'a> {
    type Item = Tag<'a>;

    fn next(&mut self) -> Option<Tag<'a>> {
        let bytes = self.html.as_bytes();
        while let Some(offset) = self.html[self.pos..].find('<') {
            let start = self.pos + offset;
            self.pos = start + 1;

            if !name_matches(bytes, start + 1, self.name) {
                continue;
            }

            if let Some(tag) = parse_tag(self.html, start, start + 1 + self.name.len()) {
                self.pos = tag.span.end;
                return Some(tag);
            }
        }
        self.pos = self.html.len();
        None
    }
}

fn name_matches(bytes: &[u8], at: usize, name: &str) -> bool {
    let end = at + name.len();
    if end >= bytes.len() {
        return false;
    }
    bytes[at..end].eq_ignore_ascii_case(name.as_bytes())
        && (bytes[end].is_ascii_whitespace() || bytes[end] == b'/' || bytes[end] == b'>')
}

fn is_name_byte(b: u8) -> bool {
    !(b.is_ascii_whitespace() || matches!(b, b'=' | b'>' | b'/' | b'"' | b'\'' | b'<'))
}

fn skip_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

fn parse_tag(html: &str, start: usize, mut i: usize) -> Option<Tag<'_>> {
    let bytes = html.as_bytes();
    let mut attributes = Vec::new();

    loop {
        i = skip_whitespace(bytes, i);
        match bytes.get(i)? {
            b'>' => {
                return Some(Tag {
                    span: start..i + 1,
                    self_closing: false,
                    attributes,
                })
            }
            b'/' if bytes.get(i + 1) == Some(&b'>') => {
                return Some(Tag {
                    span: start..i + 2,
                    self_closing: true,
                    attributes,
                })
            }
            b'/' => {
                i += 1;
                continue;
            }
            _ => {}
        }

        let name_start = i;
        while i < bytes.len() && is_name_byte(bytes[i]) {
            i += 1;
        }
        if i == name_start {
            return None;
        }
        let name = &html[name_start..i];

        i = skip_whitespace(bytes, i);
        if bytes.get(i) != Some(&b'=') {
            attributes.push(Attribute { name, value: None });
            continue;
        }
        i = skip_whitespace(bytes, i + 1);

        let value = match *bytes.get(i)? {
            quote @ (b'"' | b'\'') => {
                let value_start = i + 1;
                let len = html[value_start..].find(quote as char)?;
                i = value_start + len + 1;
                AttributeValue {
                    text: &html[value_start..value_start + len],
                    span: value_start..value_start + len,
                    quote: Some(quote as char),
                }
            }
            _ => {
                let value_start = i;
                while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                    i += 1;
                }
                AttributeValue {
                    text: &html[value_start..i],
                    span: value_start..i,
                    quote: None,
                }
            }
        };
        attributes.push(Attribute {
            name,
            value: Some(value),
        });
    }
}
