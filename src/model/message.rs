//! Message identifiers and the parsed, read-only message handed to callbacks.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::parser::{header, mime};

/// Store-assigned message identifier (IMAP UID or sequence number, Maildir
/// sequence). Unique within a mailbox at a point in time only.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MessageId(pub u32);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for MessageId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// A message as seen by the rule engine.
///
/// Headers are kept raw (unfolded but not decoded) so the field extractor can
/// apply its own encoded-word handling. The body is the first plain-text,
/// non-attachment MIME part, resolved once at parse time.
#[derive(Debug, Clone)]
pub struct Message {
    raw: Vec<u8>,
    content: Option<Content>,
}

#[derive(Debug, Clone)]
struct Content {
    /// `(lowercase_name, raw_value)` in header order.
    headers: Vec<(String, String)>,
    body: String,
}

impl Message {
    /// Parse raw RFC 5322 bytes.
    ///
    /// Input that is not a structured message yields a placeholder whose
    /// every field lookup is absent.
    pub fn parse(raw: impl Into<Vec<u8>>) -> Self {
        let raw = raw.into();
        let content = mime::first_plain_text(&raw).map(|body| {
            let header_end = header::find_header_end(&raw).unwrap_or(raw.len());
            Content {
                headers: header::parse_header_block(&raw[..header_end]),
                body,
            }
        });
        Self { raw, content }
    }

    /// A message with no structure at all: every field is absent.
    pub fn placeholder() -> Self {
        Self {
            raw: Vec::new(),
            content: None,
        }
    }

    /// Whether the input parsed as a structured message.
    pub fn is_structured(&self) -> bool {
        self.content.is_some()
    }

    /// The bytes this message was parsed from.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// First raw (undecoded) value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.content.as_ref().and_then(|c| {
            c.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        })
    }

    /// Every raw value of a header, in message order.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.content
            .iter()
            .flat_map(|c| c.headers.iter())
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Plain-text body; empty when the message has no qualifying part,
    /// `None` only for a placeholder.
    pub fn body(&self) -> Option<&str> {
        self.content.as_ref().map(|c| c.body.as_str())
    }
}
