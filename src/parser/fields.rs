//! Field extraction: resolve a rule field name to the decoded text of a message.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MailbotError;
use crate::model::message::Message;
use crate::parser::header::decode_encoded_words;

/// A message field rules can match against.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Subject,
    From,
    To,
    Cc,
    Body,
}

impl Field {
    pub const ALL: [Field; 5] = [Field::Subject, Field::From, Field::To, Field::Cc, Field::Body];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Subject => "subject",
            Field::From => "from",
            Field::To => "to",
            Field::Cc => "cc",
            Field::Body => "body",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = MailbotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| MailbotError::UnknownField(s.to_string()))
    }
}

/// Return the decoded text of `field`, or `None` when the header is absent.
///
/// `body` is never absent on a structured message: a message with no
/// plain-text part has an empty body. On a placeholder every field is `None`.
pub fn extract(message: &Message, field: Field) -> Option<String> {
    match field {
        Field::Body => message.body().map(str::to_string),
        header => message.header(header.as_str()).map(decode_encoded_words),
    }
}
