//! MIME tree traversal: locate the plain-text body of a message.

use mail_parser::{MessageParser, MimeHeaders, PartType};

use crate::parser::header::decode_charset;

/// Return the body text of a raw message.
///
/// The body is the content of the first MIME part (depth-first, in message
/// order) whose content type is exactly `text/plain` and which has no
/// filename. A message without such a part has an empty body.
///
/// Returns `None` when the input does not parse as a message at all.
pub fn first_plain_text(raw_message: &[u8]) -> Option<String> {
    let parser = MessageParser::default();
    let msg = parser.parse(raw_message)?;

    let body = msg
        .parts
        .iter()
        .find(|part| is_plain_text_part(part))
        .map(|part| match &part.body {
            PartType::Text(text) => text.to_string(),
            PartType::Binary(bytes) | PartType::InlineBinary(bytes) => {
                decode_charset(part_charset(part), bytes)
            }
            _ => String::new(),
        })
        .unwrap_or_default();

    Some(body)
}

fn is_plain_text_part(part: &mail_parser::MessagePart<'_>) -> bool {
    if matches!(part.body, PartType::Multipart(_) | PartType::Message(_)) {
        return false;
    }
    if part.attachment_name().is_some() {
        return false;
    }
    // A part without Content-Type is text/plain (RFC 2045 §5.2)
    match part.content_type() {
        Some(ct) => {
            ct.ctype().eq_ignore_ascii_case("text")
                && ct
                    .subtype()
                    .is_some_and(|sub| sub.eq_ignore_ascii_case("plain"))
        }
        None => true,
    }
}

fn part_charset<'a>(part: &'a mail_parser::MessagePart<'_>) -> &'a str {
    part.content_type()
        .and_then(|ct| ct.attribute("charset"))
        .unwrap_or("us-ascii")
}
