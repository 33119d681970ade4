//! RFC 5322 header parsing: header block splitting, folding, and RFC 2047
//! encoded-word decoding.

use tracing::warn;

/// Find the byte offset where headers end (position of the first blank line).
pub fn find_header_end(data: &[u8]) -> Option<usize> {
    for i in 0..data.len().saturating_sub(1) {
        if data[i] == b'\n' && data[i + 1] == b'\n' {
            return Some(i);
        }
        if data[i..].starts_with(b"\r\n\r\n") {
            return Some(i);
        }
    }
    None
}

/// Split a raw header block into `(lowercase_name, raw_value)` pairs.
///
/// Values are unfolded but encoded-words are left intact.
pub fn parse_header_block(raw_headers: &[u8]) -> Vec<(String, String)> {
    unfold_headers(&decode_header_bytes(raw_headers))
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
fn decode_header_bytes(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Join continuation lines (starting with space or tab) onto the previous header.
fn unfold_headers(text: &str) -> Vec<(String, String)> {
    let mut result: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = result.last_mut() {
                last.1.push(' ');
                last.1.push_str(line.trim());
            }
        } else if let Some(colon_pos) = line.find(':') {
            let name = line[..colon_pos].trim().to_lowercase();
            let value = line[colon_pos + 1..].trim().to_string();
            result.push((name, value));
        }
        // mbox "From " separators and other junk lines are skipped
    }

    result
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// Whitespace between two adjacent encoded-words is dropped when both share a
/// charset (RFC 2047 §6.2). Adjacent words in *different* charsets are always
/// separated by exactly one space, so `=?utf-8?q?test?= =?iso-8859-1?q?cr=E9ation?=`
/// decodes to `"test création"`.
///
/// A token that does not decode is kept verbatim.
pub fn decode_encoded_words(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut remaining = input;
    let mut last_charset: Option<String> = None;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        let after_start = &remaining[start + 2..];

        match try_decode_one_word(after_start) {
            Some(word) => {
                match &last_charset {
                    Some(prev) if before.trim().is_empty() => {
                        if !prev.eq_ignore_ascii_case(&word.charset) {
                            result.push(' ');
                        }
                    }
                    _ => result.push_str(before),
                }
                result.push_str(&word.text);
                remaining = &after_start[word.consumed..];
                last_charset = Some(word.charset);
            }
            None => {
                result.push_str(before);
                result.push_str("=?");
                remaining = after_start;
                last_charset = None;
            }
        }
    }

    result.push_str(remaining);
    result
}

struct DecodedWord {
    charset: String,
    text: String,
    /// Bytes consumed from the string *after* the initial `=?`.
    consumed: usize,
}

fn try_decode_one_word(s: &str) -> Option<DecodedWord> {
    // charset?encoding?encoded_text?=
    let first_q = s.find('?')?;
    let charset = &s[..first_q];
    if charset.is_empty() || charset.contains(char::is_whitespace) {
        return None;
    }

    let rest = &s[first_q + 1..];
    let second_q = rest.find('?')?;
    let encoding = &rest[..second_q];

    let rest2 = &rest[second_q + 1..];
    let end = rest2.find("?=")?;
    let encoded_text = &rest2[..end];

    let bytes = match encoding {
        "B" | "b" => decode_base64(encoded_text)?,
        "Q" | "q" => decode_q_encoding(encoded_text),
        _ => return None,
    };

    // RFC 2231 language suffix: charset*lang
    let charset = charset.split('*').next().unwrap_or(charset);

    Some(DecodedWord {
        charset: charset.to_string(),
        text: decode_charset(charset, &bytes),
        consumed: first_q + 1 + second_q + 1 + end + 2,
    })
}

/// Decode standard base64, ignoring whitespace. Returns `None` on an
/// invalid symbol.
fn decode_base64(input: &str) -> Option<Vec<u8>> {
    fn value(c: u8) -> Option<u32> {
        match c {
            b'A'..=b'Z' => Some(u32::from(c - b'A')),
            b'a'..=b'z' => Some(u32::from(c - b'a') + 26),
            b'0'..=b'9' => Some(u32::from(c - b'0') + 52),
            b'+' => Some(62),
            b'/' => Some(63),
            _ => None,
        }
    }

    let mut out = Vec::with_capacity(input.len() * 3 / 4);
    let mut acc: u32 = 0;
    let mut bits = 0;
    for &b in input.as_bytes() {
        if b == b'=' {
            break;
        }
        if b.is_ascii_whitespace() {
            continue;
        }
        acc = (acc << 6) | value(b)?;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
            acc &= (1 << bits) - 1;
        }
    }
    Some(out)
}

/// Decode Q-encoding (RFC 2047): underscores become spaces, `=XX` a byte.
fn decode_q_encoding(input: &str) -> Vec<u8> {
    let mut result = Vec::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        result.push(byte);
                        i += 3;
                    }
                    None => {
                        result.push(b'=');
                        i += 1;
                    }
                }
            }
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    result
}

/// Decode bytes using a named charset. Unknown charsets fall back to lossy UTF-8.
pub fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    let charset_lower = charset.to_lowercase();
    match charset_lower.as_str() {
        "utf-8" | "utf8" => String::from_utf8_lossy(bytes).into_owned(),
        _ => {
            if let Some(encoding) = encoding_rs::Encoding::for_label(charset.as_bytes()) {
                let (decoded, _, _) = encoding.decode(bytes);
                decoded.into_owned()
            } else {
                warn!(
                    charset = charset,
                    "Unknown charset, falling back to UTF-8 lossy"
                );
                String::from_utf8_lossy(bytes).into_owned()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64_encoded_word() {
        let input = "=?UTF-8?B?SG9sYSBtdW5kbw==?=";
        assert_eq!(decode_encoded_words(input), "Hola mundo");
    }

    #[test]
    fn test_decode_q_encoded_word() {
        let input = "=?ISO-8859-1?Q?caf=E9?=";
        assert_eq!(decode_encoded_words(input), "café");
    }

    #[test]
    fn test_same_charset_words_are_joined() {
        let input = "=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?=";
        assert_eq!(decode_encoded_words(input), "Hola mundo");
    }

    #[test]
    fn test_different_charset_words_keep_one_space() {
        let input = "=?utf-8?q?test?= =?iso-8859-1?q?cr=E9ation?=";
        assert_eq!(decode_encoded_words(input), "test création");

        let folded = "=?utf-8?q?test?=\t  =?iso-8859-1?q?cr=E9ation?=";
        assert_eq!(decode_encoded_words(folded), "test création");
    }

    #[test]
    fn test_decode_mixed_plain_and_encoded() {
        let input = "Re: =?UTF-8?B?SG9sYQ==?= there";
        assert_eq!(decode_encoded_words(input), "Re: Hola there");
    }

    #[test]
    fn test_invalid_word_is_kept() {
        assert_eq!(decode_encoded_words("=?UTF-8?X?abc?="), "=?UTF-8?X?abc?=");
        assert_eq!(decode_encoded_words("a =? b"), "a =? b");
    }

    #[test]
    fn test_decode_windows1252_encoded_word() {
        let input = "=?Windows-1252?Q?M=FCller?=";
        assert_eq!(decode_encoded_words(input), "Müller");
    }

    #[test]
    fn test_decode_utf8_base64_japanese() {
        // 山田太郎
        let input = "=?UTF-8?B?5bGx55Sw5aSq6YOO?=";
        assert_eq!(decode_encoded_words(input), "山田太郎");
    }

    #[test]
    fn test_unfold_headers() {
        let text = "Subject: This is a long\n\tsubject line\nFrom: user@example.com\n";
        let headers = unfold_headers(text);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].0, "subject");
        assert_eq!(headers[0].1, "This is a long subject line");
    }

    #[test]
    fn test_find_header_end() {
        let data = b"From: a@b.com\nSubject: Hi\n\nBody\n";
        assert_eq!(find_header_end(data), Some(25));

        let data = b"From: a@b.com\r\nSubject: Hi\r\n\r\nBody\r\n";
        assert_eq!(find_header_end(data), Some(26));

        assert_eq!(find_header_end(b"Subject: no body"), None);
    }

    #[test]
    fn test_latin1_header_bytes() {
        let headers = parse_header_block(b"Subject: caf\xe9\n");
        assert_eq!(headers[0].1, "café");
    }
}
