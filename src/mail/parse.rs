//! Raw message → `InboundEmail`: sender heuristics and plain-text body extraction.

use mail_parser::{HeaderName, Message, MessageParser, MessagePart, MimeHeaders, PartType};
use tracing::warn;

use crate::error::ParseError;
use crate::mail::types::{InboundEmail, SenderInfo};

/// Parse the fields the reply path needs out of a raw RFC 822 message.
pub fn parse_message(raw: &[u8]) -> Result<InboundEmail, ParseError> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or(ParseError::Unparseable { len: raw.len() })?;

    let sender = parse_sender(message.header_raw(HeaderName::From).unwrap_or_default());
    let subject = message.subject().unwrap_or_default().to_string();
    let body = extract_body(&message);

    Ok(InboundEmail {
        sender,
        subject,
        body,
    })
}

/// Split a raw `From` header value into address and display name.
///
/// The last whitespace-separated token (angle brackets stripped) is the
/// address; the tokens before it, joined by single spaces, are the name.
/// Quoted names containing commas and RFC 2047 encoded words are passed
/// through untouched.
pub fn parse_sender(header_value: &str) -> SenderInfo {
    let tokens: Vec<&str> = header_value.split_whitespace().collect();
    let Some((last, name)) = tokens.split_last() else {
        warn!("Missing or empty From header");
        return SenderInfo::default();
    };

    SenderInfo {
        address: last.trim_matches(|c| c == '<' || c == '>').to_string(),
        display_name: name.join(" "),
    }
}

/// Return the first plain-text body of a message.
///
/// Multipart messages are scanned in document order for a `text/plain`
/// part, descending into attached `message/rfc822` parts; when there is
/// none the result is empty. Single-part messages return their decoded
/// payload whatever its type. Undecodable content yields an empty string.
pub fn extract_body(message: &Message<'_>) -> String {
    let Some(root) = message.parts.first() else {
        return String::new();
    };

    if !matches!(root.body, PartType::Multipart(_)) {
        return decode_part(root);
    }

    find_plain_text(message).map(decode_part).unwrap_or_default()
}

fn find_plain_text<'a, 'x>(message: &'a Message<'x>) -> Option<&'a MessagePart<'x>> {
    message.parts.iter().find_map(|part| match &part.body {
        PartType::Message(nested) => find_plain_text(nested),
        _ if is_plain_text(part) => Some(part),
        _ => None,
    })
}

fn is_plain_text(part: &MessagePart<'_>) -> bool {
    match part.content_type() {
        Some(ct) => {
            ct.ctype().eq_ignore_ascii_case("text")
                && ct.subtype().is_some_and(|s| s.eq_ignore_ascii_case("plain"))
        }
        // RFC 2045 default for body parts without a Content-Type.
        None => matches!(part.body, PartType::Text(_)),
    }
}

fn decode_part(part: &MessagePart<'_>) -> String {
    if part.is_encoding_problem {
        warn!("Could not decode message body");
        return String::new();
    }

    match &part.body {
        PartType::Text(text) | PartType::Html(text) => text.to_string(),
        PartType::Binary(bytes) | PartType::InlineBinary(bytes) => {
            match std::str::from_utf8(bytes) {
                Ok(text) => text.to_string(),
                Err(e) => {
                    warn!("Message body is not valid UTF-8: {e}");
                    String::new()
                }
            }
        }
        _ => String::new(),
    }
}
