//! Message decoder: turns a provider payload into a `ParsedMessage`.
//!
//! Extraction order for the body:
//! 1. Direct body data on the top-level payload
//! 2. First non-attachment `text/plain` part (depth-first)
//! 3. First non-attachment `text/html` part (depth-first)
//!
//! Every byte-level decode is lossy UTF-8; a part that fails to decode is
//! logged and treated as missing. Only a structurally absent payload
//! makes the whole message undecodable.

pub mod header;

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use tracing::{debug, warn};

use crate::error::DecodeError;
use crate::mail::types::{MessagePart, RawMessage};
use crate::pipeline::types::ParsedMessage;

pub use header::decode_header_value;

/// Body text used when nothing readable was found.
pub const NO_CONTENT: &str = "No readable content found";
pub const UNKNOWN_SENDER: &str = "Unknown Sender";
pub const NO_SUBJECT: &str = "No Subject";

const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);

/// URL-safe alphabet, padding optional (provider body data).
pub(crate) const BASE64_URL_LENIENT: GeneralPurpose =
    GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

/// Decode a fetched message. Fails only when the payload is absent.
pub fn decode(raw: &RawMessage) -> Result<ParsedMessage, DecodeError> {
    let Some(payload) = raw.payload.as_ref() else {
        return Err(DecodeError::MissingPayload {
            message_id: raw.id.clone(),
        });
    };

    let sender = payload
        .header("From")
        .map(decode_header_value)
        .unwrap_or_else(|| UNKNOWN_SENDER.to_string());
    let subject = payload
        .header("Subject")
        .map(decode_header_value)
        .unwrap_or_else(|| NO_SUBJECT.to_string());

    let body = extract_body(&raw.id, payload).unwrap_or_else(|| {
        debug!(message_id = %raw.id, "No readable body");
        NO_CONTENT.to_string()
    });

    Ok(ParsedMessage {
        message_id: raw.id.clone(),
        sender,
        subject,
        body,
    })
}

fn extract_body(message_id: &str, payload: &MessagePart) -> Option<String> {
    if let Some(data) = payload.data()
        && let Some(text) = decode_body_data(message_id, data)
    {
        return Some(text);
    }

    find_part(&payload.parts, "text/plain")
        .into_iter()
        .chain(find_part(&payload.parts, "text/html"))
        .find_map(|part| part.data().and_then(|d| decode_body_data(message_id, d)))
}

/// Depth-first search for the first inline part of the given MIME type that carries data.
fn find_part<'a>(parts: &'a [MessagePart], mime: &str) -> Option<&'a MessagePart> {
    for part in parts {
        if part.is_attachment() {
            continue;
        }
        let matches = part
            .mime_type
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case(mime));
        if matches && part.data().is_some() {
            return Some(part);
        }
        if let Some(found) = find_part(&part.parts, mime) {
            return Some(found);
        }
    }
    None
}

/// Base64url → lossy UTF-8, trimmed. Empty or undecodable yields `None`.
fn decode_body_data(message_id: &str, data: &str) -> Option<String> {
    match BASE64_URL_LENIENT.decode(data.trim()) {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes).trim().to_string();
            (!text.is_empty()).then_some(text)
        }
        Err(e) => {
            warn!(message_id, error = %e, "Failed to decode body data");
            None
        }
    }
}
