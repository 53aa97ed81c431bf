//! Reply composition: subject prefixing and RFC 5322 message construction.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use lettre::Message;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;

use super::types::OutgoingReply;
use crate::error::TransportError;

/// Prefix `Re: ` unless the subject already carries a reply prefix (any case).
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    let already = trimmed
        .get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("re:"));
    if already {
        trimmed.to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

/// Parse `Name <addr>` or a bare address. Falls back to the angle-bracket
/// address when the display name is not representable.
pub fn parse_mailbox(input: &str) -> Result<Mailbox, TransportError> {
    if let Ok(mailbox) = input.trim().parse::<Mailbox>() {
        return Ok(mailbox);
    }
    let inner = input
        .rfind('<')
        .and_then(|start| input[start + 1..].find('>').map(|end| &input[start + 1..start + 1 + end]))
        .unwrap_or(input)
        .trim();
    inner
        .parse::<Mailbox>()
        .map_err(|e| TransportError::Compose(format!("invalid address '{input}': {e}")))
}

/// Build the outgoing reply as raw RFC 5322 bytes.
///
/// `in_reply_to` is the original `Message-ID` header, when known, so the
/// reply threads in other clients too.
pub fn build_reply_message(
    from: &str,
    reply: &OutgoingReply,
    in_reply_to: Option<&str>,
) -> Result<Vec<u8>, TransportError> {
    let mut builder = Message::builder()
        .from(parse_mailbox(from)?)
        .to(parse_mailbox(&reply.to_email)?)
        .subject(reply_subject(&reply.subject))
        .header(ContentType::TEXT_PLAIN);

    if let Some(id) = in_reply_to.filter(|id| !id.trim().is_empty()) {
        builder = builder
            .in_reply_to(id.trim().to_string())
            .references(id.trim().to_string());
    }

    let message = builder
        .body(reply.body.clone())
        .map_err(|e| TransportError::Compose(e.to_string()))?;
    Ok(message.formatted())
}

/// Base64url encoding expected by the provider's `raw` field.
pub fn encode_raw(message: &[u8]) -> String {
    URL_SAFE.encode(message)
}
