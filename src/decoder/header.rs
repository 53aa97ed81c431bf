//! RFC 2047 encoded-word decoding for header values.
//!
//! Values are run through mail-parser's unstructured header parser, which
//! decodes each `=?charset?B|Q?payload?=` word with its declared charset
//! and joins adjacent encoded words without the whitespace between them.
//! Undecodable words stay verbatim; unknown charsets degrade to lossy UTF-8.

use mail_parser::parsers::MessageStream;
use tracing::debug;

/// Decode a full header value to display text.
pub fn decode_header_value(value: &str) -> String {
    if !value.contains("=?") {
        return value.trim().to_string();
    }

    // The parser stops at the first unfolded line break.
    let mut line: String = value
        .chars()
        .map(|c| if matches!(c, '\r' | '\n') { ' ' } else { c })
        .collect();
    line.push('\n');

    match MessageStream::new(line.as_bytes()).parse_unstructured().into_text() {
        Some(text) => text.into_owned(),
        None => {
            debug!(value, "Header value produced no text");
            value.trim().to_string()
        }
    }
}
