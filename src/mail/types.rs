//! Mail provider payload types and the authenticated session handle.

use chrono::{Days, Local, NaiveDate};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Authenticated handle to one mailbox.
#[derive(Debug, Clone)]
pub struct MailSession {
    pub access_token: SecretString,
    /// Mailbox address, used as the `From` of replies.
    pub account: String,
}

/// Reference to a listed message, as returned by the list endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
}

impl MessageRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            thread_id: None,
        }
    }
}

/// Full provider payload for one message. Immutable once fetched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub payload: Option<MessagePart>,
}

/// One node of the MIME tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub part_id: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

impl MessagePart {
    /// First header with the given name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Whether this part is an attachment rather than inline content.
    pub fn is_attachment(&self) -> bool {
        if self.filename.as_deref().is_some_and(|f| !f.is_empty()) {
            return true;
        }
        if self.body.as_ref().is_some_and(|b| b.attachment_id.is_some()) {
            return true;
        }
        self.header("Content-Disposition")
            .is_some_and(|d| d.to_ascii_lowercase().contains("attachment"))
    }

    /// Encoded body data, if inline.
    pub fn data(&self) -> Option<&str> {
        self.body.as_ref().and_then(|b| b.data.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartBody {
    #[serde(default)]
    pub attachment_id: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    /// Base64url-encoded content.
    #[serde(default)]
    pub data: Option<String>,
}

/// A single local calendar day: `[start 00:00, next day 00:00)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRange {
    pub start: NaiveDate,
}

impl DayRange {
    pub fn today() -> Self {
        Self::for_date(Local::now().date_naive())
    }

    pub fn for_date(start: NaiveDate) -> Self {
        Self { start }
    }

    /// Exclusive upper bound.
    pub fn end(&self) -> NaiveDate {
        self.start
            .checked_add_days(Days::new(1))
            .unwrap_or(self.start)
    }

    /// Provider search query scoped to unread mail inside this day.
    pub fn unread_query(&self) -> String {
        format!(
            "is:unread after:{} before:{}",
            self.start.format("%Y/%m/%d"),
            self.end().format("%Y/%m/%d")
        )
    }
}

/// Reply handed to the transport for sending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingReply {
    pub original_message_id: String,
    pub to_email: String,
    pub subject: String,
    pub body: String,
}
