//! Mailbox access: authentication, listing, fetching, flag changes and
//! reply sending.

pub mod gmail;
pub mod oauth;
pub mod reply;
pub mod types;

use async_trait::async_trait;

pub use gmail::GmailTransport;
pub use oauth::{OAuthManager, TokenSource};
pub use types::{DayRange, MailSession, MessagePart, MessageRef, OutgoingReply, RawMessage};

use crate::error::{AuthError, TransportError};
use crate::pipeline::types::SendOutcome;

/// Operations the pipeline needs from a mail provider.
///
/// Implementations must be shareable across tasks; every call carries the
/// session explicitly so a transport holds no per-batch state.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Obtain a valid session, refreshing or granting credentials as needed.
    async fn authenticate(&self) -> Result<MailSession, AuthError>;

    /// Unread inbox messages inside `range`, newest first, at most `max_results`.
    async fn list_unread(
        &self,
        session: &MailSession,
        range: DayRange,
        max_results: u32,
    ) -> Result<Vec<MessageRef>, TransportError>;

    async fn fetch_full(
        &self,
        session: &MailSession,
        message: &MessageRef,
    ) -> Result<RawMessage, TransportError>;

    /// Clear the unread flag.
    async fn mark_read(&self, session: &MailSession, message_id: &str)
    -> Result<(), TransportError>;

    /// Send a reply threaded onto the original. Failures are reported in the
    /// outcome, never raised.
    async fn send_reply(&self, session: &MailSession, reply: &OutgoingReply) -> SendOutcome;
}
