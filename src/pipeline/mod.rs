//! Email retrieval-and-reply pipeline.
//!
//! A batch flows through:
//! 1. `MailTransport::authenticate()` and `list_unread()` for today
//! 2. per message: fetch, mark read (per `MarkReadPolicy`), decode
//! 3. `SummarizationClient` then `ReplyDraftClient`
//! 4. one `EmailSummary` event per message that made it through
//!
//! Nothing is sent automatically. Replies leave only through
//! `Orchestrator::send_reply`, with text the user has reviewed.

pub mod orchestrator;
pub mod scheduler;
pub mod types;

pub use orchestrator::{BatchPermit, Orchestrator};
pub use scheduler::spawn_recurring_fetch;
pub use types::{BatchReport, BatchState, EmailDigest, ParsedMessage, PipelineEvent, SendOutcome};
