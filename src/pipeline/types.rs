//! Shared types for the retrieval-and-reply pipeline.

use serde::{Deserialize, Serialize};

// ── Messages ────────────────────────────────────────────────────────

/// Decoded view of one fetched message. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedMessage {
    pub message_id: String,
    /// Decoded `From` header, or "Unknown Sender".
    pub sender: String,
    /// Decoded `Subject` header, or "No Subject".
    pub subject: String,
    /// Best-effort text: plain, then HTML, then the no-content sentinel.
    pub body: String,
}

impl ParsedMessage {
    /// Text handed to the generation clients.
    pub fn prompt_content(&self) -> String {
        format!(
            "Subject: {}\nFrom: {}\nBody: {}",
            self.subject, self.sender, self.body
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryResult {
    pub message_id: String,
    pub sender: String,
    pub subject: String,
    pub summary_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyDraft {
    pub message_id: String,
    pub to_email: String,
    pub subject: String,
    pub draft_text: String,
}

/// Result record emitted for each processed message. At least one of
/// `summary` and `draft` is present; `errors` says why the other is not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailDigest {
    pub summary: Option<SummaryResult>,
    pub draft: Option<ReplyDraft>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl EmailDigest {
    pub fn is_complete(&self) -> bool {
        self.summary.is_some() && self.draft.is_some()
    }
}

/// Result of a send attempt. Ephemeral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    pub success: bool,
    pub detail: String,
}

impl SendOutcome {
    pub fn sent(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
        }
    }
}

// ── Batch state ─────────────────────────────────────────────────────

/// Lifecycle of one fetch batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BatchState {
    Idle,
    Authenticating,
    Listing,
    Processing { current: usize, total: usize },
    Completed { processed: usize, total: usize },
    Failed { reason: String },
}

impl BatchState {
    /// True while a batch holds the single-flight slot.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Authenticating | Self::Listing | Self::Processing { .. }
        )
    }
}

/// Progress and result events, in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    Status { message: String },
    /// `current` is 1-based and monotonically increasing.
    Progress { current: usize, total: usize },
    EmailSummary { data: EmailDigest },
    Error { message: String },
    Completed { success: bool, message: String },
}

impl PipelineEvent {
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Progress { .. } => "progress",
            Self::EmailSummary { .. } => "email_summary",
            Self::Error { .. } => "error",
            Self::Completed { .. } => "completed",
        }
    }
}

/// Final accounting for a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub total: usize,
    /// Messages that produced a digest, partial ones included.
    pub processed: usize,
    /// Digests missing their summary or their draft.
    pub partial: usize,
    pub failed: usize,
    pub digests: Vec<EmailDigest>,
}
