//! Purpose-built generation clients: email summary, reply draft, document
//! summary, document chat and image description.
//!
//! Each client owns its prompt and its input cap. Oversized input is
//! truncated with a visible marker rather than rejected, and failures are
//! returned as `LlmError`, never as text.

use std::borrow::Cow;
use std::sync::Arc;

use tracing::{info, warn};

use super::{ChatMessage, CompletionRequest, ImageMime, InlineImage, LlmProvider};
use crate::error::LlmError;

/// Input cap applied before submission, in characters.
pub const MAX_INPUT_CHARS: usize = 50_000;

/// Appended to truncated input.
pub const TRUNCATION_MARKER: &str = "... [content truncated]";

/// Keep the first `max_chars` characters and append the marker if anything was cut.
pub fn truncate_input(text: &str, max_chars: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => Cow::Owned(format!("{}{TRUNCATION_MARKER}", &text[..cut])),
        None => Cow::Borrowed(text),
    }
}

async fn run(
    llm: &dyn LlmProvider,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
) -> Result<String, LlmError> {
    let request = CompletionRequest::new(messages)
        .with_max_tokens(max_tokens)
        .with_temperature(temperature);
    send(llm, request).await
}

async fn send(llm: &dyn LlmProvider, request: CompletionRequest) -> Result<String, LlmError> {
    let response = llm.complete(request).await?;
    if response.content.is_empty() {
        return Err(LlmError::InvalidResponse {
            provider: llm.name().to_string(),
            reason: "empty completion".into(),
        });
    }
    info!(
        provider = llm.name(),
        input_tokens = response.input_tokens,
        output_tokens = response.output_tokens,
        "Generation complete"
    );
    Ok(response.content)
}

fn capped<'a>(label: &str, text: &'a str, max_chars: usize) -> Cow<'a, str> {
    let out = truncate_input(text, max_chars);
    if let Cow::Owned(_) = out {
        warn!(
            client = label,
            chars = text.chars().count(),
            max_chars,
            "Input too long, truncating"
        );
    }
    out
}

// ── Email summary ───────────────────────────────────────────────────────

/// Short factual summary of one email.
pub struct SummarizationClient {
    llm: Arc<dyn LlmProvider>,
    max_input_chars: usize,
}

impl SummarizationClient {
    pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 500;

    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            max_input_chars: MAX_INPUT_CHARS,
        }
    }

    pub fn with_max_input_chars(mut self, max_input_chars: usize) -> Self {
        self.max_input_chars = max_input_chars;
        self
    }

    /// The exact prompt submitted for `text`.
    pub fn prompt(&self, text: &str) -> String {
        let content = capped("summary", text, self.max_input_chars);
        format!(
            "Summarize the following email content in a concise and informative way.\n\
             Focus on the main points, key information, and any action items or requests.\n\
             Keep the summary short (5-10 sentences) and factual.\n\n\
             Email Content:\n{content}\n"
        )
    }

    pub async fn generate(&self, text: &str, max_output_tokens: u32) -> Result<String, LlmError> {
        let messages = vec![ChatMessage::user(self.prompt(text))];
        run(self.llm.as_ref(), messages, max_output_tokens, 0.2).await
    }
}

// ── Reply draft ─────────────────────────────────────────────────────────

/// Professional reply to one email.
pub struct ReplyDraftClient {
    llm: Arc<dyn LlmProvider>,
    max_input_chars: usize,
}

impl ReplyDraftClient {
    pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 2000;

    const SYSTEM_PROMPT: &'static str =
        "You are an email assistant that drafts professional replies.";

    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            max_input_chars: MAX_INPUT_CHARS,
        }
    }

    pub fn with_max_input_chars(mut self, max_input_chars: usize) -> Self {
        self.max_input_chars = max_input_chars;
        self
    }

    pub fn prompt(&self, text: &str) -> String {
        let content = capped("reply", text, self.max_input_chars);
        format!(
            "Based on the content of the email:\n{content}\n\n\
             Generate a professional and concise reply to this email. Do not repeat the \
             content of the email. Answer every question it asks, or analyze the content \
             and give a professional reply that actually helps the sender.\n"
        )
    }

    pub async fn generate(&self, text: &str, max_output_tokens: u32) -> Result<String, LlmError> {
        let messages = vec![
            ChatMessage::system(Self::SYSTEM_PROMPT),
            ChatMessage::user(self.prompt(text)),
        ];
        run(self.llm.as_ref(), messages, max_output_tokens, 0.6).await
    }
}

// ── Documents ───────────────────────────────────────────────────────────

/// Detailed document summary and question answering over a loaded document.
pub struct DocumentClient {
    llm: Arc<dyn LlmProvider>,
    max_input_chars: usize,
}

impl DocumentClient {
    pub const SUMMARY_MAX_OUTPUT_TOKENS: u32 = 20_000;
    pub const CHAT_MAX_OUTPUT_TOKENS: u32 = 2000;

    const SUMMARY_SYSTEM: &'static str = "You are a precise summarization assistant that creates \
        detailed, comprehensive summaries without omitting important information.";

    const CHAT_SYSTEM: &'static str = "You are a helpful assistant that answers questions based \
        on the provided document. Only answer questions based on the information in the \
        document. If the answer is not in the document, say so politely.";

    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            max_input_chars: MAX_INPUT_CHARS,
        }
    }

    pub fn with_max_input_chars(mut self, max_input_chars: usize) -> Self {
        self.max_input_chars = max_input_chars;
        self
    }

    pub async fn summarize(&self, document: &str) -> Result<String, LlmError> {
        let content = capped("document", document, self.max_input_chars);
        let prompt = format!(
            "Create a comprehensive, detailed summary of the following document.\n\
             Your summary should:\n\
             - Capture all key points, arguments, and conclusions\n\
             - Preserve important details, statistics, and evidence\n\
             - Maintain the logical flow and structure of the original document\n\
             - Include all relevant names, dates, and specific information\n\
             - Not omit any significant information from the original text\n\n\
             Document content:\n{content}\n"
        );
        let messages = vec![
            ChatMessage::system(Self::SUMMARY_SYSTEM),
            ChatMessage::user(prompt),
        ];
        run(self.llm.as_ref(), messages, Self::SUMMARY_MAX_OUTPUT_TOKENS, 0.2).await
    }

    /// Answer `question` from `document`, with prior turns as context.
    pub async fn chat(
        &self,
        document: &str,
        history: &[ChatMessage],
        question: &str,
    ) -> Result<String, LlmError> {
        let content = capped("chat", document, self.max_input_chars);
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(Self::CHAT_SYSTEM));
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::user(format!(
            "Here is the document content:\n\n{content}\n\n\
             Please answer the following question based only on the information in the \
             document: {question}"
        )));
        run(self.llm.as_ref(), messages, Self::CHAT_MAX_OUTPUT_TOKENS, 0.2).await
    }
}

// ── Images ──────────────────────────────────────────────────────────────

/// Describes the objects visible in an image.
pub struct ImageDescriptionClient {
    llm: Arc<dyn LlmProvider>,
}

impl ImageDescriptionClient {
    pub const MAX_OUTPUT_TOKENS: u32 = 1024;

    const PROMPT: &'static str = "Analyze this image and describe what objects you see. \
        Please provide a detailed description.";

    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// `image_base64` is the raw file content in standard base64. The MIME
    /// type sent alongside it comes from `file_name`'s extension.
    pub async fn describe(&self, file_name: &str, image_base64: String) -> Result<String, LlmError> {
        let image = InlineImage {
            mime: ImageMime::from_file_name(file_name),
            data: image_base64,
        };
        let request = CompletionRequest::new(vec![ChatMessage::user(Self::PROMPT)])
            .with_max_tokens(Self::MAX_OUTPUT_TOKENS)
            .with_temperature(0.2)
            .with_image(image);
        send(self.llm.as_ref(), request).await
    }
}
