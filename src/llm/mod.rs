//! LLM integration for Mail Assist.
//!
//! Supports:
//! - **Gemini**: email summarization and image description
//! - **Mistral**: reply drafting and document summary/chat
//!
//! Uses the rig-core crate for HTTP transport and the `RigAdapter` to bridge
//! rig's `CompletionModel` trait to our `LlmProvider` trait. The
//! purpose-built clients in `generate` hold the prompts and input limits.

pub mod gemini;
pub mod generate;
pub mod mistral;
mod rig_adapter;

pub use gemini::gemini_provider;
pub use generate::{
    DocumentClient, ImageDescriptionClient, ReplyDraftClient, SummarizationClient, truncate_input,
};
pub use mistral::mistral_provider;
pub use rig_adapter::RigAdapter;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::error::LlmError;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Image formats accepted for inline image input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMime {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl ImageMime {
    /// Infer from a file extension. Anything unrecognized is sent as JPEG.
    pub fn from_file_name(name: &str) -> Self {
        let ext = std::path::Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("png") => Self::Png,
            Some("gif") => Self::Gif,
            Some("webp") => Self::Webp,
            _ => Self::Jpeg,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
        }
    }
}

/// Base64 image attached to the prompt message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime: ImageMime,
    /// Standard base64, no data-URL prefix.
    pub data: String,
}

/// One completion call: a prompt plus sampling parameters.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub image: Option<InlineImage>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            max_tokens: 1024,
            temperature: 0.2,
            image: None,
        }
    }

    pub fn with_image(mut self, image: InlineImage) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Plain-text completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A generative-text provider. One attempt per call, no retries.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logs and errors.
    fn name(&self) -> &str;

    fn model_name(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Gemini,
    Mistral,
}

impl LlmBackend {
    fn name(self) -> &'static str {
        match self {
            Self::Gemini => gemini::PROVIDER,
            Self::Mistral => mistral::PROVIDER,
        }
    }
}

/// Stands in for a provider whose API key is not configured.
struct Unconfigured {
    backend: LlmBackend,
    model: String,
}

#[async_trait]
impl LlmProvider for Unconfigured {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        Err(LlmError::MissingApiKey {
            provider: self.backend.name().into(),
        })
    }
}

/// Create an LLM provider from configuration.
///
/// A missing API key still yields a provider; every call then fails with
/// `LlmError::MissingApiKey`.
pub fn create_provider(
    backend: LlmBackend,
    config: &ProviderConfig,
) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let Some(api_key) = config.api_key.as_ref() else {
        tracing::debug!(provider = backend.name(), "No API key, provider disabled");
        return Ok(Arc::new(Unconfigured {
            backend,
            model: config.model.clone(),
        }));
    };
    let base_url = config.base_url.as_deref();
    match backend {
        LlmBackend::Gemini => gemini_provider(api_key, &config.model, base_url),
        LlmBackend::Mistral => mistral_provider(api_key, &config.model, base_url),
    }
}
