//! Bridges rig's `CompletionModel` to our `LlmProvider` trait.
//!
//! System messages become the rig preamble, the last non-system message is
//! the prompt, and everything in between is chat history. An inline image
//! rides along with the prompt as a second content part.

use async_trait::async_trait;
use rig::OneOrMany;
use rig::completion::CompletionModel;
use rig::message::{AssistantContent, ImageMediaType, Message, UserContent};
use tracing::debug;

use super::{
    ChatMessage, CompletionRequest, CompletionResponse, ImageMime, InlineImage, LlmProvider, Role,
};
use crate::error::LlmError;

pub struct RigAdapter<M> {
    provider: &'static str,
    model: M,
    model_name: String,
}

impl<M> RigAdapter<M> {
    pub fn new(provider: &'static str, model: M, model_name: &str) -> Self {
        Self {
            provider,
            model,
            model_name: model_name.to_string(),
        }
    }
}

/// Split a flat message list into (preamble, history, prompt).
fn split_messages(
    messages: Vec<ChatMessage>,
) -> Option<(Option<String>, Vec<ChatMessage>, ChatMessage)> {
    let (system, mut turns): (Vec<_>, Vec<_>) =
        messages.into_iter().partition(|m| m.role == Role::System);
    let prompt = turns.pop()?;
    let preamble = (!system.is_empty()).then(|| {
        system
            .into_iter()
            .map(|m| m.content)
            .collect::<Vec<_>>()
            .join("\n\n")
    });
    Some((preamble, turns, prompt))
}

fn to_rig(message: ChatMessage) -> Message {
    match message.role {
        Role::Assistant => Message::assistant(message.content),
        Role::User | Role::System => Message::user(message.content),
    }
}

fn media_type(mime: ImageMime) -> ImageMediaType {
    match mime {
        ImageMime::Jpeg => ImageMediaType::JPEG,
        ImageMime::Png => ImageMediaType::PNG,
        ImageMime::Gif => ImageMediaType::GIF,
        ImageMime::Webp => ImageMediaType::WEBP,
    }
}

fn prompt_with_image(prompt: ChatMessage, image: InlineImage) -> Message {
    let mut content = OneOrMany::one(UserContent::text(prompt.content));
    content.push(UserContent::image_base64(
        image.data,
        Some(media_type(image.mime)),
        None,
    ));
    Message::User { content }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + 'static,
{
    fn name(&self) -> &str {
        self.provider
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let CompletionRequest {
            messages,
            max_tokens,
            temperature,
            image,
        } = request;
        let (preamble, history, prompt) =
            split_messages(messages).ok_or_else(|| LlmError::RequestFailed {
                provider: self.provider.into(),
                reason: "request has no prompt message".into(),
            })?;

        let prompt = match image {
            Some(image) => prompt_with_image(prompt, image),
            None => to_rig(prompt),
        };

        let mut builder = self
            .model
            .completion_request(prompt)
            .messages(history.into_iter().map(to_rig).collect())
            .temperature(f64::from(temperature))
            .max_tokens(u64::from(max_tokens));
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }

        debug!(provider = self.provider, model = %self.model_name, "Sending completion request");
        let response = builder.send().await.map_err(|e| LlmError::RequestFailed {
            provider: self.provider.into(),
            reason: e.to_string(),
        })?;

        let content: String = response
            .choice
            .iter()
            .filter_map(|part| match part {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect();

        Ok(CompletionResponse {
            content: content.trim().to_string(),
            input_tokens: u32::try_from(response.usage.input_tokens).unwrap_or(u32::MAX),
            output_tokens: u32::try_from(response.usage.output_tokens).unwrap_or(u32::MAX),
        })
    }
}
