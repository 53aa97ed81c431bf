//! Mistral backend via rig: reply drafts and document summary/chat.

use std::sync::Arc;

use rig::client::CompletionClient;
use rig::providers::mistral;
use secrecy::{ExposeSecret, SecretString};

use super::{LlmProvider, RigAdapter};
use crate::error::LlmError;

pub const PROVIDER: &str = "mistral";

fn client_error(e: impl std::fmt::Display) -> LlmError {
    LlmError::RequestFailed {
        provider: PROVIDER.into(),
        reason: format!("Failed to create Mistral client: {e}"),
    }
}

/// Build a Mistral provider. `base_url` replaces the public API root.
pub fn mistral_provider(
    api_key: &SecretString,
    model: &str,
    base_url: Option<&str>,
) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider: Arc<dyn LlmProvider> = match base_url {
        None => {
            let client: mistral::Client = mistral::Client::new(api_key.expose_secret()).map_err(client_error)?;
            Arc::new(RigAdapter::new(PROVIDER, client.completion_model(model), model))
        }
        Some(base_url) => {
            let client: mistral::Client = mistral::Client::builder()
                .api_key(api_key.expose_secret())
                .base_url(base_url)
                .build()
                .map_err(client_error)?;
            Arc::new(RigAdapter::new(PROVIDER, client.completion_model(model), model))
        }
    };
    tracing::info!("Using Mistral (model: {model})");
    Ok(provider)
}
