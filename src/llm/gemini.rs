//! Gemini backend via rig: email summaries and image descriptions.

use std::sync::Arc;

use rig::client::CompletionClient;
use rig::providers::gemini;
use secrecy::{ExposeSecret, SecretString};

use super::{LlmProvider, RigAdapter};
use crate::error::LlmError;

pub const PROVIDER: &str = "gemini";

fn client_error(e: impl std::fmt::Display) -> LlmError {
    LlmError::RequestFailed {
        provider: PROVIDER.into(),
        reason: format!("Failed to create Gemini client: {e}"),
    }
}

/// Build a Gemini provider. `base_url` replaces the public API root.
pub fn gemini_provider(
    api_key: &SecretString,
    model: &str,
    base_url: Option<&str>,
) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider: Arc<dyn LlmProvider> = match base_url {
        None => {
            let client = gemini::Client::new(api_key.expose_secret()).map_err(client_error)?;
            Arc::new(RigAdapter::new(PROVIDER, client.completion_model(model), model))
        }
        Some(base_url) => {
            let client = gemini::Client::builder()
                .api_key(api_key.expose_secret())
                .base_url(base_url)
                .build()
                .map_err(client_error)?;
            Arc::new(RigAdapter::new(PROVIDER, client.completion_model(model), model))
        }
    };
    tracing::info!("Using Gemini (model: {model})");
    Ok(provider)
}
