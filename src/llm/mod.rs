//! LLM integration for autoreply.
//!
//! A single OpenAI-compatible backend over reqwest, behind the
//! `LlmProvider` trait so the poller can be driven by a stub in tests.

pub mod openai;
pub mod provider;

pub use openai::OpenAiProvider;
pub use provider::*;

use std::sync::Arc;
use std::time::Duration;

use crate::error::LlmError;

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo-1106";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Upper bound for one completion request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: secrecy::SecretString,
    pub model: String,
    pub base_url: String,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = OpenAiProvider::new(
        config.api_key.clone(),
        &config.model,
        &config.base_url,
        REQUEST_TIMEOUT,
    )?;
    tracing::info!("Using OpenAI-compatible API at {} (model: {})", config.base_url, config.model);
    Ok(Arc::new(provider))
}
