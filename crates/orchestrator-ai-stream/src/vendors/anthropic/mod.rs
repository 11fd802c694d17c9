//! Anthropic messages backend.
mod normalizer;
mod wire;

use std::sync::Arc;

pub use normalizer::AnthropicNormalizer;

use crate::config::{HttpClientConfig, NormalizerOptions};
use crate::errors::HarnessError;
use crate::provider::Backend;
use crate::transport::HttpSseTransport;

pub(crate) const ANTHROPIC_PROVIDER: &str = "anthropic";

pub fn anthropic_backend(
    config: HttpClientConfig,
    options: NormalizerOptions,
) -> Result<Backend, HarnessError> {
    Ok(Backend::new(
        Arc::new(AnthropicNormalizer::new(options)),
        Arc::new(HttpSseTransport::new(ANTHROPIC_PROVIDER, config)?),
    ))
}

/// [`anthropic_backend`] configured from `ANTHROPIC_API_KEY` /
/// `ANTHROPIC_BASE_URL`.
pub fn anthropic_backend_from_env() -> Result<Backend, HarnessError> {
    anthropic_backend(
        HttpClientConfig::anthropic_from_env()?,
        NormalizerOptions::default(),
    )
}
