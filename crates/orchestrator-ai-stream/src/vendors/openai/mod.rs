//! OpenAI-compatible chat-completions backend.
//!
//! Covers OpenAI itself and the many gateways that speak the same streaming
//! dialect (register those under their own id with
//! [`OpenAiChatNormalizer::with_id`]).
mod normalizer;
mod wire;

use std::sync::Arc;

pub use normalizer::OpenAiChatNormalizer;

use crate::config::{HttpClientConfig, NormalizerOptions};
use crate::errors::HarnessError;
use crate::provider::Backend;
use crate::transport::HttpSseTransport;

pub(crate) const OPENAI_PROVIDER: &str = "openai";

/// Normalizer plus HTTP transport for the `openai` backend id.
pub fn openai_backend(
    config: HttpClientConfig,
    options: NormalizerOptions,
) -> Result<Backend, HarnessError> {
    Ok(Backend::new(
        Arc::new(OpenAiChatNormalizer::new(options)),
        Arc::new(HttpSseTransport::new(OPENAI_PROVIDER, config)?),
    ))
}

/// [`openai_backend`] configured from `OPENAI_API_KEY` / `OPENAI_BASE_URL`.
pub fn openai_backend_from_env() -> Result<Backend, HarnessError> {
    openai_backend(
        HttpClientConfig::from_env("OPENAI")?,
        NormalizerOptions::default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_is_keyed_by_openai_id() {
        let backend = openai_backend(HttpClientConfig::openai("sk-test"), NormalizerOptions::default())
            .expect("backend");
        assert_eq!(backend.id().as_str(), "openai");
    }
}
