use std::fmt;
use std::time::Duration;

/// Stable identifier for a backend (for example `openai` or `anthropic`).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, serde::Serialize, serde::Deserialize)]
pub struct ProviderId(pub String);

impl ProviderId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProviderId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Model selection for a run.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelRef {
    /// Backend that serves the model.
    pub provider: ProviderId,
    /// Backend-specific model name, also the pricing lookup key.
    pub model: String,
}

impl ModelRef {
    pub fn new(provider: impl Into<ProviderId>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

/// Per-run worker options.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RunOptions {
    /// Upper bound on the wait for any single chunk.
    pub chunk_timeout: Option<Duration>,
    /// Capacity of the bounded event channel between worker and consumer.
    pub stream_buffer_capacity: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            chunk_timeout: None,
            stream_buffer_capacity: 128,
        }
    }
}
