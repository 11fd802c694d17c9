use std::time::Duration;

use crate::accumulator::TrailingPartialPolicy;
use crate::errors::HarnessError;
use crate::usage::UsagePolicy;

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OPENAI_CHAT_PATH: &str = "/v1/chat/completions";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_MESSAGES_PATH: &str = "/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// How the API key is presented to the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`.
    Bearer,
    /// The key is sent verbatim in the named header.
    Header(String),
}

/// Connection settings for [`HttpSseTransport`](crate::transport::HttpSseTransport).
#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    pub api_key: String,
    /// Scheme and host, optionally with a path prefix (useful for proxies).
    pub base_url: String,
    /// Endpoint path appended to `base_url`.
    pub path: String,
    pub auth: AuthScheme,
    /// Bound on establishing the connection. Streamed bodies are never cut off
    /// by a total deadline; per-chunk waits are bounded by the run's
    /// `chunk_timeout`.
    pub connect_timeout: Duration,
    /// Optional idle bound on each socket read while the body streams.
    pub read_timeout: Option<Duration>,
    pub extra_headers: Vec<(String, String)>,
}

impl HttpClientConfig {
    /// An OpenAI-compatible chat-completions endpoint.
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            path: OPENAI_CHAT_PATH.to_string(),
            auth: AuthScheme::Bearer,
            connect_timeout: Duration::from_secs(30),
            read_timeout: None,
            extra_headers: Vec::new(),
        }
    }

    /// The Anthropic messages endpoint.
    pub fn anthropic(api_key: impl Into<String>) -> Self {
        Self {
            base_url: ANTHROPIC_BASE_URL.to_string(),
            path: ANTHROPIC_MESSAGES_PATH.to_string(),
            auth: AuthScheme::Header("x-api-key".into()),
            ..Self::openai(api_key)
        }
        .header("anthropic-version", ANTHROPIC_VERSION)
    }

    /// Reads `<PREFIX>_API_KEY` (required) and `<PREFIX>_BASE_URL` into an
    /// OpenAI-compatible config.
    pub fn from_env(prefix: &str) -> Result<Self, HarnessError> {
        Self::openai(String::new()).with_env_overrides(prefix, |key| std::env::var(key).ok())
    }

    /// `ANTHROPIC_API_KEY` / `ANTHROPIC_BASE_URL` applied to [`Self::anthropic`].
    pub fn anthropic_from_env() -> Result<Self, HarnessError> {
        Self::anthropic(String::new()).with_env_overrides("ANTHROPIC", |key| std::env::var(key).ok())
    }

    pub(crate) fn with_env_overrides(
        mut self,
        prefix: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, HarnessError> {
        let key_var = format!("{prefix}_API_KEY");
        let api_key = lookup(&key_var).unwrap_or_default();
        if api_key.trim().is_empty() {
            return Err(HarnessError::Config(format!("missing {key_var}")));
        }
        self.api_key = api_key;
        if let Some(base_url) = lookup(&format!("{prefix}_BASE_URL"))
            && !base_url.trim().is_empty()
        {
            self.base_url = base_url;
        }
        Ok(self)
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Fails the stream if the socket stays silent for `timeout`. Resets on
    /// every read.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    pub(crate) fn url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }
}

/// Behaviour knobs shared by every normalizer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct NormalizerOptions {
    pub usage_policy: UsagePolicy,
    pub trailing_partial: TrailingPartialPolicy,
}

impl NormalizerOptions {
    pub fn usage_policy(mut self, policy: UsagePolicy) -> Self {
        self.usage_policy = policy;
        self
    }

    pub fn trailing_partial(mut self, policy: TrailingPartialPolicy) -> Self {
        self.trailing_partial = policy;
        self
    }
}
