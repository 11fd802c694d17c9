//! Chat-completions streaming chunk shapes. Only the fields the normalizer
//! reads are modelled; everything else is ignored.

use serde::Deserialize;

use crate::usage::UsageSnapshot;

#[derive(Debug, Default, Deserialize)]
pub(super) struct ChatChunk {
    #[serde(default)]
    pub choices: Option<Vec<Choice>>,
    #[serde(default)]
    pub usage: Option<WireUsage>,
    #[serde(default)]
    pub error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Choice {
    #[serde(default)]
    pub delta: Option<Delta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    /// Some OpenAI-compatible gateways report usage per choice.
    #[serde(default)]
    pub usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Delta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ToolCallDelta {
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
pub(super) struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireUsage {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub prompt_tokens_details: Option<PromptTokensDetails>,
    /// Reported by OpenRouter-style gateways, in USD.
    #[serde(default)]
    pub cost: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct PromptTokensDetails {
    #[serde(default)]
    pub cached_tokens: Option<u64>,
}

impl WireUsage {
    /// `prompt_tokens` includes cached prompt tokens; split them out.
    pub fn to_snapshot(&self) -> UsageSnapshot {
        let cached = self
            .prompt_tokens_details
            .as_ref()
            .and_then(|details| details.cached_tokens);
        UsageSnapshot {
            prompt_tokens: self
                .prompt_tokens
                .map(|total| total.saturating_sub(cached.unwrap_or(0))),
            completion_tokens: self.completion_tokens,
            cache_read_tokens: cached,
            cache_write_tokens: None,
            cost: self.cost,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct WireError {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<serde_json::Value>,
}

impl WireError {
    pub fn describe(&self) -> String {
        let message = self.message.as_deref().unwrap_or("unknown error");
        match (&self.kind, &self.code) {
            (Some(kind), _) => format!("{kind}: {message}"),
            (None, Some(code)) => format!("{code}: {message}"),
            (None, None) => message.to_string(),
        }
    }

    /// Numeric codes double as HTTP statuses on some gateways.
    pub fn status_code(&self) -> Option<u16> {
        self.code
            .as_ref()
            .and_then(serde_json::Value::as_u64)
            .and_then(|code| u16::try_from(code).ok())
    }
}
