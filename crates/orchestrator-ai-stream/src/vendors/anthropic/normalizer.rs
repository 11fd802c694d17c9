use tracing::debug;

use crate::accumulator::TrailingPartialPolicy;
use crate::config::NormalizerOptions;
use crate::errors::ProviderError;
use crate::event::ProviderEvent;
use crate::model::ProviderId;
use crate::provider::EventNormalizer;
use crate::state::StreamState;
use crate::transport::NativeChunk;
use crate::usage::UsagePolicy;

use super::ANTHROPIC_PROVIDER;
use super::wire::{BlockDelta, ContentBlock, StreamEvent};

/// Normalizer for Anthropic `messages` streams.
///
/// Content block indices double as tool call indices.
#[derive(Clone, Debug)]
pub struct AnthropicNormalizer {
    id: ProviderId,
    options: NormalizerOptions,
}

impl Default for AnthropicNormalizer {
    fn default() -> Self {
        Self::new(NormalizerOptions::default())
    }
}

impl AnthropicNormalizer {
    pub fn new(options: NormalizerOptions) -> Self {
        Self {
            id: ProviderId::new(ANTHROPIC_PROVIDER),
            options,
        }
    }

    pub fn with_id(mut self, id: impl Into<ProviderId>) -> Self {
        self.id = id.into();
        self
    }
}

impl EventNormalizer for AnthropicNormalizer {
    fn id(&self) -> ProviderId {
        self.id.clone()
    }

    fn usage_policy(&self) -> UsagePolicy {
        self.options.usage_policy
    }

    fn trailing_partial(&self) -> TrailingPartialPolicy {
        self.options.trailing_partial
    }

    fn normalize_chunk(
        &self,
        chunk: &NativeChunk,
        state: &mut StreamState,
    ) -> Result<Vec<ProviderEvent>, ProviderError> {
        let data = chunk.data.trim();
        if data.is_empty() {
            return Ok(Vec::new());
        }
        let event: StreamEvent = serde_json::from_str(data).map_err(|e| {
            ProviderError::protocol(
                self.id.clone(),
                format!(
                    "invalid {} event: {e}",
                    chunk.event.as_deref().unwrap_or("message")
                ),
            )
        })?;

        let mut events = Vec::new();
        match event {
            StreamEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    events.push(ProviderEvent::Usage {
                        usage: usage.to_snapshot(),
                    });
                }
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ContentBlock::Text { text } => state.push_content(&text, &mut events),
                ContentBlock::ToolUse { id, name, input } => {
                    state.start_tool_call(index, Some(&id), Some(&name), &mut events);
                    // streamed partial_json, when any arrives, replaces this
                    if let Some(input) = input.filter(|v| !is_empty_object(v)) {
                        state.set_initial_arguments(index, input.to_string());
                    }
                }
                ContentBlock::Other => {
                    debug!(provider = %self.id, index, "ignoring non-visible content block");
                }
            },
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } => state.push_content(&text, &mut events),
                BlockDelta::InputJsonDelta { partial_json } => {
                    state.push_tool_arguments(&self.id, index, &partial_json, &mut events)?;
                }
                BlockDelta::Other => {}
            },
            StreamEvent::ContentBlockStop { index } => state.end_tool_call(index, &mut events),
            StreamEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.and_then(|d| d.stop_reason) {
                    state.set_finish_reason(reason);
                }
                if let Some(usage) = usage {
                    events.push(ProviderEvent::Usage {
                        usage: usage.to_snapshot(),
                    });
                }
            }
            StreamEvent::MessageStop | StreamEvent::Ping => {}
            StreamEvent::Error { error } => {
                return Err(ProviderError::provider(
                    self.id.clone(),
                    error.describe(),
                    error.status_code(),
                ));
            }
            StreamEvent::Unknown => {
                debug!(provider = %self.id, event = ?chunk.event, "ignoring unknown stream event");
            }
        }
        Ok(events)
    }
}

fn is_empty_object(value: &serde_json::Value) -> bool {
    value.as_object().is_some_and(|map| map.is_empty())
}
