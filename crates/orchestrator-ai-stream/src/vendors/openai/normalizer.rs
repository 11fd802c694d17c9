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

use super::OPENAI_PROVIDER;
use super::wire::ChatChunk;

const DONE_SENTINEL: &str = "[DONE]";

/// Normalizer for OpenAI-compatible `chat/completions` streams.
#[derive(Clone, Debug)]
pub struct OpenAiChatNormalizer {
    id: ProviderId,
    options: NormalizerOptions,
}

impl Default for OpenAiChatNormalizer {
    fn default() -> Self {
        Self::new(NormalizerOptions::default())
    }
}

impl OpenAiChatNormalizer {
    pub fn new(options: NormalizerOptions) -> Self {
        Self {
            id: ProviderId::new(OPENAI_PROVIDER),
            options,
        }
    }

    /// Registers the normalizer under a different id, for OpenAI-compatible
    /// gateways that need their own backend entry.
    pub fn with_id(mut self, id: impl Into<ProviderId>) -> Self {
        self.id = id.into();
        self
    }
}

impl EventNormalizer for OpenAiChatNormalizer {
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
        // stream close, not [DONE], is the terminal signal
        if data.is_empty() || data == DONE_SENTINEL {
            return Ok(Vec::new());
        }
        let parsed: ChatChunk = serde_json::from_str(data).map_err(|e| {
            ProviderError::protocol(self.id.clone(), format!("invalid chat completion chunk: {e}"))
        })?;

        if let Some(error) = parsed.error {
            return Err(ProviderError::provider(
                self.id.clone(),
                error.describe(),
                error.status_code(),
            ));
        }

        let mut events = Vec::new();
        for choice in parsed.choices.into_iter().flatten() {
            if let Some(delta) = choice.delta {
                if let Some(content) = delta.content.as_deref() {
                    state.push_content(content, &mut events);
                }
                for (position, call) in delta.tool_calls.into_iter().flatten().enumerate() {
                    let index = call.index.unwrap_or(position);
                    let function = call.function.as_ref();
                    state.start_tool_call(
                        index,
                        call.id.as_deref(),
                        function.and_then(|f| f.name.as_deref()),
                        &mut events,
                    );
                    if let Some(arguments) = function.and_then(|f| f.arguments.as_deref()) {
                        state.push_tool_arguments(&self.id, index, arguments, &mut events)?;
                    }
                }
            }
            if let Some(usage) = choice.usage {
                events.push(ProviderEvent::Usage {
                    usage: usage.to_snapshot(),
                });
            }
            if let Some(reason) = choice.finish_reason {
                debug!(provider = %self.id, finish_reason = %reason, "choice finished");
                state.end_all_tool_calls(&mut events);
                state.set_finish_reason(reason);
            }
        }

        if let Some(usage) = parsed.usage {
            events.push(ProviderEvent::Usage {
                usage: usage.to_snapshot(),
            });
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::markers::{TOOL_BEGIN, TOOL_END};
    use crate::provider::normalize_all;
    use crate::usage::UsageSnapshot;

    fn content_chunk(text: &str) -> NativeChunk {
        NativeChunk::data(
            serde_json::json!({"choices": [{"index": 0, "delta": {"content": text}}]}).to_string(),
        )
    }

    fn visible(events: &[ProviderEvent]) -> String {
        events
            .iter()
            .filter_map(|event| match event {
                ProviderEvent::ContentDelta { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn plain_content_maps_to_content_deltas_then_finish() {
        let chunks = [content_chunk("Hello "), content_chunk("world"), NativeChunk::data("[DONE]")];
        let events = normalize_all(&OpenAiChatNormalizer::default(), &chunks);
        assert_eq!(
            events,
            vec![
                ProviderEvent::content("Hello "),
                ProviderEvent::content("world"),
                ProviderEvent::Finish {
                    finish_reason: None,
                    usage: None
                },
            ]
        );
    }

    #[test]
    fn inline_tool_section_is_stripped_from_content() {
        let chunks = [content_chunk(&format!(
            "text {TOOL_BEGIN} payload {TOOL_END} after"
        ))];
        let events = normalize_all(&OpenAiChatNormalizer::default(), &chunks);
        assert_eq!(
            events,
            vec![
                ProviderEvent::content("text "),
                ProviderEvent::content(" after"),
                ProviderEvent::Finish {
                    finish_reason: None,
                    usage: None
                },
            ]
        );
    }

    #[test]
    fn structured_tool_calls_stream_start_delta_end() {
        let chunks = [
            NativeChunk::data(
                r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"read_file","arguments":""}}]}}]}"#,
            ),
            NativeChunk::data(
                r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"path\":"}}]}}]}"#,
            ),
            NativeChunk::data(
                r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"a.txt\"}"}}]}}]}"#,
            ),
            NativeChunk::data(r#"{"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#),
        ];
        let events = normalize_all(&OpenAiChatNormalizer::default(), &chunks);
        let kinds: Vec<EventKind> = events.iter().map(ProviderEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::ToolCallStart,
                EventKind::ToolCallDelta,
                EventKind::ToolCallDelta,
                EventKind::ToolCallEnd,
                EventKind::Finish,
            ]
        );
        let fragments: String = events
            .iter()
            .filter_map(|event| match event {
                ProviderEvent::ToolCallDelta {
                    arguments_fragment, ..
                } => Some(arguments_fragment.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(fragments, r#"{"path":"a.txt"}"#);
        assert!(matches!(
            &events[3],
            ProviderEvent::ToolCallEnd { id, name, .. } if id == "call_1" && name == "read_file"
        ));
        assert!(matches!(
            events.last(),
            Some(ProviderEvent::Finish { finish_reason: Some(reason), .. }) if reason == "tool_calls"
        ));
    }

    #[test]
    fn interleaved_tool_calls_are_tracked_by_index() {
        let chunks = [
            NativeChunk::data(
                r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"a","function":{"name":"x","arguments":"{"}},{"index":1,"id":"b","function":{"name":"y","arguments":"["}}]}}]}"#,
            ),
            NativeChunk::data(
                r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"function":{"arguments":"]"}},{"index":0,"function":{"arguments":"}"}}]}}]}"#,
            ),
        ];
        let events = normalize_all(&OpenAiChatNormalizer::default(), &chunks);
        let ends: Vec<(usize, String)> = events
            .iter()
            .filter_map(|event| match event {
                ProviderEvent::ToolCallEnd {
                    index, arguments, ..
                } => Some((*index, arguments.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(ends, vec![(0, "{}".to_string()), (1, "[]".to_string())]);
    }

    #[test]
    fn usage_chunk_reports_cached_tokens_and_cost() {
        let mut state = StreamState::default();
        let events = OpenAiChatNormalizer::default()
            .normalize_chunk(
                &NativeChunk::data(
                    r#"{"choices":[],"usage":{"prompt_tokens":130,"completion_tokens":45,"prompt_tokens_details":{"cached_tokens":10},"cost":0.0031}}"#,
                ),
                &mut state,
            )
            .expect("usage chunk");
        assert_eq!(
            events,
            vec![ProviderEvent::Usage {
                usage: UsageSnapshot {
                    prompt_tokens: Some(120),
                    completion_tokens: Some(45),
                    cache_read_tokens: Some(10),
                    cache_write_tokens: None,
                    cost: Some(0.0031),
                }
            }]
        );
    }

    #[test]
    fn null_fields_are_tolerated() {
        let mut state = StreamState::default();
        let events = OpenAiChatNormalizer::default()
            .normalize_chunk(
                &NativeChunk::data(
                    r#"{"choices":[{"index":0,"delta":{"content":null,"tool_calls":null},"finish_reason":null}],"usage":null}"#,
                ),
                &mut state,
            )
            .expect("chunk");
        assert!(events.is_empty());
    }

    #[test]
    fn malformed_json_is_a_protocol_error() {
        let mut state = StreamState::default();
        let err = OpenAiChatNormalizer::default()
            .normalize_chunk(&NativeChunk::data("{not json"), &mut state)
            .expect_err("malformed");
        assert!(matches!(err, ProviderError::Protocol { .. }));
    }

    #[test]
    fn in_band_error_is_a_provider_error() {
        let mut state = StreamState::default();
        let err = OpenAiChatNormalizer::default()
            .normalize_chunk(
                &NativeChunk::data(r#"{"error":{"message":"rate limited","code":429}}"#),
                &mut state,
            )
            .expect_err("error chunk");
        assert_eq!(
            err,
            ProviderError::provider("openai", "429: rate limited", Some(429))
        );
    }

    #[test]
    fn split_sentinel_across_chunks_never_leaks() {
        let chunks = [
            content_chunk("abc<|tool_calls_sec"),
            content_chunk("tion_begin|>{\"q\":1}<|tool_calls_section_end|>"),
            content_chunk("def"),
        ];
        let events = normalize_all(&OpenAiChatNormalizer::default(), &chunks);
        assert_eq!(visible(&events), "abcdef");
    }

    #[test]
    fn custom_id_is_reported_in_errors() {
        let normalizer = OpenAiChatNormalizer::default().with_id("openrouter");
        let mut state = normalizer.new_state();
        let err = normalizer
            .normalize_chunk(&NativeChunk::data("nope"), &mut state)
            .expect_err("malformed");
        assert_eq!(err.provider_id().as_str(), "openrouter");
    }
}
