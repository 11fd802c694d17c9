//! Per-request mutable stream state.
//!
//! One `StreamState` is created per run, owned by that run's worker task and
//! handed to the normalizer chunk by chunk. Nothing in here is shared.

use std::collections::BTreeMap;

use tracing::warn;

use crate::accumulator::{Segment, StreamAccumulator, TrailingPartialPolicy};
use crate::errors::ProviderError;
use crate::event::ProviderEvent;
use crate::model::ProviderId;

/// Maximum size of a single tool call's argument buffer in bytes.
pub const MAX_TOOL_CALL_BUFFER_BYTES: usize = 1_048_576;

/// Accumulated arguments for one in-flight structured tool call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ToolCallBuffer {
    pub id: String,
    pub name: String,
    pub arguments: String,
    pub total_bytes: usize,
    closed: bool,
    /// `ToolCallStart` has been emitted.
    announced: bool,
    /// Bytes of `arguments` already forwarded as `ToolCallDelta`.
    emitted_bytes: usize,
    /// Complete payload delivered with the call's opening frame; used only if
    /// no fragments stream in.
    initial_arguments: Option<String>,
}

impl ToolCallBuffer {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn append(&mut self, fragment: &str) -> Result<(), usize> {
        let new_size = self.total_bytes + fragment.len();
        if new_size > MAX_TOOL_CALL_BUFFER_BYTES {
            return Err(new_size);
        }
        self.arguments.push_str(fragment);
        self.total_bytes = new_size;
        Ok(())
    }
}

/// State of one streaming request.
#[derive(Debug, Default)]
pub struct StreamState {
    accumulator: StreamAccumulator,
    tool_calls: BTreeMap<usize, ToolCallBuffer>,
    finish_reason: Option<String>,
}

impl StreamState {
    pub fn new(trailing: TrailingPartialPolicy) -> Self {
        Self {
            accumulator: StreamAccumulator::new(trailing),
            ..Self::default()
        }
    }

    pub fn accumulator(&self) -> &StreamAccumulator {
        &self.accumulator
    }

    /// Whether the content stream is currently inside an inline tool section.
    pub fn in_tool_section(&self) -> bool {
        self.accumulator.in_tool_section()
    }

    pub fn tool_call(&self, index: usize) -> Option<&ToolCallBuffer> {
        self.tool_calls.get(&index)
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    pub fn set_finish_reason(&mut self, reason: impl Into<String>) {
        self.finish_reason = Some(reason.into());
    }

    /// Runs a content fragment through the sentinel accumulator.
    pub fn push_content(&mut self, fragment: &str, events: &mut Vec<ProviderEvent>) {
        let segments = self.accumulator.push(fragment);
        push_segments(segments, events);
    }

    /// Registers (or re-identifies) the tool call at `index`.
    ///
    /// `ToolCallStart` is emitted once the call's id is known, so consumers
    /// never see a blank identity when the backend sends it late. Argument
    /// fragments that arrive first are held and forwarded as one
    /// `ToolCallDelta` right after the start. Backends that repeat the
    /// id/name on later deltas only fill in blanks.
    pub fn start_tool_call(
        &mut self,
        index: usize,
        id: Option<&str>,
        name: Option<&str>,
        events: &mut Vec<ProviderEvent>,
    ) {
        let buffer = self.tool_calls.entry(index).or_default();
        if buffer.id.is_empty()
            && let Some(id) = id
        {
            buffer.id = id.to_string();
        }
        if buffer.name.is_empty()
            && let Some(name) = name
        {
            buffer.name = name.to_string();
        }
        if !buffer.announced && !buffer.closed && !buffer.id.is_empty() {
            announce(index, buffer, events);
        }
    }

    /// Records a complete argument payload sent with the call's opening
    /// frame. It becomes the call's arguments at close time only if no
    /// fragments were streamed through [`Self::push_tool_arguments`].
    pub fn set_initial_arguments(&mut self, index: usize, arguments: impl Into<String>) {
        if let Some(buffer) = self.tool_calls.get_mut(&index) {
            buffer.initial_arguments = Some(arguments.into());
        }
    }

    /// Appends an argument fragment to the tool call at `index`.
    pub fn push_tool_arguments(
        &mut self,
        provider: &ProviderId,
        index: usize,
        fragment: &str,
        events: &mut Vec<ProviderEvent>,
    ) -> Result<(), ProviderError> {
        if fragment.is_empty() {
            return Ok(());
        }
        let buffer = self.tool_calls.entry(index).or_default();
        if buffer.closed {
            return Err(ProviderError::protocol(
                provider.clone(),
                format!("tool call {index} received arguments after it was closed"),
            ));
        }
        buffer.append(fragment).map_err(|size| {
            ProviderError::protocol(
                provider.clone(),
                format!(
                    "tool call '{}' (index {index}) exceeded {MAX_TOOL_CALL_BUFFER_BYTES} byte limit ({size} bytes)",
                    buffer.name
                ),
            )
        })?;
        if buffer.announced {
            flush_arguments(index, buffer, events);
        }
        Ok(())
    }

    /// Closes the tool call at `index`, emitting `ToolCallEnd` once.
    ///
    /// A call whose id never arrived is started here with whatever identity
    /// is known.
    pub fn end_tool_call(&mut self, index: usize, events: &mut Vec<ProviderEvent>) {
        let Some(buffer) = self.tool_calls.get_mut(&index) else {
            return;
        };
        if buffer.closed {
            return;
        }
        if let Some(initial) = buffer.initial_arguments.take()
            && buffer.arguments.is_empty()
            && let Err(size) = buffer.append(&initial)
        {
            warn!(index, size, "dropping oversized initial tool call arguments");
        }
        if buffer.announced {
            flush_arguments(index, buffer, events);
        } else {
            announce(index, buffer, events);
        }
        buffer.closed = true;
        events.push(ProviderEvent::ToolCallEnd {
            index,
            id: buffer.id.clone(),
            name: buffer.name.clone(),
            arguments: buffer.arguments.clone(),
        });
    }

    /// Closes every open tool call in index order.
    pub fn end_all_tool_calls(&mut self, events: &mut Vec<ProviderEvent>) {
        let open: Vec<usize> = self
            .tool_calls
            .iter()
            .filter(|(_, buffer)| !buffer.closed)
            .map(|(index, _)| *index)
            .collect();
        for index in open {
            self.end_tool_call(index, events);
        }
    }

    /// Flushes the accumulator, closes open tool calls and emits `Finish`.
    pub fn finish(&mut self) -> Vec<ProviderEvent> {
        let mut events = Vec::new();
        push_segments(self.accumulator.finish(), &mut events);
        self.end_all_tool_calls(&mut events);
        events.push(ProviderEvent::Finish {
            finish_reason: self.finish_reason.clone(),
            usage: None,
        });
        events
    }
}

fn announce(index: usize, buffer: &mut ToolCallBuffer, events: &mut Vec<ProviderEvent>) {
    buffer.announced = true;
    events.push(ProviderEvent::ToolCallStart {
        index,
        id: buffer.id.clone(),
        name: buffer.name.clone(),
    });
    flush_arguments(index, buffer, events);
}

/// Forwards argument bytes not yet sent as a `ToolCallDelta`.
fn flush_arguments(index: usize, buffer: &mut ToolCallBuffer, events: &mut Vec<ProviderEvent>) {
    let Some(pending) = buffer.arguments.get(buffer.emitted_bytes..) else {
        return;
    };
    if pending.is_empty() {
        return;
    }
    events.push(ProviderEvent::ToolCallDelta {
        index,
        id: buffer.id.clone(),
        arguments_fragment: pending.to_string(),
    });
    buffer.emitted_bytes = buffer.arguments.len();
}

fn push_segments(segments: Vec<Segment>, events: &mut Vec<ProviderEvent>) {
    for segment in segments {
        match segment {
            Segment::Text(text) => events.push(ProviderEvent::content(text)),
            Segment::SectionBegin => tracing::debug!("inline tool section opened"),
            Segment::SectionEnd => tracing::debug!("inline tool section closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn provider() -> ProviderId {
        ProviderId::new("test")
    }

    #[test]
    fn tool_call_lifecycle_emits_start_delta_end_once() {
        let mut state = StreamState::default();
        let mut events = Vec::new();
        state.start_tool_call(0, Some("call_1"), Some("read_file"), &mut events);
        state.start_tool_call(0, Some("call_1"), Some("read_file"), &mut events);
        state
            .push_tool_arguments(&provider(), 0, "{\"path\":", &mut events)
            .expect("append");
        state
            .push_tool_arguments(&provider(), 0, "\"a.txt\"}", &mut events)
            .expect("append");
        state.end_tool_call(0, &mut events);
        state.end_tool_call(0, &mut events);

        let kinds: Vec<EventKind> = events.iter().map(ProviderEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::ToolCallStart,
                EventKind::ToolCallDelta,
                EventKind::ToolCallDelta,
                EventKind::ToolCallEnd,
            ]
        );
        assert!(matches!(
            events.last(),
            Some(ProviderEvent::ToolCallEnd { arguments, .. }) if arguments == "{\"path\":\"a.txt\"}"
        ));
    }

    #[test]
    fn start_waits_for_identity_and_replays_held_arguments() {
        let mut state = StreamState::default();
        let mut events = Vec::new();
        state
            .push_tool_arguments(&provider(), 1, "{\"a\":", &mut events)
            .expect("append");
        state
            .push_tool_arguments(&provider(), 1, "1}", &mut events)
            .expect("append");
        assert!(events.is_empty());

        state.start_tool_call(1, Some("call_9"), Some("ls"), &mut events);
        state
            .push_tool_arguments(&provider(), 1, " ", &mut events)
            .expect("append");
        assert_eq!(
            events,
            vec![
                ProviderEvent::ToolCallStart {
                    index: 1,
                    id: "call_9".into(),
                    name: "ls".into(),
                },
                ProviderEvent::ToolCallDelta {
                    index: 1,
                    id: "call_9".into(),
                    arguments_fragment: "{\"a\":1}".into(),
                },
                ProviderEvent::ToolCallDelta {
                    index: 1,
                    id: "call_9".into(),
                    arguments_fragment: " ".into(),
                },
            ]
        );
    }

    #[test]
    fn call_without_id_is_started_at_close() {
        let mut state = StreamState::default();
        let mut events = Vec::new();
        state.start_tool_call(0, None, Some("anon"), &mut events);
        state
            .push_tool_arguments(&provider(), 0, "{}", &mut events)
            .expect("append");
        assert!(events.is_empty());
        state.end_tool_call(0, &mut events);
        let kinds: Vec<EventKind> = events.iter().map(ProviderEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::ToolCallStart, EventKind::ToolCallDelta, EventKind::ToolCallEnd]
        );
        assert!(matches!(
            &events[0],
            ProviderEvent::ToolCallStart { name, .. } if name == "anon"
        ));
    }

    #[test]
    fn initial_arguments_apply_only_without_streamed_fragments() {
        let mut state = StreamState::default();
        let mut events = Vec::new();
        state.start_tool_call(0, Some("a"), Some("t"), &mut events);
        state.set_initial_arguments(0, "{\"x\":1}");
        state.end_tool_call(0, &mut events);
        assert!(matches!(
            events.last(),
            Some(ProviderEvent::ToolCallEnd { arguments, .. }) if arguments == "{\"x\":1}"
        ));

        let mut events = Vec::new();
        state.start_tool_call(1, Some("b"), Some("t"), &mut events);
        state.set_initial_arguments(1, "{\"x\":1}");
        state
            .push_tool_arguments(&provider(), 1, "{\"y\":2}", &mut events)
            .expect("append");
        state.end_tool_call(1, &mut events);
        let fragments: String = events
            .iter()
            .filter_map(|event| match event {
                ProviderEvent::ToolCallDelta { arguments_fragment, .. } => Some(arguments_fragment.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(fragments, "{\"y\":2}");
        assert!(matches!(
            events.last(),
            Some(ProviderEvent::ToolCallEnd { arguments, .. }) if arguments == "{\"y\":2}"
        ));
    }

    #[test]
    fn oversized_arguments_are_rejected() {
        let mut state = StreamState::default();
        let mut events = Vec::new();
        state.start_tool_call(0, Some("c"), Some("big"), &mut events);
        let chunk = "x".repeat(MAX_TOOL_CALL_BUFFER_BYTES);
        state
            .push_tool_arguments(&provider(), 0, &chunk, &mut events)
            .expect("at limit");
        let err = state
            .push_tool_arguments(&provider(), 0, "y", &mut events)
            .expect_err("over limit");
        assert!(matches!(err, ProviderError::Protocol { .. }));
        assert!(err.message().contains("byte limit"));
    }

    #[test]
    fn arguments_after_close_are_a_protocol_error() {
        let mut state = StreamState::default();
        let mut events = Vec::new();
        state.start_tool_call(0, Some("c"), Some("t"), &mut events);
        state.end_tool_call(0, &mut events);
        assert!(state
            .push_tool_arguments(&provider(), 0, "{}", &mut events)
            .is_err());
    }

    #[test]
    fn finish_closes_open_calls_in_index_order_then_finishes() {
        let mut state = StreamState::default();
        let mut events = Vec::new();
        state.start_tool_call(3, Some("c3"), Some("b"), &mut events);
        state.start_tool_call(1, Some("c1"), Some("a"), &mut events);
        state.set_finish_reason("tool_calls");
        let finished = state.finish();
        let indices: Vec<Option<usize>> = finished.iter().map(ProviderEvent::tool_call_index).collect();
        assert_eq!(indices, vec![Some(1), Some(3), None]);
        assert!(matches!(
            finished.last(),
            Some(ProviderEvent::Finish { finish_reason: Some(reason), .. }) if reason == "tool_calls"
        ));
    }

    #[test]
    fn content_is_routed_through_the_accumulator() {
        let mut state = StreamState::default();
        let mut events = Vec::new();
        state.push_content("hi <|tool_calls_section_begin|>secret", &mut events);
        assert!(state.in_tool_section());
        assert_eq!(events, vec![ProviderEvent::content("hi ")]);
    }
}
