use crate::errors::RunFailure;
use crate::usage::UsageSnapshot;

/// Discriminant of a [`ProviderEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ContentDelta,
    ToolCallStart,
    ToolCallDelta,
    ToolCallEnd,
    Usage,
    Finish,
    Error,
}

/// One unit of normalized, backend-agnostic stream output.
///
/// A run yields these in order and ends with exactly one `Finish` or `Error`.
/// Concatenating every `ContentDelta` reproduces the visible reply text with
/// inline tool sections removed.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderEvent {
    /// Visible text. Never contains sentinel bytes.
    ContentDelta { content: String },
    /// A structured tool call was opened at `index`.
    ///
    /// Emitted once the call's id is known; arguments received earlier follow
    /// as a single `ToolCallDelta`. A call whose id never arrives is started
    /// at close time with an empty `id`.
    ToolCallStart {
        index: usize,
        id: String,
        name: String,
    },
    /// Raw argument bytes for the tool call at `index`, in arrival order.
    ToolCallDelta {
        index: usize,
        id: String,
        arguments_fragment: String,
    },
    /// The tool call at `index` is complete; `arguments` is the full payload.
    ToolCallEnd {
        index: usize,
        id: String,
        name: String,
        arguments: String,
    },
    /// Token/cost report from the backend.
    Usage { usage: UsageSnapshot },
    /// Terminal success.
    Finish {
        finish_reason: Option<String>,
        usage: Option<UsageSnapshot>,
    },
    /// Terminal failure.
    Error { error: RunFailure },
}

impl ProviderEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ContentDelta { .. } => EventKind::ContentDelta,
            Self::ToolCallStart { .. } => EventKind::ToolCallStart,
            Self::ToolCallDelta { .. } => EventKind::ToolCallDelta,
            Self::ToolCallEnd { .. } => EventKind::ToolCallEnd,
            Self::Usage { .. } => EventKind::Usage,
            Self::Finish { .. } => EventKind::Finish,
            Self::Error { .. } => EventKind::Error,
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. } | Self::Error { .. })
    }

    /// Tool call index for `ToolCall*` events.
    pub fn tool_call_index(&self) -> Option<usize> {
        match self {
            Self::ToolCallStart { index, .. }
            | Self::ToolCallDelta { index, .. }
            | Self::ToolCallEnd { index, .. } => Some(*index),
            _ => None,
        }
    }

    pub(crate) fn content(text: impl Into<String>) -> Self {
        Self::ContentDelta {
            content: text.into(),
        }
    }
}
