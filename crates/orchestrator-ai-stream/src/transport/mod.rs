//! Delivery of native backend chunks.
//!
//! A transport opens one response stream per run and yields raw SSE frames;
//! it knows nothing about their JSON shape. Normalizers interpret the frames.

use std::pin::Pin;

use crate::errors::ProviderError;
use crate::model::ModelRef;

mod http;
mod scripted;
mod sse;

pub use http::HttpSseTransport;
pub use scripted::{ScriptStep, ScriptedTransport};
pub use sse::{SseDecoder, decode_sse_stream};

/// One native chunk: a single server-sent event frame.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NativeChunk {
    /// The `event:` field, when the backend names its events.
    pub event: Option<String>,
    /// Joined `data:` lines.
    pub data: String,
}

impl NativeChunk {
    pub fn new(event: Option<&str>, data: impl Into<String>) -> Self {
        Self {
            event: event.map(str::to_string),
            data: data.into(),
        }
    }

    /// A `data:`-only frame.
    pub fn data(data: impl Into<String>) -> Self {
        Self::new(None, data)
    }

    /// A named event frame.
    pub fn event(event: &str, data: impl Into<String>) -> Self {
        Self::new(Some(event), data)
    }
}

/// Ordered chunk sequence for one run. `None` means the stream closed.
pub type ChunkStream =
    Pin<Box<dyn futures::Stream<Item = Result<NativeChunk, ProviderError>> + Send + 'static>>;

/// What a transport needs to open a stream.
#[derive(Clone, Debug, PartialEq)]
pub struct TransportRequest {
    pub run_id: uuid::Uuid,
    pub session_id: String,
    pub model: ModelRef,
    /// Request body, sent as-is.
    pub body: serde_json::Value,
}

/// Source of native chunks for a backend.
#[async_trait::async_trait]
pub trait ChunkTransport: Send + Sync {
    /// Opens the response stream. Failures here happen before any chunk.
    async fn open(&self, request: &TransportRequest) -> Result<ChunkStream, ProviderError>;
}
