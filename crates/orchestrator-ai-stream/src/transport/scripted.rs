use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::stream::{self, StreamExt as _};

use crate::errors::ProviderError;

use super::{ChunkStream, ChunkTransport, NativeChunk, SseDecoder, TransportRequest};

/// One step of a scripted response.
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptStep {
    Chunk(NativeChunk),
    Fail(ProviderError),
    /// The stream goes silent and never yields again.
    Stall,
}

/// Replays a fixed chunk sequence on every `open`.
///
/// Used for offline replays of recorded captures and as a test double.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    steps: Vec<ScriptStep>,
    open_error: Option<ProviderError>,
    opened: AtomicUsize,
    requests: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    pub fn from_chunks(chunks: impl IntoIterator<Item = NativeChunk>) -> Self {
        Self::new(chunks.into_iter().map(ScriptStep::Chunk).collect())
    }

    /// Decodes a recorded SSE capture up front.
    pub fn from_sse(capture: &str) -> Self {
        let mut decoder = SseDecoder::new();
        let mut chunks = decoder.push_chunk(capture.as_bytes());
        chunks.extend(decoder.finish());
        Self::from_chunks(chunks)
    }

    /// Makes every `open` fail before any chunk is produced.
    pub fn failing_open(error: ProviderError) -> Self {
        Self {
            open_error: Some(error),
            ..Self::default()
        }
    }

    pub fn then(mut self, step: ScriptStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Number of times `open` was called.
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests
            .lock()
            .map(|seen| seen.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl ChunkTransport for ScriptedTransport {
    async fn open(&self, request: &TransportRequest) -> Result<ChunkStream, ProviderError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(request.clone());
        }
        if let Some(error) = &self.open_error {
            return Err(error.clone());
        }

        let mut items = Vec::new();
        let mut stalls = false;
        for step in &self.steps {
            match step {
                ScriptStep::Chunk(chunk) => items.push(Ok(chunk.clone())),
                ScriptStep::Fail(error) => items.push(Err(error.clone())),
                ScriptStep::Stall => {
                    stalls = true;
                    break;
                }
            }
        }
        let tail: ChunkStream = if stalls {
            Box::pin(stream::pending())
        } else {
            Box::pin(stream::empty())
        };
        Ok(Box::pin(stream::iter(items).chain(tail)))
    }
}
