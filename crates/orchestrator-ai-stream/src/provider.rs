//! Backend contracts: how native chunks become [`ProviderEvent`]s.

use std::sync::Arc;

use crate::accumulator::TrailingPartialPolicy;
use crate::errors::{ProviderError, run_failure_from_provider_error};
use crate::event::ProviderEvent;
use crate::model::ProviderId;
use crate::state::StreamState;
use crate::transport::{ChunkTransport, NativeChunk};
use crate::usage::UsagePolicy;

/// Per-backend translation of native chunks into the unified event model.
///
/// Implementations hold configuration only. Everything that changes during a
/// stream lives in the [`StreamState`] passed to each call, so one normalizer
/// can serve any number of concurrent runs.
pub trait EventNormalizer: Send + Sync {
    fn id(&self) -> ProviderId;

    /// How this backend's successive usage reports combine.
    fn usage_policy(&self) -> UsagePolicy {
        UsagePolicy::Latest
    }

    /// End-of-stream handling for an unresolved partial sentinel.
    fn trailing_partial(&self) -> TrailingPartialPolicy {
        TrailingPartialPolicy::FlushAsText
    }

    /// Fresh state for one run.
    fn new_state(&self) -> StreamState {
        StreamState::new(self.trailing_partial())
    }

    /// Consumes one native chunk. An `Err` terminates the run.
    fn normalize_chunk(
        &self,
        chunk: &NativeChunk,
        state: &mut StreamState,
    ) -> Result<Vec<ProviderEvent>, ProviderError>;

    /// Called once when the transport closes cleanly. Ends with `Finish`.
    fn finish(&self, state: &mut StreamState) -> Vec<ProviderEvent> {
        state.finish()
    }
}

/// A registered backend: how to read chunks and how to interpret them.
#[derive(Clone)]
pub struct Backend {
    pub normalizer: Arc<dyn EventNormalizer>,
    pub transport: Arc<dyn ChunkTransport>,
}

impl Backend {
    pub fn new(normalizer: Arc<dyn EventNormalizer>, transport: Arc<dyn ChunkTransport>) -> Self {
        Self {
            normalizer,
            transport,
        }
    }

    pub fn id(&self) -> ProviderId {
        self.normalizer.id()
    }
}

/// Runs a whole chunk sequence through `normalizer` synchronously.
///
/// Stops at the first error, which is returned as a terminal `Error` event.
pub fn normalize_all<'a>(
    normalizer: &dyn EventNormalizer,
    chunks: impl IntoIterator<Item = &'a NativeChunk>,
) -> Vec<ProviderEvent> {
    let mut state = normalizer.new_state();
    let mut events = Vec::new();
    for chunk in chunks {
        match normalizer.normalize_chunk(chunk, &mut state) {
            Ok(batch) => events.extend(batch),
            Err(err) => {
                events.push(ProviderEvent::Error {
                    error: run_failure_from_provider_error(&err),
                });
                return events;
            }
        }
    }
    events.extend(normalizer.finish(&mut state));
    events
}
