//! Streamed LLM response normalization with a builder-first async API.
//!
//! Each backend's native stream chunks are turned into one ordered sequence of
//! [`ProviderEvent`]s: visible text with inline tool sections stripped,
//! structured tool calls, usage, and exactly one terminal `Finish` or `Error`.
//! Token usage and cost are written to a [`SessionLedger`] once per completed
//! run.
//!
//! Vendor-specific normalizers live under `vendors::*`.
//!
//! # Builder-first usage (OpenAI)
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use orchestrator_ai_stream::prelude::*;
//! use orchestrator_ai_stream::vendors::openai::openai_backend_from_env;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), HarnessError> {
//! let harness = Harness::builder()
//!     .register_backend(openai_backend_from_env()?)
//!     .ledger(Arc::new(InMemoryLedger::new()))
//!     .build()?;
//!
//! let session = harness
//!     .create_session(CreateSession::new("demo", "Demo session"))
//!     .await?;
//! let mut stream = session
//!     .run(ModelRef::new("openai", "gpt-5-nano"))
//!     .request_body(serde_json::json!({
//!         "model": "gpt-5-nano",
//!         "stream": true,
//!         "stream_options": {"include_usage": true},
//!         "messages": [{"role": "user", "content": "Say hello"}],
//!     }))
//!     .start_stream()
//!     .await?;
//!
//! while let Some(event) = stream.next_event().await {
//!     if let ProviderEvent::ContentDelta { content } = &event {
//!         print!("{content}");
//!     }
//! }
//! let output = stream.finish().await?;
//! println!("\n{:?}", output.usage);
//! # Ok(())
//! # }
//! ```

/// Sentinel-aware content accumulation across fragment boundaries.
pub mod accumulator;
/// HTTP client and normalizer configuration.
pub mod config;
/// Final run output helpers.
pub mod content;
/// Public error types used by the harness API.
pub mod errors;
/// Normalized public stream events.
pub mod event;
/// Harness entry point and builder.
pub mod harness;
/// Session ledger contract and in-memory store.
pub mod ledger;
/// Inline tool-section sentinel scanning.
pub mod markers;
/// Model and provider identifiers plus generic run options.
pub mod model;
/// Process-wide logging setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Normalizer contract and backend registration.
pub mod provider;
/// Run builder, streaming handle, and cancellation handle.
pub mod run;
/// Session handle for starting runs.
pub mod session;
/// Per-run mutable stream state.
pub mod state;
/// Native chunk delivery: HTTP SSE and scripted replay.
pub mod transport;
/// Usage accumulation and the single ledger update.
pub mod usage;
/// Vendor-specific normalizers.
pub mod vendors;

pub use accumulator::{Segment, StreamAccumulator, TrailingPartialPolicy};
pub use config::{AuthScheme, HttpClientConfig, NormalizerOptions};
pub use content::{CompletedToolCall, RunOutput};
pub use errors::{HarnessError, ProviderError, RunFailure};
pub use event::{EventKind, ProviderEvent};
pub use harness::{Harness, HarnessBuilder};
pub use ledger::{
    CreateSession, InMemoryLedger, LedgerError, Session, SessionLedger, UpdateSession,
};
pub use markers::{Marker, MarkerHit, TOOL_BEGIN, TOOL_END};
pub use model::{ModelRef, ProviderId, RunOptions};
pub use observability::init_observability;
pub use provider::{Backend, EventNormalizer, normalize_all};
pub use run::{AbortHandle, RunBuilder, RunStream};
pub use session::SessionHandle;
pub use state::StreamState;
pub use transport::{ChunkStream, ChunkTransport, NativeChunk, TransportRequest};
pub use usage::{
    ModelPricing, PendingUsageCommit, UsagePolicy, UsageSnapshot, UsageTotals, UsageTracker,
};
