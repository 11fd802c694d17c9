use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::content::RunOutput;
use crate::errors::{HarnessError, ProviderError, RunFailure, run_failure_from_provider_error};
use crate::event::ProviderEvent;
use crate::harness::HarnessInner;
use crate::ledger::SessionLedger;
use crate::model::{ModelRef, ProviderId, RunOptions};
use crate::provider::Backend;
use crate::transport::{ChunkStream, NativeChunk, TransportRequest};
use crate::usage::{ModelPricing, UsageTracker};

/// Handle used to request cancellation of a running stream.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// Checked between chunk reads and before each event is delivered, so no
    /// further events reach the consumer once it is set. It becomes visible
    /// as a terminal `ProviderEvent::Error` with `RunFailure::Cancelled`. A
    /// cancelled run never touches the session ledger.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

/// Builder for configuring and starting a single streaming run.
pub struct RunBuilder {
    harness: Arc<HarnessInner>,
    session_id: String,
    model: ModelRef,
    body: Option<serde_json::Value>,
    options: RunOptions,
}

impl RunBuilder {
    pub(crate) fn new(harness: Arc<HarnessInner>, session_id: String, model: ModelRef) -> Self {
        Self {
            harness,
            session_id,
            model,
            body: None,
            options: RunOptions::default(),
        }
    }

    /// Backend request body, sent verbatim by the transport.
    pub fn request_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Fails the run when no chunk arrives within `timeout`.
    pub fn chunk_timeout(mut self, timeout: Duration) -> Self {
        self.options.chunk_timeout = Some(timeout);
        self
    }

    /// Sets the bounded stream buffer size used between the worker task and
    /// the consumer.
    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.options.stream_buffer_capacity = capacity;
        self
    }

    pub fn options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Validates the builder state and spawns the run's worker.
    pub async fn start_stream(self) -> Result<RunStream, HarnessError> {
        let harness = self.harness.clone();
        let validated = self.validate()?;
        let backend = harness
            .backend(&validated.request.model.provider)
            .ok_or_else(|| HarnessError::BackendNotFound {
                provider: validated.request.model.provider.clone(),
            })?;

        let (tx, rx) = mpsc::channel(validated.options.stream_buffer_capacity);
        let (final_tx, final_rx) = oneshot::channel();
        let (abort_tx, abort_rx) = watch::channel(false);

        let request = validated.request;
        let stream = RunStream {
            run_id: request.run_id,
            session_id: request.session_id.clone(),
            model: request.model.clone(),
            rx,
            final_rx,
            abort_handle: AbortHandle { tx: abort_tx },
            saw_terminal: false,
        };
        let pricing = harness.pricing(&request.model.model);
        tokio::spawn(run_task(
            RunContext {
                backend,
                request,
                options: validated.options,
                ledger: harness.ledger(),
                pricing,
            },
            tx,
            final_tx,
            abort_rx,
        ));
        Ok(stream)
    }

    /// Runs to completion and returns the aggregated output.
    pub async fn collect_output(self) -> Result<RunOutput, HarnessError> {
        self.start_stream().await?.finish().await
    }

    /// Runs to completion and returns only the visible text.
    pub async fn collect_text(self) -> Result<String, HarnessError> {
        Ok(self.collect_output().await?.content)
    }

    fn validate(self) -> Result<ValidatedRun, HarnessError> {
        if self.session_id.trim().is_empty() {
            return Err(HarnessError::Validation(
                "session id must not be empty".into(),
            ));
        }
        if self.model.provider.as_str().trim().is_empty() {
            return Err(HarnessError::Validation(
                "model provider must not be empty".into(),
            ));
        }
        if self.model.model.trim().is_empty() {
            return Err(HarnessError::Validation("model must not be empty".into()));
        }
        if self.options.stream_buffer_capacity == 0 {
            return Err(HarnessError::Validation(
                "stream_buffer_capacity must be greater than 0".into(),
            ));
        }
        let Some(body) = self.body else {
            return Err(HarnessError::Validation("request body is required".into()));
        };

        Ok(ValidatedRun {
            request: TransportRequest {
                run_id: uuid::Uuid::new_v4(),
                session_id: self.session_id,
                model: self.model,
                body,
            },
            options: self.options,
        })
    }
}

struct ValidatedRun {
    request: TransportRequest,
    options: RunOptions,
}

/// Streaming handle returned by [`RunBuilder::start_stream`].
///
/// Yields [`ProviderEvent`]s in order; the last one is always `Finish` or
/// `Error`.
pub struct RunStream {
    run_id: uuid::Uuid,
    session_id: String,
    model: ModelRef,
    rx: mpsc::Receiver<ProviderEvent>,
    final_rx: oneshot::Receiver<Result<RunOutput, HarnessError>>,
    abort_handle: AbortHandle,
    saw_terminal: bool,
}

impl RunStream {
    pub fn run_id(&self) -> uuid::Uuid {
        self.run_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn model(&self) -> &ModelRef {
        &self.model
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Waits for the next event. Returns `None` once the terminal event has
    /// been consumed and the worker has exited.
    pub async fn next_event(&mut self) -> Option<ProviderEvent> {
        let event = self.rx.recv().await;
        if event.as_ref().is_some_and(ProviderEvent::is_terminal) {
            self.saw_terminal = true;
        }
        event
    }

    /// Drains the stream (if needed) and returns the terminal run result.
    ///
    /// Safe to call after consuming events manually with `next_event()`.
    pub async fn finish(mut self) -> Result<RunOutput, HarnessError> {
        while !self.saw_terminal {
            match self.rx.recv().await {
                Some(event) if event.is_terminal() => self.saw_terminal = true,
                Some(_) => {}
                None => break,
            }
        }

        match self.final_rx.await {
            Ok(result) => result,
            Err(_) => Err(HarnessError::protocol_msg(format!(
                "run task ended without final result (provider={}, model={})",
                self.model.provider, self.model.model
            ))),
        }
    }
}

struct RunContext {
    backend: Backend,
    request: TransportRequest,
    options: RunOptions,
    ledger: Option<Arc<dyn SessionLedger>>,
    pricing: Option<ModelPricing>,
}

async fn run_task(
    ctx: RunContext,
    tx: mpsc::Sender<ProviderEvent>,
    final_tx: oneshot::Sender<Result<RunOutput, HarnessError>>,
    mut abort_rx: watch::Receiver<bool>,
) {
    let RunContext {
        backend,
        request,
        options,
        ledger,
        pricing,
    } = ctx;
    let run_id = request.run_id;
    let session_id = request.session_id.clone();
    let provider_id = backend.id();
    let model_name = request.model.model.clone();
    let normalizer = backend.normalizer;

    debug!(run_id = %run_id, session_id = %session_id, provider = %provider_id, model = %model_name, "opening backend stream");
    let mut stream = tokio::select! {
        biased;
        _ = aborted(&mut abort_rx) => {
            fail_run(&tx, final_tx, RunFailure::Cancelled).await;
            return;
        }
        opened = backend.transport.open(&request) => match opened {
            Ok(stream) => stream,
            Err(err) => {
                fail_run(&tx, final_tx, run_failure_from_provider_error(&err)).await;
                return;
            }
        },
    };

    let mut state = normalizer.new_state();
    let mut tracker = UsageTracker::new(normalizer.usage_policy(), pricing);
    let mut output = RunOutput::default();
    let mut seq = 0_u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = aborted(&mut abort_rx) => {
                debug!(run_id = %run_id, provider = %provider_id, seq, "run cancelled");
                fail_run(&tx, final_tx, RunFailure::Cancelled).await;
                return;
            }
            _ = tx.closed() => {
                debug!(run_id = %run_id, provider = %provider_id, seq, "run stream receiver dropped");
                let _ = final_tx.send(Err(HarnessError::protocol_msg("run stream receiver dropped")));
                return;
            }
            next = next_chunk(&mut stream, options.chunk_timeout, &provider_id) => next,
        };

        let events = match next {
            Some(Ok(chunk)) => match normalizer.normalize_chunk(&chunk, &mut state) {
                Ok(events) => events,
                Err(err) => {
                    warn!(run_id = %run_id, provider = %provider_id, error = %err, "malformed chunk");
                    fail_run(&tx, final_tx, run_failure_from_provider_error(&err)).await;
                    return;
                }
            },
            Some(Err(err)) => {
                warn!(run_id = %run_id, provider = %provider_id, error = %err, "backend stream failed");
                fail_run(&tx, final_tx, run_failure_from_provider_error(&err)).await;
                return;
            }
            None => break,
        };

        for event in events {
            tracker.observe(&event);
            output.observe(&event);
            debug!(run_id = %run_id, provider = %provider_id, model = %model_name, seq, kind = ?event.kind(), "stream event");
            seq = seq.saturating_add(1);
            match deliver(&tx, event, &mut abort_rx).await {
                Delivery::Sent => {}
                Delivery::Cancelled => {
                    debug!(run_id = %run_id, provider = %provider_id, seq, "run cancelled mid-chunk");
                    fail_run(&tx, final_tx, RunFailure::Cancelled).await;
                    return;
                }
                Delivery::Closed => {
                    let _ = final_tx.send(Err(HarnessError::protocol_msg(
                        "run stream receiver dropped during output",
                    )));
                    return;
                }
            }
        }
    }

    // Transport closed cleanly: flush, close tool calls, then the terminal event.
    let mut trailing = normalizer.finish(&mut state);
    let finish = match trailing.last() {
        Some(ProviderEvent::Finish { .. }) => trailing.pop(),
        _ => None,
    };
    for event in trailing {
        tracker.observe(&event);
        output.observe(&event);
        match deliver(&tx, event, &mut abort_rx).await {
            Delivery::Sent => {}
            Delivery::Cancelled => {
                fail_run(&tx, final_tx, RunFailure::Cancelled).await;
                return;
            }
            Delivery::Closed => {
                let _ = final_tx.send(Err(HarnessError::protocol_msg(
                    "run stream receiver dropped before completion",
                )));
                return;
            }
        }
    }
    if *abort_rx.borrow() {
        fail_run(&tx, final_tx, RunFailure::Cancelled).await;
        return;
    }

    let finish_reason = match finish {
        Some(event) => {
            tracker.observe(&event);
            match event {
                ProviderEvent::Finish { finish_reason, .. } => finish_reason,
                _ => None,
            }
        }
        None => state.finish_reason().map(str::to_string),
    };
    let totals = tracker.totals();
    output.usage = totals;

    let committed = match &ledger {
        Some(ledger) => tracker.commit(ledger.as_ref(), &session_id).await,
        None => Ok(None),
    };
    match committed {
        Ok(session) => {
            output.session = session;
            let event = ProviderEvent::Finish {
                finish_reason,
                usage: totals.map(|totals| totals.as_snapshot()),
            };
            output.observe(&event);
            info!(
                run_id = %run_id,
                session_id = %session_id,
                provider = %provider_id,
                model = %model_name,
                events = seq,
                prompt_tokens = totals.map(|t| t.prompt_tokens),
                completion_tokens = totals.map(|t| t.completion_tokens),
                "run completed"
            );
            let _ = send_event(&tx, event).await;
            let _ = final_tx.send(Ok(output));
        }
        Err(err) => {
            warn!(run_id = %run_id, session_id = %session_id, error = %err, "run completed but usage was not persisted");
            let _ = send_event(
                &tx,
                ProviderEvent::Error {
                    error: err.as_run_failure(),
                },
            )
            .await;
            let _ = final_tx.send(Err(err));
        }
    }
}

/// Resolves once cancellation has been requested. Never resolves if every
/// abort handle is dropped without aborting.
async fn aborted(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn next_chunk(
    stream: &mut ChunkStream,
    limit: Option<Duration>,
    provider: &ProviderId,
) -> Option<Result<NativeChunk, ProviderError>> {
    let Some(limit) = limit else {
        return stream.next().await;
    };
    match tokio::time::timeout(limit, stream.next()).await {
        Ok(next) => next,
        Err(_) => Some(Err(ProviderError::transport(
            provider.clone(),
            format!("no chunk received within {}ms", limit.as_millis()),
        ))),
    }
}

async fn fail_run(
    tx: &mpsc::Sender<ProviderEvent>,
    final_tx: oneshot::Sender<Result<RunOutput, HarnessError>>,
    failure: RunFailure,
) {
    let _ = send_event(
        tx,
        ProviderEvent::Error {
            error: failure.clone(),
        },
    )
    .await;
    let _ = final_tx.send(Err(HarnessError::run_failed(failure)));
}

enum Delivery {
    Sent,
    Cancelled,
    Closed,
}

/// Sends one non-terminal event unless cancellation wins first, including
/// while the send waits on a full buffer.
async fn deliver(
    tx: &mpsc::Sender<ProviderEvent>,
    event: ProviderEvent,
    abort_rx: &mut watch::Receiver<bool>,
) -> Delivery {
    if *abort_rx.borrow() {
        return Delivery::Cancelled;
    }
    tokio::select! {
        biased;
        _ = aborted(abort_rx) => Delivery::Cancelled,
        sent = tx.send(event) => match sent {
            Ok(()) => Delivery::Sent,
            Err(_) => Delivery::Closed,
        },
    }
}

async fn send_event(tx: &mpsc::Sender<ProviderEvent>, event: ProviderEvent) -> bool {
    tx.send(event).await.is_ok()
}
