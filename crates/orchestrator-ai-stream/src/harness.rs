use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::HarnessError;
use crate::ledger::{CreateSession, SessionLedger};
use crate::model::ProviderId;
use crate::provider::{Backend, EventNormalizer};
use crate::session::SessionHandle;
use crate::transport::ChunkTransport;
use crate::usage::ModelPricing;

pub(crate) struct HarnessInner {
    backends: HashMap<ProviderId, Backend>,
    ledger: Option<Arc<dyn SessionLedger>>,
    pricing: HashMap<String, ModelPricing>,
}

impl HarnessInner {
    pub(crate) fn backend(&self, id: &ProviderId) -> Option<Backend> {
        self.backends.get(id).cloned()
    }

    pub(crate) fn ledger(&self) -> Option<Arc<dyn SessionLedger>> {
        self.ledger.clone()
    }

    pub(crate) fn pricing(&self, model: &str) -> Option<ModelPricing> {
        self.pricing.get(model).copied()
    }
}

/// Entry point: owns the backend registry, the session ledger and pricing.
#[derive(Clone)]
pub struct Harness {
    pub(crate) inner: Arc<HarnessInner>,
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// Handle for starting runs against an existing session id.
    pub fn session(&self, id: impl Into<String>) -> SessionHandle {
        SessionHandle::new(self.inner.clone(), id.into())
    }

    /// Creates the ledger record first, then returns its handle.
    pub async fn create_session(&self, params: CreateSession) -> Result<SessionHandle, HarnessError> {
        let ledger = self.require_ledger()?;
        let session = ledger.create(params).await?;
        Ok(self.session(session.id))
    }

    pub fn ledger(&self) -> Option<Arc<dyn SessionLedger>> {
        self.inner.ledger()
    }

    /// Registered backend ids, sorted.
    pub fn backend_ids(&self) -> Vec<ProviderId> {
        let mut ids: Vec<ProviderId> = self.inner.backends.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub(crate) fn require_ledger(&self) -> Result<Arc<dyn SessionLedger>, HarnessError> {
        self.inner
            .ledger()
            .ok_or_else(|| HarnessError::Config("no session ledger configured".into()))
    }
}

/// Registers backends, the ledger and pricing before creating a [`Harness`].
#[derive(Default)]
pub struct HarnessBuilder {
    backends: Vec<Backend>,
    ledger: Option<Arc<dyn SessionLedger>>,
    pricing: HashMap<String, ModelPricing>,
}

impl HarnessBuilder {
    /// Registers a backend under its normalizer's id. One backend per id.
    pub fn register_backend(mut self, backend: Backend) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn register(
        self,
        normalizer: Arc<dyn EventNormalizer>,
        transport: Arc<dyn ChunkTransport>,
    ) -> Self {
        self.register_backend(Backend::new(normalizer, transport))
    }

    /// Without a ledger, runs still report usage but persist nothing.
    pub fn ledger(mut self, ledger: Arc<dyn SessionLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Prices used when a backend reports tokens but no cost.
    pub fn pricing(mut self, model: impl Into<String>, pricing: ModelPricing) -> Self {
        self.pricing.insert(model.into(), pricing);
        self
    }

    /// Builds the harness, rejecting duplicate backend ids.
    pub fn build(self) -> Result<Harness, HarnessError> {
        let mut backends: HashMap<ProviderId, Backend> = HashMap::new();
        for backend in self.backends {
            let id = backend.id();
            if backends.contains_key(&id) {
                return Err(HarnessError::Config(format!(
                    "duplicate backend registration: {id}"
                )));
            }
            backends.insert(id, backend);
        }
        Ok(Harness {
            inner: Arc::new(HarnessInner {
                backends,
                ledger: self.ledger,
                pricing: self.pricing,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::transport::ScriptedTransport;
    use crate::vendors::anthropic::AnthropicNormalizer;
    use crate::vendors::openai::OpenAiChatNormalizer;

    fn openai() -> Backend {
        Backend::new(
            Arc::new(OpenAiChatNormalizer::default()),
            Arc::new(ScriptedTransport::default()),
        )
    }

    #[test]
    fn build_rejects_duplicate_backend_ids() {
        let result = Harness::builder()
            .register_backend(openai())
            .register_backend(openai())
            .build();
        assert!(
            matches!(result, Err(HarnessError::Config(message)) if message.contains("duplicate backend"))
        );
    }

    #[test]
    fn backends_are_keyed_by_normalizer_id() {
        let harness = Harness::builder()
            .register_backend(openai())
            .register(
                Arc::new(AnthropicNormalizer::default()),
                Arc::new(ScriptedTransport::default()),
            )
            .register(
                Arc::new(OpenAiChatNormalizer::default().with_id("openrouter")),
                Arc::new(ScriptedTransport::default()),
            )
            .build()
            .expect("harness");
        let ids: Vec<String> = harness
            .backend_ids()
            .into_iter()
            .map(|id| id.0)
            .collect();
        assert_eq!(ids, vec!["anthropic", "openai", "openrouter"]);
    }

    #[tokio::test]
    async fn create_session_requires_a_ledger() {
        let harness = Harness::builder().build().expect("harness");
        assert!(matches!(
            harness.create_session(CreateSession::new("s", "t")).await,
            Err(HarnessError::Config(_))
        ));

        let harness = Harness::builder()
            .ledger(Arc::new(InMemoryLedger::new()))
            .build()
            .expect("harness");
        let handle = harness
            .create_session(CreateSession::new("s", "t"))
            .await
            .expect("create");
        assert_eq!(handle.id(), "s");
    }
}
