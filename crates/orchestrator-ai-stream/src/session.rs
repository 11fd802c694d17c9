use std::sync::Arc;

use crate::errors::HarnessError;
use crate::harness::HarnessInner;
use crate::ledger::Session;
use crate::model::ModelRef;
use crate::run::RunBuilder;

/// Runs started from this handle charge their usage to one ledger session.
///
/// The handle itself is cheap and holds no state beyond the session id.
#[derive(Clone)]
pub struct SessionHandle {
    pub(crate) harness: Arc<HarnessInner>,
    pub(crate) session_id: String,
}

impl SessionHandle {
    pub(crate) fn new(harness: Arc<HarnessInner>, session_id: String) -> Self {
        Self {
            harness,
            session_id,
        }
    }

    pub fn id(&self) -> &str {
        &self.session_id
    }

    /// Starts building a run for the given model.
    pub fn run(&self, model: ModelRef) -> RunBuilder {
        RunBuilder::new(self.harness.clone(), self.session_id.clone(), model)
    }

    /// Current ledger record for this session.
    pub async fn record(&self) -> Result<Session, HarnessError> {
        let ledger = self
            .harness
            .ledger()
            .ok_or_else(|| HarnessError::Config("no session ledger configured".into()))?;
        Ok(ledger.get(&self.session_id).await?)
    }
}
