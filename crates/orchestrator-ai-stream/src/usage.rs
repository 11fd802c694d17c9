//! Token and cost accounting for a single run.

use tracing::{debug, warn};

use crate::errors::HarnessError;
use crate::event::ProviderEvent;
use crate::ledger::{LedgerError, Session, SessionLedger, UpdateSession};

/// Token/cost report. `None` means "not reported", which is distinct from 0.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UsageSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u64>,
    /// Cost in USD as reported by the backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl UsageSnapshot {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens: Some(prompt_tokens),
            completion_tokens: Some(completion_tokens),
            ..Self::default()
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Field-wise overwrite: reported fields replace, absent ones are kept.
    pub fn overwrite_with(&mut self, later: &Self) {
        self.prompt_tokens = later.prompt_tokens.or(self.prompt_tokens);
        self.completion_tokens = later.completion_tokens.or(self.completion_tokens);
        self.cache_read_tokens = later.cache_read_tokens.or(self.cache_read_tokens);
        self.cache_write_tokens = later.cache_write_tokens.or(self.cache_write_tokens);
        self.cost = later.cost.or(self.cost);
    }

    /// Field-wise sum.
    pub fn add_assign(&mut self, delta: &Self) {
        self.prompt_tokens = add_option(self.prompt_tokens, delta.prompt_tokens);
        self.completion_tokens = add_option(self.completion_tokens, delta.completion_tokens);
        self.cache_read_tokens = add_option(self.cache_read_tokens, delta.cache_read_tokens);
        self.cache_write_tokens = add_option(self.cache_write_tokens, delta.cache_write_tokens);
        self.cost = match (self.cost, delta.cost) {
            (Some(a), Some(b)) => Some(a + b),
            (a, b) => a.or(b),
        };
    }
}

fn add_option(lhs: Option<u64>, rhs: Option<u64>) -> Option<u64> {
    match (lhs, rhs) {
        (Some(a), Some(b)) => Some(a.saturating_add(b)),
        (a, b) => a.or(b),
    }
}

/// How successive `Usage` events within one stream combine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsagePolicy {
    /// Each report is cumulative; keep the latest value per field.
    #[default]
    Latest,
    /// Each report is an increment; add them up.
    Sum,
}

/// USD prices per million tokens, used when the backend reports no cost.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelPricing {
    pub prompt_per_million: f64,
    pub completion_per_million: f64,
    #[serde(default)]
    pub cache_read_per_million: f64,
    #[serde(default)]
    pub cache_write_per_million: f64,
}

impl ModelPricing {
    pub fn new(prompt_per_million: f64, completion_per_million: f64) -> Self {
        Self {
            prompt_per_million,
            completion_per_million,
            ..Self::default()
        }
    }

    pub fn cost_of(&self, usage: &UsageSnapshot) -> f64 {
        let per_token = |tokens: Option<u64>, price: f64| tokens.unwrap_or(0) as f64 * price / 1e6;
        per_token(usage.prompt_tokens, self.prompt_per_million)
            + per_token(usage.completion_tokens, self.completion_per_million)
            + per_token(usage.cache_read_tokens, self.cache_read_per_million)
            + per_token(usage.cache_write_tokens, self.cache_write_per_million)
    }
}

/// Final per-run totals handed to the ledger.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UsageTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub cost: f64,
}

impl UsageTotals {
    /// Tokens occupying the prompt side of the context window.
    pub fn context_prompt_tokens(&self) -> i64 {
        to_i64(self.prompt_tokens.saturating_add(self.cache_write_tokens))
    }

    pub fn context_completion_tokens(&self) -> i64 {
        to_i64(self.completion_tokens.saturating_add(self.cache_read_tokens))
    }

    pub fn as_snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            prompt_tokens: Some(self.prompt_tokens),
            completion_tokens: Some(self.completion_tokens),
            cache_read_tokens: Some(self.cache_read_tokens),
            cache_write_tokens: Some(self.cache_write_tokens),
            cost: Some(self.cost),
        }
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Observes one run's events and produces its single ledger update.
#[derive(Debug)]
pub struct UsageTracker {
    policy: UsagePolicy,
    pricing: Option<ModelPricing>,
    snapshot: Option<UsageSnapshot>,
}

impl UsageTracker {
    pub fn new(policy: UsagePolicy, pricing: Option<ModelPricing>) -> Self {
        Self {
            policy,
            pricing,
            snapshot: None,
        }
    }

    pub fn policy(&self) -> UsagePolicy {
        self.policy
    }

    /// Whether any usage has been observed.
    pub fn has_usage(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn snapshot(&self) -> Option<&UsageSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn observe(&mut self, event: &ProviderEvent) {
        match event {
            ProviderEvent::Usage { usage } => self.record(usage, self.policy),
            // a usage block on Finish is always a cumulative final report
            ProviderEvent::Finish {
                usage: Some(usage), ..
            } => self.record(usage, UsagePolicy::Latest),
            _ => {}
        }
    }

    fn record(&mut self, usage: &UsageSnapshot, policy: UsagePolicy) {
        if usage.is_empty() {
            return;
        }
        let current = self.snapshot.get_or_insert_with(UsageSnapshot::default);
        match policy {
            UsagePolicy::Latest => current.overwrite_with(usage),
            UsagePolicy::Sum => current.add_assign(usage),
        }
    }

    /// Totals so far, or `None` if nothing was reported.
    pub fn totals(&self) -> Option<UsageTotals> {
        let snapshot = self.snapshot.as_ref()?;
        let cost = snapshot.cost.unwrap_or_else(|| {
            self.pricing
                .map(|pricing| pricing.cost_of(snapshot))
                .unwrap_or(0.0)
        });
        Some(UsageTotals {
            prompt_tokens: snapshot.prompt_tokens.unwrap_or(0),
            completion_tokens: snapshot.completion_tokens.unwrap_or(0),
            cache_read_tokens: snapshot.cache_read_tokens.unwrap_or(0),
            cache_write_tokens: snapshot.cache_write_tokens.unwrap_or(0),
            cost,
        })
    }

    /// Converts the tracker into a pending commit for `session_id`.
    ///
    /// Returns `None` when no usage was observed, in which case the ledger
    /// must not be touched.
    pub fn into_commit(self, session_id: impl Into<String>) -> Option<PendingUsageCommit> {
        let totals = self.totals()?;
        Some(PendingUsageCommit {
            session_id: session_id.into(),
            totals,
        })
    }

    /// Performs the run's single ledger update.
    ///
    /// `Ok(None)` means no usage was observed and the ledger was not touched.
    /// On failure the computed totals travel back inside the error.
    pub async fn commit(
        self,
        ledger: &dyn SessionLedger,
        session_id: &str,
    ) -> Result<Option<Session>, HarnessError> {
        let Some(pending) = self.into_commit(session_id) else {
            debug!(session_id, "no usage observed; skipping session update");
            return Ok(None);
        };
        match pending.apply(ledger).await {
            Ok(session) => Ok(Some(session)),
            Err(error) => Err(HarnessError::LedgerCommit { error, pending }),
        }
    }
}

/// A computed but not yet persisted usage update.
///
/// Survives a failed write so the caller can [`retry`](Self::retry).
#[derive(Clone, Debug, PartialEq)]
pub struct PendingUsageCommit {
    pub session_id: String,
    pub totals: UsageTotals,
}

impl PendingUsageCommit {
    /// Read-modify-write: keeps title, todos and summary id; replaces token
    /// counts with this run's context view; adds this run's cost.
    pub async fn apply(&self, ledger: &dyn SessionLedger) -> Result<Session, LedgerError> {
        let current = ledger.get(&self.session_id).await?;
        let params = UpdateSession {
            prompt_tokens: self.totals.context_prompt_tokens(),
            completion_tokens: self.totals.context_completion_tokens(),
            cost: current.cost + self.totals.cost,
            ..UpdateSession::from_session(&current)
        };
        debug!(
            session_id = %self.session_id,
            prompt_tokens = params.prompt_tokens,
            completion_tokens = params.completion_tokens,
            cost = params.cost,
            "committing session usage"
        );
        ledger.update(params).await.inspect_err(|err| {
            warn!(session_id = %self.session_id, error = %err, "session usage commit failed");
        })
    }

    pub async fn retry(&self, ledger: &dyn SessionLedger) -> Result<Session, LedgerError> {
        self.apply(ledger).await
    }
}
