use crate::ledger::LedgerError;
use crate::model::ProviderId;
use crate::usage::PendingUsageCommit;

/// Errors raised by a transport or normalizer before they are mapped onto the
/// public event stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Backend reported a failure (HTTP status, in-band error frame, auth).
    #[error("provider error ({provider}): {message}")]
    Provider {
        provider: ProviderId,
        message: String,
        status_code: Option<u16>,
    },
    /// Network read, connect or timeout failure.
    #[error("transport error ({provider}): {message}")]
    Transport {
        provider: ProviderId,
        message: String,
    },
    /// A native chunk could not be parsed or violated stream sequencing.
    #[error("protocol error ({provider}): {message}")]
    Protocol {
        provider: ProviderId,
        message: String,
    },
}

impl ProviderError {
    pub fn provider(
        provider: impl Into<ProviderId>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            status_code,
        }
    }

    pub fn transport(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn protocol(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Protocol {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn provider_id(&self) -> &ProviderId {
        match self {
            Self::Provider { provider, .. }
            | Self::Transport { provider, .. }
            | Self::Protocol { provider, .. } => provider,
        }
    }

    /// Human-readable message without the provider prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Provider { message, .. }
            | Self::Transport { message, .. }
            | Self::Protocol { message, .. } => message,
        }
    }
}

/// Terminal run failure carried by `ProviderEvent::Error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunFailure {
    #[error("provider failure ({provider}): {message}")]
    Provider {
        provider: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
    },
    #[error("transport failure ({provider}): {message}")]
    Transport { provider: String, message: String },
    /// Malformed chunk or invalid event sequencing.
    #[error("protocol failure: {message}")]
    Protocol { message: String },
    /// The stream completed but its usage could not be persisted.
    #[error("ledger failure: {message}")]
    Ledger { message: String },
    #[error("run cancelled")]
    Cancelled,
}

/// Top-level error type for the public run API.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HarnessError {
    #[error("config error: {0}")]
    Config(String),
    #[error("validation error: {0}")]
    Validation(String),
    /// No backend is registered under the requested provider id.
    #[error("backend not found: {provider}")]
    BackendNotFound { provider: ProviderId },
    #[error(transparent)]
    Provider(ProviderError),
    /// Terminal failure returned from a started run.
    #[error(transparent)]
    RunFailed(RunFailure),
    /// A direct ledger call failed.
    #[error(transparent)]
    Ledger(LedgerError),
    /// The usage update failed; `pending` can be retried against the ledger.
    #[error("session usage commit failed for {}: {error}", pending.session_id)]
    LedgerCommit {
        error: LedgerError,
        pending: PendingUsageCommit,
    },
    /// Internal protocol misuse or invariant violation.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl HarnessError {
    pub(crate) fn run_failed(failure: RunFailure) -> Self {
        Self::RunFailed(failure)
    }

    pub(crate) fn protocol_msg(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// The retryable usage update, if this error came from a failed commit.
    pub fn pending_commit(&self) -> Option<&PendingUsageCommit> {
        match self {
            Self::LedgerCommit { pending, .. } => Some(pending),
            _ => None,
        }
    }

    /// The failure to report on the event stream for this error.
    pub(crate) fn as_run_failure(&self) -> RunFailure {
        match self {
            Self::RunFailed(failure) => failure.clone(),
            Self::Provider(err) => run_failure_from_provider_error(err),
            Self::Ledger(error) | Self::LedgerCommit { error, .. } => RunFailure::Ledger {
                message: error.to_string(),
            },
            other => RunFailure::Protocol {
                message: other.to_string(),
            },
        }
    }
}

impl From<RunFailure> for HarnessError {
    fn from(value: RunFailure) -> Self {
        HarnessError::RunFailed(value)
    }
}

impl From<LedgerError> for HarnessError {
    fn from(value: LedgerError) -> Self {
        HarnessError::Ledger(value)
    }
}

impl From<ProviderError> for HarnessError {
    fn from(value: ProviderError) -> Self {
        HarnessError::Provider(value)
    }
}

pub(crate) fn run_failure_from_provider_error(err: &ProviderError) -> RunFailure {
    match err {
        ProviderError::Provider {
            provider,
            message,
            status_code,
        } => RunFailure::Provider {
            provider: provider.to_string(),
            message: message.clone(),
            status_code: *status_code,
        },
        ProviderError::Transport { provider, message } => RunFailure::Transport {
            provider: provider.to_string(),
            message: message.clone(),
        },
        ProviderError::Protocol { provider, message } => RunFailure::Protocol {
            message: format!("provider={provider}: {message}"),
        },
    }
}
