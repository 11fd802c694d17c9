//! Common imports for typical harness usage.
//!
//! This module exports the most frequently used builder/runtime types so
//! examples and application code need fewer import lines.
pub use crate::{
    AbortHandle, CreateSession, Harness, HarnessBuilder, HarnessError, InMemoryLedger, ModelRef,
    ProviderEvent, ProviderId, RunBuilder, RunFailure, RunOutput, RunStream, Session,
    SessionHandle, SessionLedger, UsageTotals,
};
