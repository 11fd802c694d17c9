//! Session ledger contract and an in-memory implementation.
//!
//! The durable store lives outside this crate; runs only need the five
//! operations below. `InMemoryLedger` backs tests and single-process use.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Errors returned by a [`SessionLedger`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("session not found: {id}")]
    NotFound { id: String },
    #[error("session already exists: {id}")]
    AlreadyExists { id: String },
    /// The backing store failed.
    #[error("ledger storage error: {0}")]
    Storage(String),
}

/// A persisted conversation session.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Session {
    pub id: String,
    pub parent_session_id: Option<String>,
    pub title: String,
    pub message_count: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cost: f64,
    /// Unix seconds.
    pub updated_at: i64,
    /// Unix seconds.
    pub created_at: i64,
    pub summary_message_id: Option<String>,
    /// Opaque blob owned by callers.
    pub todos: String,
}

/// Parameters for [`SessionLedger::create`].
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CreateSession {
    pub id: String,
    pub parent_session_id: Option<String>,
    pub title: String,
    pub message_count: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cost: f64,
}

impl CreateSession {
    /// A top-level session with zeroed counters.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_session_id = Some(parent_id.into());
        self
    }
}

/// Parameters for [`SessionLedger::update`].
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UpdateSession {
    pub id: String,
    pub title: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub summary_message_id: Option<String>,
    pub cost: f64,
    pub todos: String,
}

impl UpdateSession {
    /// Starts from the current record so untouched fields round-trip.
    pub fn from_session(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            title: session.title.clone(),
            prompt_tokens: session.prompt_tokens,
            completion_tokens: session.completion_tokens,
            summary_message_id: session.summary_message_id.clone(),
            cost: session.cost,
            todos: session.todos.clone(),
        }
    }
}

/// Durable session store consumed by runs.
///
/// Implementations own atomicity of each call; a run performs at most one
/// `update` per completed stream.
#[async_trait::async_trait]
pub trait SessionLedger: Send + Sync {
    async fn create(&self, params: CreateSession) -> Result<Session, LedgerError>;

    async fn get(&self, id: &str) -> Result<Session, LedgerError>;

    async fn update(&self, params: UpdateSession) -> Result<Session, LedgerError>;

    /// Top-level sessions, most recently created first.
    async fn list(&self) -> Result<Vec<Session>, LedgerError>;

    async fn delete(&self, id: &str) -> Result<(), LedgerError>;
}

#[derive(Clone, Debug)]
struct StoredSession {
    seq: u64,
    session: Session,
}

/// Process-local [`SessionLedger`].
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    sessions: DashMap<String, StoredSession>,
    next_seq: AtomicU64,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait::async_trait]
impl SessionLedger for InMemoryLedger {
    async fn create(&self, params: CreateSession) -> Result<Session, LedgerError> {
        match self.sessions.entry(params.id.clone()) {
            Entry::Occupied(_) => Err(LedgerError::AlreadyExists { id: params.id }),
            Entry::Vacant(slot) => {
                let now = now_unix();
                let session = Session {
                    id: params.id,
                    parent_session_id: params.parent_session_id,
                    title: params.title,
                    message_count: params.message_count,
                    prompt_tokens: params.prompt_tokens,
                    completion_tokens: params.completion_tokens,
                    cost: params.cost,
                    updated_at: now,
                    created_at: now,
                    summary_message_id: None,
                    todos: String::new(),
                };
                slot.insert(StoredSession {
                    seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
                    session: session.clone(),
                });
                Ok(session)
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Session, LedgerError> {
        self.sessions
            .get(id)
            .map(|stored| stored.session.clone())
            .ok_or_else(|| LedgerError::NotFound { id: id.to_string() })
    }

    async fn update(&self, params: UpdateSession) -> Result<Session, LedgerError> {
        let mut stored = self
            .sessions
            .get_mut(&params.id)
            .ok_or_else(|| LedgerError::NotFound {
                id: params.id.clone(),
            })?;
        let session = &mut stored.session;
        session.title = params.title;
        session.prompt_tokens = params.prompt_tokens;
        session.completion_tokens = params.completion_tokens;
        session.summary_message_id = params.summary_message_id;
        session.cost = params.cost;
        session.todos = params.todos;
        session.updated_at = now_unix();
        Ok(session.clone())
    }

    async fn list(&self) -> Result<Vec<Session>, LedgerError> {
        let mut top_level: Vec<StoredSession> = self
            .sessions
            .iter()
            .filter(|entry| entry.session.parent_session_id.is_none())
            .map(|entry| entry.value().clone())
            .collect();
        top_level.sort_by(|a, b| {
            b.session
                .created_at
                .cmp(&a.session.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        Ok(top_level.into_iter().map(|stored| stored.session).collect())
    }

    async fn delete(&self, id: &str) -> Result<(), LedgerError> {
        self.sessions
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| LedgerError::NotFound { id: id.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get_round_trips_fields() {
        let ledger = InMemoryLedger::new();
        let created = ledger
            .create(CreateSession {
                id: "s1".into(),
                title: "first".into(),
                message_count: 2,
                prompt_tokens: 10,
                completion_tokens: 5,
                cost: 0.5,
                ..CreateSession::default()
            })
            .await
            .expect("create");
        assert_eq!(created.summary_message_id, None);
        assert!(created.todos.is_empty());
        assert_eq!(created.created_at, created.updated_at);

        let fetched = ledger.get("s1").await.expect("get");
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let ledger = InMemoryLedger::new();
        ledger.create(CreateSession::new("s1", "a")).await.expect("create");
        let err = ledger
            .create(CreateSession::new("s1", "b"))
            .await
            .expect_err("duplicate");
        assert_eq!(err, LedgerError::AlreadyExists { id: "s1".into() });
    }

    #[tokio::test]
    async fn update_replaces_mutable_fields() {
        let ledger = InMemoryLedger::new();
        let session = ledger.create(CreateSession::new("s1", "a")).await.expect("create");
        let updated = ledger
            .update(UpdateSession {
                title: "renamed".into(),
                prompt_tokens: 120,
                completion_tokens: 45,
                summary_message_id: Some("m9".into()),
                cost: 0.0031,
                todos: "[]".into(),
                ..UpdateSession::from_session(&session)
            })
            .await
            .expect("update");
        assert_eq!(updated.title, "renamed");
        assert_eq!(updated.prompt_tokens, 120);
        assert_eq!(updated.completion_tokens, 45);
        assert_eq!(updated.summary_message_id.as_deref(), Some("m9"));
        assert_eq!(updated.cost, 0.0031);
        assert_eq!(updated.todos, "[]");
        assert_eq!(updated.created_at, session.created_at);
    }

    #[tokio::test]
    async fn list_skips_children_and_orders_newest_first() {
        let ledger = InMemoryLedger::new();
        ledger.create(CreateSession::new("old", "a")).await.expect("create");
        ledger
            .create(CreateSession::new("child", "c").parent("old"))
            .await
            .expect("create");
        ledger.create(CreateSession::new("new", "b")).await.expect("create");

        let ids: Vec<String> = ledger
            .list()
            .await
            .expect("list")
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["new".to_string(), "old".to_string()]);
    }

    #[tokio::test]
    async fn missing_ids_report_not_found() {
        let ledger = InMemoryLedger::new();
        assert!(matches!(ledger.get("nope").await, Err(LedgerError::NotFound { .. })));
        assert!(matches!(ledger.delete("nope").await, Err(LedgerError::NotFound { .. })));
        assert!(matches!(
            ledger
                .update(UpdateSession {
                    id: "nope".into(),
                    ..UpdateSession::default()
                })
                .await,
            Err(LedgerError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn delete_removes_the_session() {
        let ledger = InMemoryLedger::new();
        ledger.create(CreateSession::new("s1", "a")).await.expect("create");
        ledger.delete("s1").await.expect("delete");
        assert!(ledger.is_empty());
    }
}
