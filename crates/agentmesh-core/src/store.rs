//! Durable store contracts and in-memory reference implementations
//!
//! The mesh consumes its durable state through these traits. Records are
//! TTL-bounded and survive process and connection restarts in production
//! deployments; the in-memory implementations here back tests and default
//! single-process runs, pruning expired records lazily on access.

use crate::{
    error::{MeshError, MeshResult},
    types::{MeshMessage, SessionId, BROADCAST_TARGET},
    DEFAULT_STORE_TTL_DAYS,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Durable session record, keyed by participant name
///
/// Sender attribution resolves through this record, not through ephemeral
/// presence, so a message is attributed correctly even immediately after a
/// reconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Stable session identifier
    pub session_id: SessionId,
    /// Participant the session belongs to
    pub participant_name: String,
    /// When the session was first registered
    pub created_at: DateTime<Utc>,
    /// Last activity heartbeat
    pub last_heartbeat: DateTime<Utc>,
}

/// Filter for querying stored messages
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    /// Messages addressed to this session (directly or via broadcast)
    pub for_session: Option<SessionId>,
    /// Only messages created after this instant
    pub since: Option<DateTime<Utc>>,
    /// Only messages this session has not read yet
    pub unread_by: Option<SessionId>,
    /// Cap on the number of returned messages
    pub limit: Option<usize>,
}

/// Durable session store
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create or refresh the session for a participant
    async fn register_session(&self, participant_name: &str) -> MeshResult<SessionRecord>;

    /// Look up the session registered for a participant
    async fn get_session_by_participant(&self, name: &str) -> MeshResult<Option<SessionRecord>>;

    /// Refresh a session's activity heartbeat
    async fn update_heartbeat(&self, session_id: &str) -> MeshResult<()>;

    /// Every live session record
    async fn get_all_sessions(&self) -> MeshResult<Vec<SessionRecord>>;
}

/// Durable message store
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message; must complete before any live push is attempted
    async fn store_message(&self, message: &MeshMessage) -> MeshResult<()>;

    /// Query stored messages, oldest first
    async fn query_messages(&self, filter: &MessageFilter) -> MeshResult<Vec<MeshMessage>>;

    /// Append a session to a message's read set
    ///
    /// Returns false when the message is unknown (e.g. already expired).
    async fn mark_read(&self, message_id: &str, session_id: &str) -> MeshResult<bool>;
}

/// In-memory session store with lazy TTL pruning
pub struct InMemorySessionStore {
    ttl: Duration,
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::with_ttl(Duration::days(DEFAULT_STORE_TTL_DAYS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn prune(&self, sessions: &mut HashMap<String, SessionRecord>, now: DateTime<Utc>) {
        let ttl = self.ttl;
        sessions.retain(|_, s| now - s.last_heartbeat <= ttl);
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn register_session(&self, participant_name: &str) -> MeshResult<SessionRecord> {
        if participant_name.trim().is_empty() {
            return Err(MeshError::Store("participant name must not be empty".to_string()));
        }
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        self.prune(&mut sessions, now);

        let record = sessions
            .entry(participant_name.to_string())
            .and_modify(|s| s.last_heartbeat = now)
            .or_insert_with(|| SessionRecord {
                session_id: Uuid::new_v4().to_string(),
                participant_name: participant_name.to_string(),
                created_at: now,
                last_heartbeat: now,
            })
            .clone();
        debug!(
            "Session {} active for participant {}",
            record.session_id, participant_name
        );
        Ok(record)
    }

    async fn get_session_by_participant(&self, name: &str) -> MeshResult<Option<SessionRecord>> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        self.prune(&mut sessions, now);
        Ok(sessions.get(name).cloned())
    }

    async fn update_heartbeat(&self, session_id: &str) -> MeshResult<()> {
        let mut sessions = self.sessions.write().await;
        for record in sessions.values_mut() {
            if record.session_id == session_id {
                record.last_heartbeat = Utc::now();
                return Ok(());
            }
        }
        Err(MeshError::Store(format!(
            "no session with id {}",
            session_id
        )))
    }

    async fn get_all_sessions(&self) -> MeshResult<Vec<SessionRecord>> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        self.prune(&mut sessions, now);
        Ok(sessions.values().cloned().collect())
    }
}

/// In-memory message store with lazy TTL pruning
pub struct InMemoryMessageStore {
    ttl: Duration,
    messages: RwLock<Vec<MeshMessage>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::with_ttl(Duration::days(DEFAULT_STORE_TTL_DAYS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            messages: RwLock::new(Vec::new()),
        }
    }

    fn prune(&self, messages: &mut Vec<MeshMessage>, now: DateTime<Utc>) {
        let ttl = self.ttl;
        messages.retain(|m| now - m.timestamp <= ttl);
    }

    /// Number of currently retained messages
    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    /// Whether the store holds no messages
    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_filter(message: &MeshMessage, filter: &MessageFilter) -> bool {
    if let Some(session) = &filter.for_session {
        let addressed = message.to_session == BROADCAST_TARGET || &message.to_session == session;
        if !addressed {
            return false;
        }
    }
    if let Some(since) = filter.since {
        if message.timestamp <= since {
            return false;
        }
    }
    if let Some(reader) = &filter.unread_by {
        if message.read_by.contains(reader) {
            return false;
        }
    }
    true
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn store_message(&self, message: &MeshMessage) -> MeshResult<()> {
        let now = Utc::now();
        let mut messages = self.messages.write().await;
        self.prune(&mut messages, now);
        messages.push(message.clone());
        Ok(())
    }

    async fn query_messages(&self, filter: &MessageFilter) -> MeshResult<Vec<MeshMessage>> {
        let now = Utc::now();
        let mut messages = self.messages.write().await;
        self.prune(&mut messages, now);

        let mut matched: Vec<MeshMessage> = messages
            .iter()
            .filter(|m| matches_filter(m, filter))
            .cloned()
            .collect();
        matched.sort_by_key(|m| m.timestamp);
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn mark_read(&self, message_id: &str, session_id: &str) -> MeshResult<bool> {
        let mut messages = self.messages.write().await;
        for message in messages.iter_mut() {
            if message.id == message_id {
                message.mark_read(session_id);
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageType;

    #[tokio::test]
    async fn session_registration_is_stable_per_participant() {
        let store = InMemorySessionStore::new();
        let first = store.register_session("alice").await.unwrap();
        let second = store.register_session("alice").await.unwrap();
        assert_eq!(first.session_id, second.session_id);

        let looked_up = store
            .get_session_by_participant("alice")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(looked_up.session_id, first.session_id);
        assert!(store
            .get_session_by_participant("nobody")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn expired_sessions_are_pruned() {
        let store = InMemorySessionStore::with_ttl(Duration::seconds(0));
        store.register_session("alice").await.unwrap();
        // Any later access sees the zero-TTL record as expired
        assert!(store.get_all_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn heartbeat_unknown_session_errors() {
        let store = InMemorySessionStore::new();
        assert!(store.update_heartbeat("missing").await.is_err());

        let record = store.register_session("alice").await.unwrap();
        assert!(store.update_heartbeat(&record.session_id).await.is_ok());
    }

    #[tokio::test]
    async fn query_honors_addressing_and_read_state() {
        let store = InMemoryMessageStore::new();
        let broadcast = MeshMessage::new(
            MessageType::ThoughtShare,
            "to everyone",
            "sess-a",
            BROADCAST_TARGET,
        );
        let direct = MeshMessage::new(MessageType::Query, "to b only", "sess-a", "sess-b");
        let elsewhere = MeshMessage::new(MessageType::Query, "to c only", "sess-a", "sess-c");
        store.store_message(&broadcast).await.unwrap();
        store.store_message(&direct).await.unwrap();
        store.store_message(&elsewhere).await.unwrap();

        let filter = MessageFilter {
            for_session: Some("sess-b".to_string()),
            ..Default::default()
        };
        let inbox = store.query_messages(&filter).await.unwrap();
        assert_eq!(inbox.len(), 2);

        assert!(store.mark_read(&direct.id, "sess-b").await.unwrap());
        let unread = store
            .query_messages(&MessageFilter {
                for_session: Some("sess-b".to_string()),
                unread_by: Some("sess-b".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].id, broadcast.id);
    }

    #[tokio::test]
    async fn mark_read_on_unknown_message_is_false() {
        let store = InMemoryMessageStore::new();
        assert!(!store.mark_read("ghost", "sess-a").await.unwrap());
    }

    #[tokio::test]
    async fn limit_caps_query_results() {
        let store = InMemoryMessageStore::new();
        for i in 0..5 {
            let message = MeshMessage::new(
                MessageType::ThoughtShare,
                format!("note {}", i),
                "sess-a",
                BROADCAST_TARGET,
            );
            store.store_message(&message).await.unwrap();
        }
        let page = store
            .query_messages(&MessageFilter {
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
    }
}
