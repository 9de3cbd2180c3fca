//! Common types for the mesh messaging core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Opaque identifier for a durable agent session
pub type SessionId = String;

/// Unique identifier for a live connection
pub type ConnectionId = Uuid;

/// Target value addressing every connected agent
pub const BROADCAST_TARGET: &str = "ALL";

/// Kind of mesh message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Unprompted observation shared with the mesh
    ThoughtShare,
    /// Question directed at one or more agents
    Query,
    /// Answer to an earlier query
    Response,
    /// Lightweight receipt confirmation
    Acknowledgment,
    /// Mesh-level announcement (meeting invitations, lifecycle notices)
    SystemNotification,
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::ThoughtShare
    }
}

/// Delivery priority of a mesh message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

/// Presence status declared by an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Away,
    Busy,
}

impl Default for PresenceStatus {
    fn default() -> Self {
        PresenceStatus::Online
    }
}

/// A durable mesh message
///
/// Immutable once persisted, except for the append-only `read_by` set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshMessage {
    /// Unique message ID
    pub id: String,
    /// Kind of message
    pub message_type: MessageType,
    /// Message body
    pub content: String,
    /// Durable session of the sender
    pub from_session: SessionId,
    /// Recipient session, or [`BROADCAST_TARGET`] for everyone
    pub to_session: String,
    /// Display name of the sender
    pub participant_name: Option<String>,
    /// Delivery priority
    pub priority: Priority,
    /// Creation timestamp
    pub timestamp: DateTime<Utc>,
    /// Whether the sender expects a reply
    pub requires_response: bool,
    /// Message this one replies to, for threading
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_message_id: Option<String>,
    /// Structured payload (carries a meeting for meeting announcements)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    /// Sessions that have read this message
    #[serde(default)]
    pub read_by: HashSet<SessionId>,
}

impl MeshMessage {
    /// Create a new message with a generated ID and empty read set
    pub fn new(
        message_type: MessageType,
        content: impl Into<String>,
        from_session: impl Into<SessionId>,
        to_session: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type,
            content: content.into(),
            from_session: from_session.into(),
            to_session: to_session.into(),
            participant_name: None,
            priority: Priority::default(),
            timestamp: Utc::now(),
            requires_response: false,
            original_message_id: None,
            context: None,
            read_by: HashSet::new(),
        }
    }

    /// Whether this message addresses every connected agent
    pub fn is_broadcast(&self) -> bool {
        self.to_session == BROADCAST_TARGET
    }

    /// Record that a session has read this message
    pub fn mark_read(&mut self, session_id: &str) -> bool {
        self.read_by.insert(session_id.to_string())
    }
}

/// Ephemeral presence record, one per connected agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceRecord {
    /// Durable session this presence belongs to
    pub session_id: SessionId,
    /// Display name, if the agent declared one
    pub participant_name: Option<String>,
    /// When the current connection was established
    pub connected_at: DateTime<Utc>,
    /// Last heartbeat received on the current connection
    pub last_heartbeat: DateTime<Utc>,
    /// Capabilities the agent advertised at registration
    pub capabilities: HashSet<String>,
    /// Declared presence status
    pub status: PresenceStatus,
}

/// Interest filters declared at subscription time
///
/// Advisory metadata: delivery pushes every mesh message to every
/// subscribed connection regardless of declared filters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subscription {
    /// Message types the agent declared interest in
    pub message_types: Option<HashSet<MessageType>>,
    /// Priorities the agent declared interest in
    pub priorities: Option<HashSet<Priority>>,
}

/// How a message push reached a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryKind {
    /// Delivered as part of the mesh broadcast group
    Broadcast,
    /// Delivered directly to the addressed session
    Targeted,
}

/// Event pushed to a live connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LiveEvent {
    /// Another agent joined the mesh
    PresenceJoined {
        session_id: SessionId,
        participant_name: Option<String>,
        capabilities: HashSet<String>,
        timestamp: DateTime<Utc>,
    },
    /// An agent left the mesh (explicit disconnect or stale sweep)
    PresenceLeft {
        session_id: SessionId,
        participant_name: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// An agent declared a non-default status
    StatusChanged {
        session_id: SessionId,
        status: PresenceStatus,
        timestamp: DateTime<Utc>,
    },
    /// A mesh message pushed live
    Message {
        message: MeshMessage,
        delivery: DeliveryKind,
    },
}
