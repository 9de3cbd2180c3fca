//! Mesh tool handlers
//!
//! Implements the tool surface on top of the presence registry, the
//! response guard and the durable stores. Handlers report validation and
//! precondition failures as structured `success: false` results with
//! actionable guidance; only genuinely unexpected conditions surface as
//! errors to the dispatch layer.

use crate::error::{McpError, Result};
use agentmesh_core::{
    AgendaItem, Meeting, MeetingPhase, MeshMessage, MessageFilter, MessageStore, MessageType,
    PresenceRegistry, PresenceStatus, Priority, ResponseGuard, SessionStore, BROADCAST_TARGET,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

fn default_broadcast_target() -> String {
    BROADCAST_TARGET.to_string()
}

/// Parameters for the broadcast/direct-send tool
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BroadcastParams {
    /// Message body
    pub content: String,
    /// Recipient session, defaults to every connected agent
    #[serde(default = "default_broadcast_target")]
    pub to_session_id: String,
    /// Kind of message
    #[serde(default)]
    pub message_type: MessageType,
    /// Delivery priority
    #[serde(default)]
    pub priority: Priority,
    /// Sender's declared participant name
    pub participant_name: Option<String>,
    /// Whether the sender expects a reply
    #[serde(default)]
    pub requires_response: bool,
    /// Message this one replies to
    pub original_message_id: Option<String>,
}

/// Parameters for the presence discovery tool
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WhoIsOnlineParams {
    /// Include advertised capabilities per agent
    pub include_capabilities: Option<bool>,
    /// Only agents advertising this capability
    pub filter_by_capability: Option<String>,
    /// Only agents with this status
    pub filter_by_status: Option<PresenceStatus>,
    /// Include seconds since the last heartbeat per agent
    pub include_heartbeat: Option<bool>,
}

/// Parameters for the meeting creation tool
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateMeetingParams {
    /// Meeting title
    pub title: String,
    /// Why the meeting is being convened
    pub purpose: String,
    /// Ordered agenda, at least one item
    pub agenda: Vec<AgendaItem>,
    /// Custom protocol; the canonical five phases are used when omitted
    pub protocol: Option<Vec<MeetingPhase>>,
    /// Participants explicitly invited
    pub invited_participants: Option<Vec<String>>,
    /// Minimum attendance before the meeting proceeds
    pub required_for_quorum: Option<u32>,
    /// Scheduled start, if not immediate
    pub starts_at: Option<DateTime<Utc>>,
    /// Expected overall duration
    pub estimated_duration_minutes: Option<u32>,
}

/// Parameters for the catch-up retrieval tool
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchMessagesParams {
    /// Caller's declared participant name
    pub participant_name: String,
    /// Only messages created after this instant
    pub since: Option<DateTime<Utc>>,
    /// Only messages the caller has not read yet
    #[serde(default)]
    pub unread_only: bool,
    /// Cap on the number of returned messages
    pub limit: Option<usize>,
    /// Mark returned messages as read by the caller
    #[serde(default)]
    pub mark_as_read: bool,
}

/// Mesh tools for MCP
pub struct MeshTools {
    registry: Arc<PresenceRegistry>,
    guard: Arc<ResponseGuard>,
    sessions: Arc<dyn SessionStore>,
    messages: Arc<dyn MessageStore>,
}

impl MeshTools {
    /// Create the tool handlers
    pub fn new(
        registry: Arc<PresenceRegistry>,
        guard: Arc<ResponseGuard>,
        sessions: Arc<dyn SessionStore>,
        messages: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            registry,
            guard,
            sessions,
            messages,
        }
    }

    /// Dispatch a tool call by name
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        match name {
            "mesh-broadcast" => {
                let params = parse_params::<BroadcastParams>(arguments)?;
                self.mesh_broadcast(params).await
            }
            "mesh-who-is-online" => {
                let params = parse_params::<WhoIsOnlineParams>(arguments)?;
                self.mesh_who_is_online(params).await
            }
            "mesh-create-meeting" => {
                let params = parse_params::<CreateMeetingParams>(arguments)?;
                self.mesh_create_meeting(params).await
            }
            "mesh-fetch-messages" => {
                let params = parse_params::<FetchMessagesParams>(arguments)?;
                self.mesh_fetch_messages(params).await
            }
            other => Err(McpError::ToolNotFound(other.to_string())),
        }
    }

    /// Send a message to the whole mesh or to one online session
    pub async fn mesh_broadcast(&self, params: BroadcastParams) -> Result<Value> {
        if params.content.trim().is_empty() {
            return Ok(failure_field("content must not be empty", "content"));
        }

        let participant = match params.participant_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => {
                return Ok(json!({
                    "success": false,
                    "error": "participant_name is required",
                    "instruction": "register a session and subscribe to the mesh before sending messages",
                }));
            }
        };

        let sender = match self.sessions.get_session_by_participant(&participant).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                return Ok(json!({
                    "success": false,
                    "error": format!("no registered session for participant '{}'", participant),
                    "instruction": "register a session and subscribe to the mesh before sending messages",
                }));
            }
            Err(e) => {
                return Ok(failure(format!("session store unavailable: {}", e)));
            }
        };

        if params.to_session_id != BROADCAST_TARGET
            && !self.registry.is_online(&params.to_session_id).await
        {
            let mut available = self.registry.online_sessions().await;
            available.sort();
            return Ok(json!({
                "success": false,
                "error": format!("session '{}' is not online", params.to_session_id),
                "available_sessions": available,
                "instruction": "address one of the listed sessions, or use \"ALL\" to broadcast",
            }));
        }

        let decision = self.guard.can_respond(&sender.session_id, &params.content);
        if !decision.allowed {
            return Ok(json!({
                "success": false,
                "error": "message held back by the response guard",
                "reason": decision.reason,
            }));
        }

        let mut message = MeshMessage::new(
            params.message_type,
            params.content.clone(),
            sender.session_id.clone(),
            params.to_session_id.clone(),
        );
        message.participant_name = Some(participant.clone());
        message.priority = params.priority;
        message.requires_response = params.requires_response;
        message.original_message_id = params.original_message_id.clone();

        // History is authoritative: the message must be durable before any
        // live push is attempted
        if let Err(e) = self.messages.store_message(&message).await {
            return Ok(failure(format!("failed to persist message: {}", e)));
        }
        self.guard
            .record_response(&sender.session_id, &params.content, &message.id);
        if let Err(e) = self.sessions.update_heartbeat(&sender.session_id).await {
            debug!("Heartbeat refresh for {} failed: {}", sender.session_id, e);
        }

        let live_deliveries = self.registry.push_message(&message).await;

        let (recipient_count, delivery_method) = if message.is_broadcast() {
            let connected = self.registry.connected_count().await;
            let sender_online = self.registry.is_online(&sender.session_id).await;
            (connected.saturating_sub(sender_online as usize), "broadcast")
        } else {
            (1, "direct")
        };

        let instruction = if recipient_count == 0 {
            "no other agents are currently connected; the message is stored and can be retrieved later"
        } else {
            "pushed live to connected agents; disconnected agents can retrieve it from history"
        };

        info!(
            "Message {} from {} to {} ({} live deliveries)",
            message.id, participant, message.to_session, live_deliveries
        );

        Ok(json!({
            "success": true,
            "message_id": message.id,
            "message_type": message.message_type,
            "recipient_count": recipient_count,
            "delivery_method": delivery_method,
            "live_deliveries": live_deliveries,
            "instruction": instruction,
        }))
    }

    /// Report which agents are currently online
    pub async fn mesh_who_is_online(&self, params: WhoIsOnlineParams) -> Result<Value> {
        let now = Utc::now();
        let include_capabilities = params.include_capabilities.unwrap_or(true);
        let include_heartbeat = params.include_heartbeat.unwrap_or(false);

        let mut agents = self.registry.list_presence().await;
        if let Some(capability) = &params.filter_by_capability {
            agents.retain(|p| p.capabilities.contains(capability));
        }
        if let Some(status) = params.filter_by_status {
            agents.retain(|p| p.status == status);
        }
        agents.sort_by(|a, b| a.session_id.cmp(&b.session_id));

        let mut status_counts: BTreeMap<&str, usize> = BTreeMap::new();
        let mut capability_counts: BTreeMap<String, usize> = BTreeMap::new();
        for agent in &agents {
            *status_counts.entry(status_name(agent.status)).or_insert(0) += 1;
            for capability in &agent.capabilities {
                *capability_counts.entry(capability.clone()).or_insert(0) += 1;
            }
        }

        let listing: Vec<Value> = agents
            .iter()
            .map(|agent| {
                let mut entry = json!({
                    "session_id": agent.session_id,
                    "participant_name": agent.participant_name,
                    "status": agent.status,
                    "connected_at": agent.connected_at,
                });
                if include_capabilities {
                    let mut caps: Vec<&String> = agent.capabilities.iter().collect();
                    caps.sort();
                    entry["capabilities"] = json!(caps);
                }
                if include_heartbeat {
                    entry["heartbeat_age_secs"] =
                        json!((now - agent.last_heartbeat).num_seconds());
                }
                entry
            })
            .collect();

        Ok(json!({
            "success": true,
            "total_online": listing.len(),
            "agents": listing,
            "status_counts": status_counts,
            "capability_counts": capability_counts,
        }))
    }

    /// Convene a meeting and announce it to the mesh
    pub async fn mesh_create_meeting(&self, params: CreateMeetingParams) -> Result<Value> {
        if params.title.trim().is_empty() {
            return Ok(failure_field("title must not be empty", "title"));
        }
        if params.agenda.is_empty() {
            return Ok(failure_field(
                "agenda must contain at least one topic",
                "agenda",
            ));
        }

        // The most recently active durable session convenes the meeting
        let creator = match self.sessions.get_all_sessions().await {
            Ok(sessions) => match sessions.into_iter().max_by_key(|s| s.last_heartbeat) {
                Some(record) => record,
                None => {
                    return Ok(json!({
                        "success": false,
                        "error": "no registered sessions",
                        "instruction": "register a session before convening a meeting",
                    }));
                }
            },
            Err(e) => return Ok(failure(format!("session store unavailable: {}", e))),
        };

        let mut meeting = Meeting::new(
            params.title.clone(),
            params.purpose.clone(),
            params.agenda.clone(),
            params.protocol.clone(),
            creator.session_id.clone(),
        );
        meeting.invited_participants = params.invited_participants.clone();
        meeting.required_for_quorum = params.required_for_quorum;
        meeting.starts_at = params.starts_at;
        meeting.estimated_duration_minutes = params.estimated_duration_minutes;

        let phases: Vec<String> = meeting
            .phase_names()
            .into_iter()
            .map(str::to_string)
            .collect();

        let context = serde_json::to_value(&meeting)
            .map_err(|e| McpError::Internal(format!("failed to encode meeting: {}", e)))?;

        let mut message = MeshMessage::new(
            MessageType::SystemNotification,
            format!("Meeting convened: {} ({})", meeting.title, meeting.purpose),
            creator.session_id.clone(),
            BROADCAST_TARGET,
        );
        message.participant_name = Some(creator.participant_name.clone());
        message.priority = Priority::High;
        message.context = Some(context);

        if let Err(e) = self.messages.store_message(&message).await {
            return Ok(failure(format!("failed to persist meeting announcement: {}", e)));
        }
        let live_deliveries = self.registry.push_message(&message).await;

        let connected = self.registry.connected_count().await;
        let creator_online = self.registry.is_online(&creator.session_id).await;

        info!(
            "Meeting {} convened by {} ({} phases)",
            meeting.meeting_id,
            creator.participant_name,
            meeting.protocol.len()
        );

        Ok(json!({
            "success": true,
            "meeting_id": meeting.meeting_id,
            "message_id": message.id,
            "created_by": creator.session_id,
            "phases": phases,
            "recipient_count": connected.saturating_sub(creator_online as usize),
            "live_deliveries": live_deliveries,
            "instruction": "participants follow the published protocol phases cooperatively",
        }))
    }

    /// Retrieve stored messages for a participant, for catch-up after a disconnect
    pub async fn mesh_fetch_messages(&self, params: FetchMessagesParams) -> Result<Value> {
        let caller = match self
            .sessions
            .get_session_by_participant(&params.participant_name)
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) => {
                return Ok(json!({
                    "success": false,
                    "error": format!(
                        "no registered session for participant '{}'",
                        params.participant_name
                    ),
                    "instruction": "register a session before fetching messages",
                }));
            }
            Err(e) => return Ok(failure(format!("session store unavailable: {}", e))),
        };

        let filter = MessageFilter {
            for_session: Some(caller.session_id.clone()),
            since: params.since,
            unread_by: params.unread_only.then(|| caller.session_id.clone()),
            limit: params.limit,
        };
        let messages = match self.messages.query_messages(&filter).await {
            Ok(messages) => messages,
            Err(e) => return Ok(failure(format!("message store unavailable: {}", e))),
        };

        if params.mark_as_read {
            for message in &messages {
                if let Err(e) = self
                    .messages
                    .mark_read(&message.id, &caller.session_id)
                    .await
                {
                    debug!("Marking {} read failed: {}", message.id, e);
                }
            }
        }
        if let Err(e) = self.sessions.update_heartbeat(&caller.session_id).await {
            debug!("Heartbeat refresh for {} failed: {}", caller.session_id, e);
        }

        Ok(json!({
            "success": true,
            "session_id": caller.session_id,
            "count": messages.len(),
            "messages": messages,
        }))
    }

    /// Descriptors for every exposed tool
    pub fn list_tools(&self) -> Vec<Value> {
        vec![
            json!({
                "name": "mesh-broadcast",
                "description": "Send a message to every connected agent, or directly to one online session",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "content": { "type": "string", "description": "Message body" },
                        "to_session_id": { "type": "string", "description": "Recipient session ID, or \"ALL\"", "default": "ALL" },
                        "message_type": { "type": "string", "enum": ["thought_share", "query", "response", "acknowledgment", "system_notification"], "default": "thought_share" },
                        "priority": { "type": "string", "enum": ["low", "medium", "high", "urgent"], "default": "medium" },
                        "participant_name": { "type": "string", "description": "Sender's registered participant name" },
                        "requires_response": { "type": "boolean", "default": false },
                        "original_message_id": { "type": "string", "description": "Message being replied to" }
                    },
                    "required": ["content", "participant_name"]
                }
            }),
            json!({
                "name": "mesh-who-is-online",
                "description": "List currently-connected agents with status and capability aggregates",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "include_capabilities": { "type": "boolean", "default": true },
                        "filter_by_capability": { "type": "string" },
                        "filter_by_status": { "type": "string", "enum": ["online", "away", "busy"] },
                        "include_heartbeat": { "type": "boolean", "default": false }
                    }
                }
            }),
            json!({
                "name": "mesh-create-meeting",
                "description": "Convene a structured meeting and announce it to the mesh",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "purpose": { "type": "string" },
                        "agenda": { "type": "array", "items": { "type": "object" }, "description": "Ordered topics, at least one" },
                        "protocol": { "type": "array", "items": { "type": "object" }, "description": "Custom phases; canonical five-phase protocol when omitted" },
                        "invited_participants": { "type": "array", "items": { "type": "string" } },
                        "required_for_quorum": { "type": "integer" },
                        "starts_at": { "type": "string", "format": "date-time" },
                        "estimated_duration_minutes": { "type": "integer" }
                    },
                    "required": ["title", "purpose", "agenda"]
                }
            }),
            json!({
                "name": "mesh-fetch-messages",
                "description": "Retrieve stored mesh messages for the caller, for catch-up after a disconnect",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "participant_name": { "type": "string" },
                        "since": { "type": "string", "format": "date-time" },
                        "unread_only": { "type": "boolean", "default": false },
                        "limit": { "type": "integer" },
                        "mark_as_read": { "type": "boolean", "default": false }
                    },
                    "required": ["participant_name"]
                }
            }),
        ]
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T> {
    serde_json::from_value(arguments).map_err(|e| McpError::InvalidParams(e.to_string()))
}

fn failure(error: impl Into<String>) -> Value {
    json!({ "success": false, "error": error.into() })
}

fn failure_field(error: &str, field: &str) -> Value {
    json!({ "success": false, "error": error, "field": field })
}

fn status_name(status: PresenceStatus) -> &'static str {
    match status {
        PresenceStatus::Online => "online",
        PresenceStatus::Away => "away",
        PresenceStatus::Busy => "busy",
    }
}
