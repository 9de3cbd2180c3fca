//! Integration tests for the mesh tool handlers

use agentmesh_core::{
    ChannelTransport, GuardRules, InMemoryMessageStore, InMemorySessionStore, LiveEvent,
    LiveTransport, MeshMessage, MeshResult, MessageFilter, MessageStore, PresenceRegistry,
    RegistryConfig, ResponseGuard, SessionStore,
};
use agentmesh_mcp::MeshTools;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

/// Message store that counts every trait invocation
struct SpyMessageStore {
    inner: InMemoryMessageStore,
    calls: AtomicUsize,
}

impl SpyMessageStore {
    fn new() -> Self {
        Self {
            inner: InMemoryMessageStore::new(),
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageStore for SpyMessageStore {
    async fn store_message(&self, message: &MeshMessage) -> MeshResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.store_message(message).await
    }

    async fn query_messages(&self, filter: &MessageFilter) -> MeshResult<Vec<MeshMessage>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.query_messages(filter).await
    }

    async fn mark_read(&self, message_id: &str, session_id: &str) -> MeshResult<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.mark_read(message_id, session_id).await
    }
}

/// Message store that appends to a shared sequence log
struct SequencedStore {
    inner: InMemoryMessageStore,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl MessageStore for SequencedStore {
    async fn store_message(&self, message: &MeshMessage) -> MeshResult<()> {
        self.log.lock().unwrap().push("store".to_string());
        self.inner.store_message(message).await
    }

    async fn query_messages(&self, filter: &MessageFilter) -> MeshResult<Vec<MeshMessage>> {
        self.inner.query_messages(filter).await
    }

    async fn mark_read(&self, message_id: &str, session_id: &str) -> MeshResult<bool> {
        self.inner.mark_read(message_id, session_id).await
    }
}

/// Transport that appends to the same shared sequence log
struct SequencedTransport {
    log: Arc<Mutex<Vec<String>>>,
}

impl LiveTransport for SequencedTransport {
    fn deliver(&self, _event: LiveEvent) -> MeshResult<()> {
        self.log.lock().unwrap().push("deliver".to_string());
        Ok(())
    }
}

struct Harness {
    registry: Arc<PresenceRegistry>,
    sessions: Arc<InMemorySessionStore>,
    messages: Arc<InMemoryMessageStore>,
    tools: MeshTools,
}

fn open_guard() -> Arc<ResponseGuard> {
    Arc::new(ResponseGuard::new(GuardRules {
        max_responses_per_hour: 1000,
        cooldown_between_responses: 0,
        duplicate_content_threshold: 1.1,
    }))
}

fn harness() -> Harness {
    let registry = Arc::new(PresenceRegistry::new(RegistryConfig::default()));
    let sessions = Arc::new(InMemorySessionStore::new());
    let messages = Arc::new(InMemoryMessageStore::new());
    let tools = MeshTools::new(
        Arc::clone(&registry),
        open_guard(),
        Arc::clone(&sessions) as Arc<dyn SessionStore>,
        Arc::clone(&messages) as Arc<dyn MessageStore>,
    );
    Harness {
        registry,
        sessions,
        messages,
        tools,
    }
}

/// Register a participant durably and connect them live, subscribed
async fn join_mesh(
    h: &Harness,
    name: &str,
) -> (String, tokio::sync::mpsc::UnboundedReceiver<LiveEvent>) {
    let record = h.sessions.register_session(name).await.unwrap();
    let (transport, rx) = ChannelTransport::channel();
    let ack = h
        .registry
        .register(
            record.session_id.clone(),
            Some(name.to_string()),
            HashSet::new(),
            transport,
        )
        .await;
    h.registry
        .subscribe(ack.connection_id, None, None)
        .await
        .unwrap();
    (record.session_id, rx)
}

fn broadcast_args(name: &str, content: &str, to: &str) -> Value {
    json!({
        "content": content,
        "participant_name": name,
        "to_session_id": to,
    })
}

#[tokio::test]
async fn broadcast_requires_registered_sender() {
    let h = harness();
    let result = h
        .tools
        .call_tool("mesh-broadcast", broadcast_args("ghost", "hello mesh", "ALL"))
        .await
        .unwrap();
    assert_eq!(result["success"], json!(false));
    assert!(result["instruction"]
        .as_str()
        .unwrap()
        .contains("register"));
}

#[tokio::test]
async fn broadcast_rejects_empty_content() {
    let h = harness();
    let result = h
        .tools
        .call_tool("mesh-broadcast", broadcast_args("alice", "   ", "ALL"))
        .await
        .unwrap();
    assert_eq!(result["success"], json!(false));
    assert_eq!(result["field"], json!("content"));
}

#[tokio::test]
async fn broadcast_to_unknown_target_lists_online_sessions() {
    let h = harness();
    let (sess_a, _rx_a) = join_mesh(&h, "alice").await;
    let (sess_b, _rx_b) = join_mesh(&h, "bob").await;

    let result = h
        .tools
        .call_tool(
            "mesh-broadcast",
            broadcast_args("alice", "anyone there?", "sess-nope"),
        )
        .await
        .unwrap();

    assert_eq!(result["success"], json!(false));
    let mut expected = vec![sess_a, sess_b];
    expected.sort();
    let available: Vec<String> = result["available_sessions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert_eq!(available, expected);
}

#[tokio::test]
async fn broadcast_with_no_peers_succeeds_with_zero_recipients() {
    let h = harness();
    let (_sess_a, _rx_a) = join_mesh(&h, "alice").await;

    let result = h
        .tools
        .call_tool(
            "mesh-broadcast",
            broadcast_args("alice", "is anyone else awake?", "ALL"),
        )
        .await
        .unwrap();

    assert_eq!(result["success"], json!(true));
    assert_eq!(result["recipient_count"], json!(0));
    assert!(result["instruction"]
        .as_str()
        .unwrap()
        .contains("no other agents"));
    // Durable history still has the message for later retrieval
    assert_eq!(h.messages.len().await, 1);
}

#[tokio::test]
async fn broadcast_reports_live_recipients() {
    let h = harness();
    let (_sess_a, _rx_a) = join_mesh(&h, "alice").await;
    let (_sess_b, mut rx_b) = join_mesh(&h, "bob").await;

    let result = h
        .tools
        .call_tool(
            "mesh-broadcast",
            broadcast_args("alice", "build finished on main", "ALL"),
        )
        .await
        .unwrap();

    assert_eq!(result["success"], json!(true));
    assert_eq!(result["recipient_count"], json!(1));
    assert_eq!(result["delivery_method"], json!("broadcast"));

    let mut saw_message = false;
    while let Ok(event) = rx_b.try_recv() {
        if let LiveEvent::Message { message, .. } = event {
            assert_eq!(message.content, "build finished on main");
            saw_message = true;
        }
    }
    assert!(saw_message);
}

#[tokio::test]
async fn direct_send_counts_one_recipient() {
    let h = harness();
    let (_sess_a, _rx_a) = join_mesh(&h, "alice").await;
    let (sess_b, _rx_b) = join_mesh(&h, "bob").await;

    let result = h
        .tools
        .call_tool(
            "mesh-broadcast",
            broadcast_args("alice", "ready for handoff?", &sess_b),
        )
        .await
        .unwrap();

    assert_eq!(result["success"], json!(true));
    assert_eq!(result["recipient_count"], json!(1));
    assert_eq!(result["delivery_method"], json!("direct"));
}

#[tokio::test]
async fn guard_holds_back_rapid_resend() {
    let registry = Arc::new(PresenceRegistry::new(RegistryConfig::default()));
    let sessions = Arc::new(InMemorySessionStore::new());
    let messages = Arc::new(InMemoryMessageStore::new());
    let guard = Arc::new(ResponseGuard::new(GuardRules {
        max_responses_per_hour: 1000,
        cooldown_between_responses: 300,
        duplicate_content_threshold: 1.1,
    }));
    let tools = MeshTools::new(
        Arc::clone(&registry),
        guard,
        Arc::clone(&sessions) as Arc<dyn SessionStore>,
        Arc::clone(&messages) as Arc<dyn MessageStore>,
    );
    sessions.register_session("alice").await.unwrap();

    let first = tools
        .call_tool(
            "mesh-broadcast",
            broadcast_args("alice", "first update from alice", "ALL"),
        )
        .await
        .unwrap();
    assert_eq!(first["success"], json!(true));

    let second = tools
        .call_tool(
            "mesh-broadcast",
            broadcast_args("alice", "second update right away", "ALL"),
        )
        .await
        .unwrap();
    assert_eq!(second["success"], json!(false));
    assert!(second["reason"].as_str().unwrap().contains("cooldown"));
    // The rejected message never reached the durable store
    assert_eq!(messages.len().await, 1);
}

#[tokio::test]
async fn disconnect_leaves_durable_messages_alone() {
    let registry = Arc::new(PresenceRegistry::new(RegistryConfig::default()));
    let sessions = Arc::new(InMemorySessionStore::new());
    let spy = Arc::new(SpyMessageStore::new());
    let _tools = MeshTools::new(
        Arc::clone(&registry),
        open_guard(),
        Arc::clone(&sessions) as Arc<dyn SessionStore>,
        Arc::clone(&spy) as Arc<dyn MessageStore>,
    );

    let (transport_a, _rx_a) = ChannelTransport::channel();
    let ack_a = registry
        .register("sess-a", Some("alice".to_string()), HashSet::new(), transport_a)
        .await;
    let (transport_b, _rx_b) = ChannelTransport::channel();
    registry
        .register("sess-b", Some("bob".to_string()), HashSet::new(), transport_b)
        .await;

    registry.disconnect(ack_a.connection_id).await.unwrap();

    // Ephemeral presence removal is independent from durable history
    assert_eq!(spy.call_count(), 0);
    let presence = registry.list_presence().await;
    assert_eq!(presence.len(), 1);
    assert_eq!(presence[0].session_id, "sess-b");
}

#[tokio::test]
async fn message_is_durable_before_any_live_push() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = Arc::new(PresenceRegistry::new(RegistryConfig::default()));
    let sessions = Arc::new(InMemorySessionStore::new());
    let store = Arc::new(SequencedStore {
        inner: InMemoryMessageStore::new(),
        log: Arc::clone(&log),
    });
    let tools = MeshTools::new(
        Arc::clone(&registry),
        open_guard(),
        Arc::clone(&sessions) as Arc<dyn SessionStore>,
        Arc::clone(&store) as Arc<dyn MessageStore>,
    );

    let record = sessions.register_session("alice").await.unwrap();
    let ack = registry
        .register(
            record.session_id.clone(),
            Some("alice".to_string()),
            HashSet::new(),
            Arc::new(SequencedTransport {
                log: Arc::clone(&log),
            }),
        )
        .await;
    registry.subscribe(ack.connection_id, None, None).await.unwrap();

    let result = tools
        .call_tool(
            "mesh-broadcast",
            broadcast_args("alice", "durability before delivery", "ALL"),
        )
        .await
        .unwrap();
    assert_eq!(result["success"], json!(true));

    let sequence = log.lock().unwrap().clone();
    assert_eq!(sequence, vec!["store".to_string(), "deliver".to_string()]);
}

#[tokio::test]
async fn who_is_online_filters_and_aggregates() {
    let h = harness();
    let record = h.sessions.register_session("alice").await.unwrap();
    let (transport, _rx) = ChannelTransport::channel();
    h.registry
        .register(
            record.session_id.clone(),
            Some("alice".to_string()),
            ["search".to_string(), "chat".to_string()].into_iter().collect(),
            transport,
        )
        .await;
    h.registry
        .register_virtual("sess-scout", Some("scout".to_string()), HashSet::new())
        .await;

    let everyone = h
        .tools
        .call_tool("mesh-who-is-online", json!({ "include_heartbeat": true }))
        .await
        .unwrap();
    assert_eq!(everyone["success"], json!(true));
    assert_eq!(everyone["total_online"], json!(2));
    assert_eq!(everyone["status_counts"]["online"], json!(2));
    assert_eq!(everyone["capability_counts"]["search"], json!(1));
    let first = &everyone["agents"][0];
    assert!(first["heartbeat_age_secs"].is_number());

    let searchers = h
        .tools
        .call_tool(
            "mesh-who-is-online",
            json!({ "filter_by_capability": "search" }),
        )
        .await
        .unwrap();
    assert_eq!(searchers["total_online"], json!(1));
    assert_eq!(
        searchers["agents"][0]["session_id"],
        json!(record.session_id)
    );
}

#[tokio::test]
async fn meeting_without_protocol_gets_canonical_phases() {
    let h = harness();
    let (_sess_a, _rx_a) = join_mesh(&h, "alice").await;

    let result = h
        .tools
        .call_tool(
            "mesh-create-meeting",
            json!({
                "title": "architecture sync",
                "purpose": "settle the storage layout",
                "agenda": [{ "topic": "storage layout" }],
            }),
        )
        .await
        .unwrap();

    assert_eq!(result["success"], json!(true));
    assert_eq!(
        result["phases"],
        json!(["GATHERING", "INTRODUCTION", "PRESENTATION", "DELIBERATION", "CONSENSUS"])
    );

    // The persisted announcement carries the meeting as context
    let stored = h
        .messages
        .query_messages(&MessageFilter::default())
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    let context = stored[0].context.as_ref().unwrap();
    let names: Vec<&str> = context["protocol"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        vec!["GATHERING", "INTRODUCTION", "PRESENTATION", "DELIBERATION", "CONSENSUS"]
    );
    assert_eq!(stored[0].message_type, agentmesh_core::MessageType::SystemNotification);
}

#[tokio::test]
async fn meeting_requires_agenda_and_sessions() {
    let h = harness();

    let no_sessions = h
        .tools
        .call_tool(
            "mesh-create-meeting",
            json!({
                "title": "orphan meeting",
                "purpose": "nobody is registered",
                "agenda": [{ "topic": "anything" }],
            }),
        )
        .await
        .unwrap();
    assert_eq!(no_sessions["success"], json!(false));

    h.sessions.register_session("alice").await.unwrap();
    let empty_agenda = h
        .tools
        .call_tool(
            "mesh-create-meeting",
            json!({
                "title": "empty meeting",
                "purpose": "nothing to discuss",
                "agenda": [],
            }),
        )
        .await
        .unwrap();
    assert_eq!(empty_agenda["success"], json!(false));
    assert_eq!(empty_agenda["field"], json!("agenda"));
}

#[tokio::test]
async fn meeting_creator_is_most_recently_active_session() {
    let h = harness();
    let _alice = h.sessions.register_session("alice").await.unwrap();
    // Bob registers later, so his heartbeat is the most recent
    let bob = h.sessions.register_session("bob").await.unwrap();

    let result = h
        .tools
        .call_tool(
            "mesh-create-meeting",
            json!({
                "title": "standup",
                "purpose": "daily coordination",
                "agenda": [{ "topic": "yesterday, today, blockers" }],
            }),
        )
        .await
        .unwrap();

    assert_eq!(result["success"], json!(true));
    assert_eq!(result["created_by"], json!(bob.session_id));
}

#[tokio::test]
async fn fetch_messages_supports_catchup_after_disconnect() {
    let h = harness();
    let (_sess_a, _rx_a) = join_mesh(&h, "alice").await;
    let bob = h.sessions.register_session("bob").await.unwrap();

    // Bob is offline; alice broadcasts and sends him a direct message
    h.tools
        .call_tool(
            "mesh-broadcast",
            broadcast_args("alice", "general announcement for the mesh", "ALL"),
        )
        .await
        .unwrap();
    // A direct send to an offline session is refused, so the broadcast is
    // what bob catches up on later
    let direct = h
        .tools
        .call_tool(
            "mesh-broadcast",
            broadcast_args("alice", "private note for bob", &bob.session_id),
        )
        .await
        .unwrap();
    assert_eq!(direct["success"], json!(false));

    let fetched = h
        .tools
        .call_tool(
            "mesh-fetch-messages",
            json!({ "participant_name": "bob", "mark_as_read": true }),
        )
        .await
        .unwrap();
    assert_eq!(fetched["success"], json!(true));
    assert_eq!(fetched["count"], json!(1));

    // Everything returned was marked read, so an unread-only fetch is empty
    let unread = h
        .tools
        .call_tool(
            "mesh-fetch-messages",
            json!({ "participant_name": "bob", "unread_only": true }),
        )
        .await
        .unwrap();
    assert_eq!(unread["count"], json!(0));
}

#[tokio::test]
async fn unknown_tool_is_an_error() {
    let h = harness();
    let err = h.tools.call_tool("mesh-shout", json!({})).await;
    assert!(matches!(
        err,
        Err(agentmesh_mcp::McpError::ToolNotFound(name)) if name == "mesh-shout"
    ));
}
