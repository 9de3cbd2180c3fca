//! Presence and connection registry
//!
//! Tracks which agents are live, broadcasts lifecycle events, and delivers
//! mesh messages to currently-reachable recipients. All registry state
//! lives behind a single lock: registration, heartbeats, disconnection,
//! the stale sweep and message push all read-modify-write the same maps
//! and must not interleave.
//!
//! Live push is fire-and-forget. The durable message store, written by the
//! caller before push is attempted, is the only delivery guarantee; an
//! agent that is offline at push time catches up from the store later.

use crate::{
    error::{MeshError, MeshResult},
    types::*,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    Notify, RwLock,
};
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Configuration for the registry's liveness checks
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Seconds between stale-connection sweep ticks
    pub sweep_interval_secs: u64,
    /// Heartbeat age beyond which a connection is considered stale
    pub stale_after_secs: i64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 30,
            stale_after_secs: 60,
        }
    }
}

/// Live transport handle for a connection
///
/// Delivery must be non-blocking and failure-isolated: a slow or failed
/// recipient never blocks delivery to others.
pub trait LiveTransport: Send + Sync {
    /// Push one event to the connected agent
    fn deliver(&self, event: LiveEvent) -> MeshResult<()>;
}

/// Transport backed by an unbounded channel
pub struct ChannelTransport {
    tx: UnboundedSender<LiveEvent>,
}

impl ChannelTransport {
    /// Create a transport and the receiving half for the connected agent
    pub fn channel() -> (Arc<Self>, UnboundedReceiver<LiveEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl LiveTransport for ChannelTransport {
    fn deliver(&self, event: LiveEvent) -> MeshResult<()> {
        self.tx
            .send(event)
            .map_err(|_| MeshError::Transport("receiver dropped".to_string()))
    }
}

/// No-op transport for out-of-band registrations
///
/// Lets request/response-style callers appear present without holding a
/// live connection; events pushed to them are discarded.
pub struct NullTransport;

impl LiveTransport for NullTransport {
    fn deliver(&self, _event: LiveEvent) -> MeshResult<()> {
        Ok(())
    }
}

/// Acknowledgment returned to a registering agent
#[derive(Debug, Clone)]
pub struct RegistrationAck {
    /// Connection ID assigned to the new registration
    pub connection_id: ConnectionId,
    /// Session the connection is bound to
    pub session_id: SessionId,
    /// Number of presences currently in the mesh, including the caller
    pub peers_online: usize,
}

/// One live connection
struct ConnectionEntry {
    connection_id: ConnectionId,
    session_id: SessionId,
    participant_name: Option<String>,
    connected_at: DateTime<Utc>,
    last_heartbeat: DateTime<Utc>,
    subscription: Option<Subscription>,
    transport: Arc<dyn LiveTransport>,
}

/// Registry maps, guarded as one unit
#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    by_session: HashMap<SessionId, ConnectionId>,
    presence: HashMap<SessionId, PresenceRecord>,
}

impl RegistryInner {
    /// Transports of every connection except the given one
    fn peer_transports(&self, except: ConnectionId) -> Vec<Arc<dyn LiveTransport>> {
        self.connections
            .values()
            .filter(|c| c.connection_id != except)
            .map(|c| Arc::clone(&c.transport))
            .collect()
    }

    /// Drop the prior connection for a session, if any (last registration wins)
    fn replace_session(&mut self, session_id: &str) -> Option<ConnectionId> {
        let prior = self.by_session.get(session_id).copied()?;
        self.connections.remove(&prior);
        Some(prior)
    }

    /// Remove a connection and its presence, returning what to announce
    fn remove_connection(&mut self, connection_id: ConnectionId) -> Option<ConnectionEntry> {
        let entry = self.connections.remove(&connection_id)?;
        if self.by_session.get(&entry.session_id) == Some(&connection_id) {
            self.by_session.remove(&entry.session_id);
            self.presence.remove(&entry.session_id);
        }
        Some(entry)
    }
}

/// Presence and connection registry
pub struct PresenceRegistry {
    config: Arc<RegistryConfig>,
    inner: Arc<RwLock<RegistryInner>>,
    is_running: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
}

impl PresenceRegistry {
    /// Create a registry with the given configuration
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config: Arc::new(config),
            inner: Arc::new(RwLock::new(RegistryInner::default())),
            is_running: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
        }
    }

    /// Register a live connection for a session
    ///
    /// A new registration for a session that already has a connection
    /// replaces the prior mapping; the replaced transport handle is not
    /// actively closed. All other live connections are notified of the
    /// new presence.
    pub async fn register(
        &self,
        session_id: impl Into<SessionId>,
        participant_name: Option<String>,
        capabilities: HashSet<String>,
        transport: Arc<dyn LiveTransport>,
    ) -> RegistrationAck {
        let session_id = session_id.into();
        let now = Utc::now();
        let connection_id = Uuid::new_v4();

        let (peers, ack) = {
            let mut inner = self.inner.write().await;

            // Last registration wins for the session
            if let Some(prior) = inner.replace_session(&session_id) {
                debug!(
                    "Replacing connection {} for session {}",
                    prior, session_id
                );
            }

            inner.connections.insert(
                connection_id,
                ConnectionEntry {
                    connection_id,
                    session_id: session_id.clone(),
                    participant_name: participant_name.clone(),
                    connected_at: now,
                    last_heartbeat: now,
                    subscription: None,
                    transport,
                },
            );
            inner.by_session.insert(session_id.clone(), connection_id);
            inner.presence.insert(
                session_id.clone(),
                PresenceRecord {
                    session_id: session_id.clone(),
                    participant_name: participant_name.clone(),
                    connected_at: now,
                    last_heartbeat: now,
                    capabilities: capabilities.clone(),
                    status: PresenceStatus::Online,
                },
            );

            let ack = RegistrationAck {
                connection_id,
                session_id: session_id.clone(),
                peers_online: inner.presence.len(),
            };
            (inner.peer_transports(connection_id), ack)
        };

        let event = LiveEvent::PresenceJoined {
            session_id,
            participant_name,
            capabilities,
            timestamp: now,
        };
        Self::fan_out(&peers, &event);

        info!(
            "Registered connection {} ({} online)",
            ack.connection_id, ack.peers_online
        );
        ack
    }

    /// Register a presence without a live transport
    ///
    /// First-class variant of a connection whose transport is a no-op
    /// stand-in, so presence and discovery logic stay uniform for
    /// request/response-style callers.
    pub async fn register_virtual(
        &self,
        session_id: impl Into<SessionId>,
        participant_name: Option<String>,
        capabilities: HashSet<String>,
    ) -> RegistrationAck {
        self.register(
            session_id,
            participant_name,
            capabilities,
            Arc::new(NullTransport),
        )
        .await
    }

    /// Join the mesh broadcast group, with optional advisory filters
    pub async fn subscribe(
        &self,
        connection_id: ConnectionId,
        message_types: Option<HashSet<MessageType>>,
        priorities: Option<HashSet<Priority>>,
    ) -> MeshResult<()> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .connections
            .get_mut(&connection_id)
            .ok_or(MeshError::ConnectionNotFound(connection_id))?;
        entry.subscription = Some(Subscription {
            message_types,
            priorities,
        });
        debug!("Connection {} subscribed to mesh messages", connection_id);
        Ok(())
    }

    /// Record a heartbeat for a session
    ///
    /// Updates both the connection's and the presence's heartbeat. A
    /// non-default status is announced to the other live connections.
    pub async fn heartbeat(
        &self,
        session_id: &str,
        status: Option<PresenceStatus>,
    ) -> MeshResult<()> {
        self.heartbeat_at(session_id, status, Utc::now()).await
    }

    /// Heartbeat at an explicit point in time
    pub async fn heartbeat_at(
        &self,
        session_id: &str,
        status: Option<PresenceStatus>,
        now: DateTime<Utc>,
    ) -> MeshResult<()> {
        let status = status.unwrap_or_default();
        let peers = {
            let mut inner = self.inner.write().await;
            let connection_id = *inner
                .by_session
                .get(session_id)
                .ok_or_else(|| MeshError::SessionNotConnected(session_id.to_string()))?;

            if let Some(conn) = inner.connections.get_mut(&connection_id) {
                conn.last_heartbeat = now;
            }
            if let Some(presence) = inner.presence.get_mut(session_id) {
                presence.last_heartbeat = now;
                presence.status = status;
            }

            if status != PresenceStatus::Online {
                inner.peer_transports(connection_id)
            } else {
                Vec::new()
            }
        };

        if !peers.is_empty() {
            let event = LiveEvent::StatusChanged {
                session_id: session_id.to_string(),
                status,
                timestamp: now,
            };
            Self::fan_out(&peers, &event);
        }
        Ok(())
    }

    /// Remove a connection and its presence, announcing the departure
    ///
    /// Touches only ephemeral state: durable session and message records
    /// are left alone so the agent can discover missed messages on
    /// reconnect.
    pub async fn disconnect(&self, connection_id: ConnectionId) -> MeshResult<()> {
        let (entry, peers) = {
            let mut inner = self.inner.write().await;
            let entry = inner
                .remove_connection(connection_id)
                .ok_or(MeshError::ConnectionNotFound(connection_id))?;
            let peers = inner.peer_transports(connection_id);
            (entry, peers)
        };

        let event = LiveEvent::PresenceLeft {
            session_id: entry.session_id.clone(),
            participant_name: entry.participant_name.clone(),
            timestamp: Utc::now(),
        };
        Self::fan_out(&peers, &event);

        info!(
            "Connection {} for session {} disconnected",
            connection_id, entry.session_id
        );
        Ok(())
    }

    /// Push a mesh message to currently-reachable recipients
    ///
    /// Every member of the broadcast group receives the message; declared
    /// subscription filters are advisory and not consulted. A message
    /// addressed to a specific, currently-connected session additionally
    /// receives a targeted delivery. Returns the number of successful
    /// deliveries; individual failures are swallowed.
    pub async fn push_message(&self, message: &MeshMessage) -> usize {
        let mut deliveries: Vec<(Arc<dyn LiveTransport>, LiveEvent)> = Vec::new();
        {
            let inner = self.inner.read().await;
            for conn in inner.connections.values() {
                if conn.subscription.is_some() {
                    deliveries.push((
                        Arc::clone(&conn.transport),
                        LiveEvent::Message {
                            message: message.clone(),
                            delivery: DeliveryKind::Broadcast,
                        },
                    ));
                }
            }

            if !message.is_broadcast() {
                if let Some(connection_id) = inner.by_session.get(&message.to_session) {
                    if let Some(conn) = inner.connections.get(connection_id) {
                        deliveries.push((
                            Arc::clone(&conn.transport),
                            LiveEvent::Message {
                                message: message.clone(),
                                delivery: DeliveryKind::Targeted,
                            },
                        ));
                    }
                }
            }
        }

        let mut delivered = 0;
        for (transport, event) in deliveries {
            match transport.deliver(event) {
                Ok(()) => delivered += 1,
                Err(e) => debug!("Live delivery skipped: {}", e),
            }
        }
        delivered
    }

    /// Snapshot of every current presence
    pub async fn list_presence(&self) -> Vec<PresenceRecord> {
        let inner = self.inner.read().await;
        inner.presence.values().cloned().collect()
    }

    /// Number of live connections
    pub async fn connected_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Whether the session currently has a live connection
    pub async fn is_online(&self, session_id: &str) -> bool {
        self.inner.read().await.by_session.contains_key(session_id)
    }

    /// Session IDs with a live connection
    pub async fn online_sessions(&self) -> Vec<SessionId> {
        let inner = self.inner.read().await;
        inner.by_session.keys().cloned().collect()
    }

    /// Force-disconnect connections whose heartbeat is older than the
    /// staleness threshold, as of `now`
    ///
    /// Each victim goes through the same cleanup and departure
    /// announcement as an explicit disconnect. Returns the sessions that
    /// were swept.
    pub async fn sweep_once_at(&self, now: DateTime<Utc>) -> Vec<SessionId> {
        let threshold = Duration::seconds(self.config.stale_after_secs);
        let stale: Vec<ConnectionId> = {
            let inner = self.inner.read().await;
            inner
                .connections
                .values()
                .filter(|c| now - c.last_heartbeat > threshold)
                .map(|c| c.connection_id)
                .collect()
        };

        let mut swept = Vec::new();
        for connection_id in stale {
            let (entry, peers) = {
                let mut inner = self.inner.write().await;
                match inner.remove_connection(connection_id) {
                    Some(entry) => {
                        let peers = inner.peer_transports(connection_id);
                        (entry, peers)
                    }
                    // Disconnected between collection and removal
                    None => continue,
                }
            };

            warn!(
                "Sweeping stale connection {} for session {}",
                connection_id, entry.session_id
            );
            let event = LiveEvent::PresenceLeft {
                session_id: entry.session_id.clone(),
                participant_name: entry.participant_name.clone(),
                timestamp: now,
            };
            Self::fan_out(&peers, &event);
            swept.push(entry.session_id);
        }
        swept
    }

    /// Start the background stale-connection sweep
    pub fn start(self: &Arc<Self>) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            registry.sweep_loop().await;
        });
        info!(
            "Stale-connection sweep started (every {}s, threshold {}s)",
            self.config.sweep_interval_secs, self.config.stale_after_secs
        );
    }

    /// Stop the background sweep
    pub fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        self.shutdown_notify.notify_waiters();
    }

    async fn sweep_loop(&self) {
        let mut ticker = interval(std::time::Duration::from_secs(
            self.config.sweep_interval_secs,
        ));
        ticker.tick().await; // first tick completes immediately

        while self.is_running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = ticker.tick() => {
                    let swept = self.sweep_once_at(Utc::now()).await;
                    if !swept.is_empty() {
                        info!("Swept {} stale connection(s)", swept.len());
                    }
                }
                _ = self.shutdown_notify.notified() => {
                    break;
                }
            }
        }
        debug!("Stale-connection sweep stopped");
    }

    fn fan_out(peers: &[Arc<dyn LiveTransport>], event: &LiveEvent) {
        for transport in peers {
            if let Err(e) = transport.deliver(event.clone()) {
                debug!("Lifecycle event delivery skipped: {}", e);
            }
        }
    }

}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    async fn register_live(
        registry: &PresenceRegistry,
        session: &str,
        name: &str,
    ) -> (RegistrationAck, UnboundedReceiver<LiveEvent>) {
        let (transport, rx) = ChannelTransport::channel();
        let ack = registry
            .register(session, Some(name.to_string()), caps(&["chat"]), transport)
            .await;
        (ack, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<LiveEvent>) -> Vec<LiveEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn registration_acks_presence_count_and_notifies_peers() {
        let registry = PresenceRegistry::default();
        let (ack_a, mut rx_a) = register_live(&registry, "sess-a", "alice").await;
        assert_eq!(ack_a.peers_online, 1);

        let (ack_b, _rx_b) = register_live(&registry, "sess-b", "bob").await;
        assert_eq!(ack_b.peers_online, 2);

        let events = drain(&mut rx_a);
        assert_eq!(events.len(), 1);
        match &events[0] {
            LiveEvent::PresenceJoined { session_id, .. } => assert_eq!(session_id, "sess-b"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn reregistration_replaces_session_mapping() {
        let registry = PresenceRegistry::default();
        let (first, _rx1) = register_live(&registry, "sess-a", "alice").await;
        let (second, _rx2) = register_live(&registry, "sess-a", "alice").await;

        assert_ne!(first.connection_id, second.connection_id);
        assert_eq!(registry.connected_count().await, 1);
        assert_eq!(registry.list_presence().await.len(), 1);

        // The replaced connection is gone; the new one owns the session
        assert!(registry.disconnect(first.connection_id).await.is_err());
        assert!(registry.disconnect(second.connection_id).await.is_ok());
    }

    #[tokio::test]
    async fn disconnect_leaves_other_presence_untouched() {
        let registry = PresenceRegistry::default();
        let (ack_a, _rx_a) = register_live(&registry, "sess-a", "alice").await;
        let (_ack_b, mut rx_b) = register_live(&registry, "sess-b", "bob").await;

        registry.disconnect(ack_a.connection_id).await.unwrap();

        let remaining = registry.list_presence().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].session_id, "sess-b");

        let events = drain(&mut rx_b);
        assert!(matches!(
            events.last(),
            Some(LiveEvent::PresenceLeft { session_id, .. }) if session_id == "sess-a"
        ));
    }

    #[tokio::test]
    async fn broadcast_reaches_subscribers_only() {
        let registry = PresenceRegistry::default();
        let (ack_a, mut rx_a) = register_live(&registry, "sess-a", "alice").await;
        let (_ack_b, mut rx_b) = register_live(&registry, "sess-b", "bob").await;

        registry
            .subscribe(ack_a.connection_id, None, None)
            .await
            .unwrap();

        let message = MeshMessage::new(
            MessageType::ThoughtShare,
            "observation for the mesh",
            "sess-b",
            BROADCAST_TARGET,
        );
        let delivered = registry.push_message(&message).await;
        assert_eq!(delivered, 1);

        drain(&mut rx_b); // join event only
        assert!(drain(&mut rx_b)
            .iter()
            .all(|e| !matches!(e, LiveEvent::Message { .. })));
        let got: Vec<LiveEvent> = drain(&mut rx_a)
            .into_iter()
            .filter(|e| matches!(e, LiveEvent::Message { .. }))
            .collect();
        assert_eq!(got.len(), 1);
    }

    #[tokio::test]
    async fn direct_message_gets_targeted_delivery() {
        let registry = PresenceRegistry::default();
        let (ack_a, mut rx_a) = register_live(&registry, "sess-a", "alice").await;
        registry
            .subscribe(ack_a.connection_id, None, None)
            .await
            .unwrap();

        let message = MeshMessage::new(
            MessageType::Query,
            "are you holding the build lock?",
            "sess-b",
            "sess-a",
        );
        let delivered = registry.push_message(&message).await;
        // Broadcast-group delivery plus the targeted one
        assert_eq!(delivered, 2);

        let kinds: Vec<DeliveryKind> = drain(&mut rx_a)
            .into_iter()
            .filter_map(|e| match e {
                LiveEvent::Message { delivery, .. } => Some(delivery),
                _ => None,
            })
            .collect();
        assert_eq!(kinds, vec![DeliveryKind::Broadcast, DeliveryKind::Targeted]);
    }

    #[tokio::test]
    async fn stale_connection_swept_with_single_departure_event() {
        let registry = PresenceRegistry::new(RegistryConfig {
            sweep_interval_secs: 30,
            stale_after_secs: 60,
        });
        let (_ack_a, _rx_a) = register_live(&registry, "sess-a", "alice").await;
        let (_ack_b, mut rx_b) = register_live(&registry, "sess-b", "bob").await;

        // Keep B fresh, let A go stale
        let later = Utc::now() + Duration::seconds(90);
        registry
            .heartbeat_at("sess-b", None, later)
            .await
            .unwrap();

        let swept = registry.sweep_once_at(later).await;
        assert_eq!(swept, vec!["sess-a".to_string()]);
        assert!(registry.is_online("sess-b").await);
        assert!(!registry.is_online("sess-a").await);

        let departures = drain(&mut rx_b)
            .into_iter()
            .filter(|e| matches!(e, LiveEvent::PresenceLeft { .. }))
            .count();
        assert_eq!(departures, 1);

        // A second sweep finds nothing further
        assert!(registry.sweep_once_at(later).await.is_empty());
    }

    #[tokio::test]
    async fn virtual_registration_is_discoverable() {
        let registry = PresenceRegistry::default();
        let ack = registry
            .register_virtual("sess-v", Some("scout".to_string()), caps(&["survey"]))
            .await;
        assert_eq!(ack.peers_online, 1);
        assert!(registry.is_online("sess-v").await);

        // Pushes to the no-op transport succeed silently
        registry
            .subscribe(ack.connection_id, None, None)
            .await
            .unwrap();
        let message = MeshMessage::new(
            MessageType::SystemNotification,
            "sweep notice",
            "sess-x",
            BROADCAST_TARGET,
        );
        assert_eq!(registry.push_message(&message).await, 1);
    }

    #[tokio::test]
    async fn away_status_heartbeat_announces_change() {
        let registry = PresenceRegistry::default();
        let (_ack_a, mut rx_a) = register_live(&registry, "sess-a", "alice").await;
        let (_ack_b, _rx_b) = register_live(&registry, "sess-b", "bob").await;

        registry
            .heartbeat("sess-b", Some(PresenceStatus::Busy))
            .await
            .unwrap();

        let statuses: Vec<PresenceStatus> = drain(&mut rx_a)
            .into_iter()
            .filter_map(|e| match e {
                LiveEvent::StatusChanged { status, .. } => Some(status),
                _ => None,
            })
            .collect();
        assert_eq!(statuses, vec![PresenceStatus::Busy]);

        let presence = registry.list_presence().await;
        let bob = presence.iter().find(|p| p.session_id == "sess-b").unwrap();
        assert_eq!(bob.status, PresenceStatus::Busy);
    }

    #[tokio::test]
    async fn online_heartbeat_is_silent() {
        let registry = PresenceRegistry::default();
        let (_ack_a, mut rx_a) = register_live(&registry, "sess-a", "alice").await;
        let (_ack_b, _rx_b) = register_live(&registry, "sess-b", "bob").await;
        drain(&mut rx_a);

        registry.heartbeat("sess-b", None).await.unwrap();
        assert!(drain(&mut rx_a).is_empty());
    }
}
