//! # Agentmesh Core
//!
//! Core of the real-time multi-agent mesh: presence tracking, live message
//! delivery, and response rate governance for swarms of cooperating agents.
//!
//! ## Key Features
//!
//! - **Presence Registry**: tracks which agents are live, with heartbeat
//!   based liveness and a background stale-connection sweep
//! - **Live Delivery**: best-effort push of mesh messages to connected
//!   subscribers, with durable history as the authoritative record
//! - **Response Guard**: per-sender rate limiting, duplicate detection and
//!   pattern heuristics to prevent runaway response loops
//! - **Meetings**: declarative, phase-based coordination structures
//!   published as data for participants to follow cooperatively
//! - **Store Contracts**: TTL-bounded session and message stores consumed
//!   through traits, with in-memory reference implementations

pub mod error;
pub mod guard;
pub mod meeting;
pub mod registry;
pub mod store;
pub mod types;

pub use error::{MeshError, MeshResult};
pub use guard::{GuardDecision, GuardRules, ResponseGuard, SenderStats};
pub use meeting::{AgendaItem, CompletionCriteria, Meeting, MeetingPhase, SpeakingOrder};
pub use registry::{
    ChannelTransport, LiveTransport, NullTransport, PresenceRegistry, RegistrationAck,
    RegistryConfig,
};
pub use store::{
    InMemoryMessageStore, InMemorySessionStore, MessageFilter, MessageStore, SessionRecord,
    SessionStore,
};
pub use types::{
    ConnectionId, DeliveryKind, LiveEvent, MeshMessage, MessageType, PresenceRecord,
    PresenceStatus, Priority, SessionId, Subscription, BROADCAST_TARGET,
};

/// Default TTL for durable session and message records, in days
pub const DEFAULT_STORE_TTL_DAYS: i64 = 7;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ChannelTransport, GuardDecision, GuardRules, LiveEvent, LiveTransport, Meeting,
        MeetingPhase, MeshError, MeshMessage, MeshResult, MessageFilter, MessageStore,
        MessageType, NullTransport, PresenceRecord, PresenceRegistry, PresenceStatus, Priority,
        RegistryConfig, ResponseGuard, SessionRecord, SessionStore, Subscription,
        BROADCAST_TARGET,
    };
}
