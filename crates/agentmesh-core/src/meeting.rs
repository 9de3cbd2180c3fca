//! Structured meetings for multi-party coordination
//!
//! A meeting is inert data: the mesh publishes the protocol for
//! participants to follow cooperatively and never drives phase
//! transitions itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Speaking discipline within a meeting phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpeakingOrder {
    /// Each participant speaks once, in joining order, repeating
    RoundRobin,
    /// Anyone may speak at any time
    Open,
    /// Participants speak in the order listed on the agenda
    Sequential,
}

/// Condition that closes a meeting phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionCriteria {
    /// Every participant has taken a turn
    AllSpoken,
    /// Every participant has signalled readiness
    AllReady,
    /// The phase duration has elapsed
    TimeBased,
}

/// One item on the meeting agenda
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgendaItem {
    /// Topic to cover
    pub topic: String,
    /// Longer description of the topic
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Time budget for the topic
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<u32>,
    /// Participant expected to lead the topic
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

/// One phase of the meeting protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingPhase {
    /// Phase name
    pub name: String,
    /// What happens during this phase
    pub description: String,
    /// Speaking discipline
    pub speaking_order: SpeakingOrder,
    /// Per-turn time budget in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_duration_secs: Option<u32>,
    /// Whole-phase time budget in minutes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_duration_minutes: Option<u32>,
    /// Condition that closes the phase
    pub completion_criteria: CompletionCriteria,
}

/// A structured coordination object announced through the mesh
///
/// Transported as the `context` payload of a system notification;
/// meetings have no store of their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meeting {
    /// Unique meeting ID
    pub meeting_id: String,
    /// Meeting title
    pub title: String,
    /// Why the meeting is being convened
    pub purpose: String,
    /// Ordered agenda, at least one item
    pub agenda: Vec<AgendaItem>,
    /// Ordered protocol phases participants agree to follow
    pub protocol: Vec<MeetingPhase>,
    /// Participants explicitly invited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invited_participants: Option<Vec<String>>,
    /// Minimum attendance before the meeting proceeds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_for_quorum: Option<u32>,
    /// Session that convened the meeting
    pub created_by: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Scheduled start, if not immediate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
    /// Expected overall duration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_duration_minutes: Option<u32>,
}

impl Meeting {
    /// Create a meeting, substituting the canonical protocol when none is supplied
    pub fn new(
        title: impl Into<String>,
        purpose: impl Into<String>,
        agenda: Vec<AgendaItem>,
        protocol: Option<Vec<MeetingPhase>>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            meeting_id: Uuid::new_v4().to_string(),
            title: title.into(),
            purpose: purpose.into(),
            agenda,
            protocol: protocol.unwrap_or_else(default_protocol),
            invited_participants: None,
            required_for_quorum: None,
            created_by: created_by.into(),
            created_at: Utc::now(),
            starts_at: None,
            estimated_duration_minutes: None,
        }
    }

    /// Names of the protocol phases, in order
    pub fn phase_names(&self) -> Vec<&str> {
        self.protocol.iter().map(|p| p.name.as_str()).collect()
    }
}

/// The canonical five-phase meeting protocol
pub fn default_protocol() -> Vec<MeetingPhase> {
    vec![
        MeetingPhase {
            name: "GATHERING".to_string(),
            description: "Participants join and confirm they are present".to_string(),
            speaking_order: SpeakingOrder::Open,
            turn_duration_secs: None,
            phase_duration_minutes: Some(5),
            completion_criteria: CompletionCriteria::AllReady,
        },
        MeetingPhase {
            name: "INTRODUCTION".to_string(),
            description: "Each participant introduces their perspective on the purpose".to_string(),
            speaking_order: SpeakingOrder::RoundRobin,
            turn_duration_secs: Some(60),
            phase_duration_minutes: None,
            completion_criteria: CompletionCriteria::AllSpoken,
        },
        MeetingPhase {
            name: "PRESENTATION".to_string(),
            description: "Agenda topics are presented by their speakers".to_string(),
            speaking_order: SpeakingOrder::RoundRobin,
            turn_duration_secs: Some(180),
            phase_duration_minutes: None,
            completion_criteria: CompletionCriteria::AllSpoken,
        },
        MeetingPhase {
            name: "DELIBERATION".to_string(),
            description: "Open discussion of the presented material".to_string(),
            speaking_order: SpeakingOrder::Open,
            turn_duration_secs: None,
            phase_duration_minutes: Some(15),
            completion_criteria: CompletionCriteria::TimeBased,
        },
        MeetingPhase {
            name: "CONSENSUS".to_string(),
            description: "Each participant states their position until all have spoken".to_string(),
            speaking_order: SpeakingOrder::RoundRobin,
            turn_duration_secs: Some(60),
            phase_duration_minutes: None,
            completion_criteria: CompletionCriteria::AllSpoken,
        },
    ]
}
