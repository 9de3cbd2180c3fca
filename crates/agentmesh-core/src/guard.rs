//! Per-sender response governance
//!
//! The guard decides whether a candidate outgoing message from a given
//! sender is currently permitted, and records accepted sends for future
//! decisions. It governs a soft, advisory limit: it never errors, holds no
//! persistent state, and a process restart clears it entirely.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Window used for rate limiting
const RATE_WINDOW_MINUTES: i64 = 60;

/// Window used for the identical-content heuristic
const IDENTICAL_WINDOW_MINUTES: i64 = 5;

/// Responses shorter than this count as "short" for the pattern heuristics
const SHORT_RESPONSE_CHARS: usize = 10;

/// Filler phrases that signal a low-effort response
const GENERIC_PHRASES: &[&str] = &[
    "i agree",
    "sounds good",
    "makes sense",
    "good point",
    "thanks for sharing",
];

/// Limits applied to each sender
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardRules {
    /// Maximum accepted sends within the trailing hour
    pub max_responses_per_hour: usize,
    /// Minimum seconds between consecutive sends
    pub cooldown_between_responses: u64,
    /// Similarity above which a candidate counts as a duplicate
    pub duplicate_content_threshold: f64,
}

impl Default for GuardRules {
    fn default() -> Self {
        Self {
            max_responses_per_hour: 10,
            cooldown_between_responses: 30,
            duplicate_content_threshold: 0.8,
        }
    }
}

/// Outcome of a guard check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardDecision {
    /// Whether sending is currently permitted
    pub allowed: bool,
    /// Why the send was rejected, when it was
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl GuardDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// One accepted send in a sender's history
#[derive(Debug, Clone)]
struct ResponseEntry {
    timestamp: DateTime<Utc>,
    content: String,
    message_id: String,
}

/// Aggregate statistics for a sender
///
/// The average interval is computed over the sender's entire retained
/// history, which can reach further back than the trailing-hour window the
/// rate limit prunes to when cleanup has not run in between.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderStats {
    /// Number of retained history entries
    pub responses_recorded: usize,
    /// Mean seconds between consecutive retained entries
    pub avg_interval_secs: Option<f64>,
}

/// In-memory anti-spam guard, sharded per sender
pub struct ResponseGuard {
    rules: GuardRules,
    history: DashMap<String, Vec<ResponseEntry>>,
    last_content: DashMap<String, String>,
}

impl ResponseGuard {
    /// Create a guard with the given rules
    pub fn new(rules: GuardRules) -> Self {
        Self {
            rules,
            history: DashMap::new(),
            last_content: DashMap::new(),
        }
    }

    /// The rules this guard enforces
    pub fn rules(&self) -> &GuardRules {
        &self.rules
    }

    /// Decide whether `sender` may send `candidate` now
    pub fn can_respond(&self, sender: &str, candidate: &str) -> GuardDecision {
        self.can_respond_at(sender, candidate, Utc::now())
    }

    /// Decide at an explicit point in time
    pub fn can_respond_at(
        &self,
        sender: &str,
        candidate: &str,
        now: DateTime<Utc>,
    ) -> GuardDecision {
        let window_start = now - Duration::minutes(RATE_WINDOW_MINUTES);

        // Prune the sender's history to the rate window before any check
        let recent: Vec<ResponseEntry> = match self.history.get_mut(sender) {
            Some(mut entries) => {
                entries.retain(|e| e.timestamp > window_start);
                entries.clone()
            }
            None => Vec::new(),
        };

        if recent.len() >= self.rules.max_responses_per_hour {
            return GuardDecision::reject(format!(
                "hourly response limit reached ({}/{})",
                recent.len(),
                self.rules.max_responses_per_hour
            ));
        }

        if let Some(latest) = recent.iter().map(|e| e.timestamp).max() {
            let elapsed = (now - latest).num_seconds();
            let cooldown = self.rules.cooldown_between_responses as i64;
            if elapsed < cooldown {
                return GuardDecision::reject(format!(
                    "cooldown active, {}s remaining",
                    cooldown - elapsed
                ));
            }
        }

        if let Some(previous) = self.last_content.get(sender) {
            let similarity = content_similarity(candidate, previous.value());
            if similarity > self.rules.duplicate_content_threshold {
                return GuardDecision::reject(format!(
                    "too similar to previous response (similarity {:.2})",
                    similarity
                ));
            }
        }

        if let Some(reason) = self.pattern_violation(candidate, &recent, now) {
            return GuardDecision::reject(reason);
        }

        GuardDecision::allow()
    }

    /// Record an accepted send
    ///
    /// Callers must invoke this only after the send was accepted and
    /// persisted; recording is unconditional.
    pub fn record_response(&self, sender: &str, content: &str, message_id: &str) {
        self.record_response_at(sender, content, message_id, Utc::now());
    }

    /// Record at an explicit point in time
    pub fn record_response_at(
        &self,
        sender: &str,
        content: &str,
        message_id: &str,
        now: DateTime<Utc>,
    ) {
        self.history
            .entry(sender.to_string())
            .or_default()
            .push(ResponseEntry {
                timestamp: now,
                content: content.to_string(),
                message_id: message_id.to_string(),
            });
        self.last_content
            .insert(sender.to_string(), content.to_string());
    }

    /// Drop history older than the rate window and forget idle senders
    ///
    /// Intended to run on a periodic timer.
    pub fn cleanup_old_data(&self) {
        self.cleanup_old_data_at(Utc::now());
    }

    /// Cleanup at an explicit point in time
    pub fn cleanup_old_data_at(&self, now: DateTime<Utc>) {
        let cutoff = now - Duration::minutes(RATE_WINDOW_MINUTES);
        let mut idle = Vec::new();

        for mut entry in self.history.iter_mut() {
            entry.value_mut().retain(|e| e.timestamp > cutoff);
            if entry.value().is_empty() {
                idle.push(entry.key().clone());
            }
        }

        for sender in idle {
            self.history.remove(&sender);
            self.last_content.remove(&sender);
            debug!("Dropped idle sender {} from response guard", sender);
        }
    }

    /// Aggregate statistics over the sender's entire retained history
    pub fn sender_stats(&self, sender: &str) -> Option<SenderStats> {
        let entries = self.history.get(sender)?;
        let mut timestamps: Vec<DateTime<Utc>> =
            entries.iter().map(|e| e.timestamp).collect();
        timestamps.sort();

        let avg_interval_secs = if timestamps.len() > 1 {
            let total: i64 = timestamps
                .windows(2)
                .map(|w| (w[1] - w[0]).num_seconds())
                .sum();
            Some(total as f64 / (timestamps.len() - 1) as f64)
        } else {
            None
        };

        Some(SenderStats {
            responses_recorded: timestamps.len(),
            avg_interval_secs,
        })
    }

    /// Number of senders with retained history
    pub fn tracked_senders(&self) -> usize {
        self.history.len()
    }

    fn pattern_violation(
        &self,
        candidate: &str,
        recent: &[ResponseEntry],
        now: DateTime<Utc>,
    ) -> Option<String> {
        let short_recent = recent
            .iter()
            .filter(|e| e.content.chars().count() < SHORT_RESPONSE_CHARS)
            .count();
        if candidate.chars().count() < SHORT_RESPONSE_CHARS && short_recent >= 3 {
            return Some("too many short responses".to_string());
        }

        let identical_start = now - Duration::minutes(IDENTICAL_WINDOW_MINUTES);
        let identical = recent
            .iter()
            .filter(|e| e.timestamp > identical_start && e.content == candidate)
            .count();
        if identical >= 2 {
            return Some("identical response already sent recently".to_string());
        }

        let lowered = candidate.to_lowercase();
        if GENERIC_PHRASES.iter().any(|p| lowered.contains(p)) {
            let generic_recent = recent
                .iter()
                .filter(|e| {
                    let c = e.content.to_lowercase();
                    GENERIC_PHRASES.iter().any(|p| c.contains(p))
                })
                .count();
            if generic_recent >= 2 {
                return Some("too many generic responses".to_string());
            }
        }

        None
    }
}

impl Default for ResponseGuard {
    fn default() -> Self {
        Self::new(GuardRules::default())
    }
}

/// Lowercase word tokens, punctuation stripped, length above two
fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 2)
        .map(str::to_string)
        .collect()
}

/// Similarity of a candidate against the previously sent content
///
/// Ratio of the candidate's token count to the combined vocabulary of both
/// texts. Both empty scores 1.0, exactly one empty scores 0.0.
fn content_similarity(candidate: &str, previous: &str) -> f64 {
    let cand = tokenize(candidate);
    let prev = tokenize(previous);

    if cand.is_empty() && prev.is_empty() {
        return 1.0;
    }
    if cand.is_empty() || prev.is_empty() {
        return 0.0;
    }

    let vocabulary: HashSet<&str> = cand
        .iter()
        .map(String::as_str)
        .chain(prev.iter().map(String::as_str))
        .collect();
    let overlap = cand
        .iter()
        .filter(|t| vocabulary.contains(t.as_str()))
        .count();

    overlap as f64 / vocabulary.len() as f64
}
