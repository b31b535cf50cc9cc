//! Core types for Syndicast

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Numeric identity of a sending worker.
///
/// The worker's credentials live with an external collaborator; the engine
/// only ever sees this handle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct WorkerId(pub i64);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a delivery target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestinationId(pub String);

impl DestinationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DestinationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DestinationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a content slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotId(pub String);

impl SlotId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A scheduled, recurring unit of content plus its destination list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentSlot {
    pub id: SlotId,
    /// Reference to the owner in the external authoring system.
    pub owner: String,
    /// Opaque content payload.
    pub content: String,
    /// Ordered destination list.
    pub destinations: Vec<DestinationId>,
    pub interval_secs: i64,
    pub last_sent_at: Option<i64>,
    pub active: bool,
    pub created_at: i64,
}

impl ContentSlot {
    pub fn new(
        owner: String,
        content: String,
        destinations: Vec<DestinationId>,
        interval_secs: i64,
    ) -> Self {
        Self {
            id: SlotId(Uuid::new_v4().to_string()),
            owner,
            content,
            destinations,
            interval_secs,
            last_sent_at: None,
            active: true,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    /// A slot is due when it has never been sent, or its interval has
    /// elapsed since the last cycle.
    pub fn is_due(&self, now: i64) -> bool {
        if !self.active {
            return false;
        }
        match self.last_sent_at {
            None => true,
            Some(last) => now >= last + self.interval_secs,
        }
    }
}

/// Effective state of a worker at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerStatus {
    Active,
    CoolingDown,
    Suspended,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::CoolingDown => write!(f, "cooling_down"),
            Self::Suspended => write!(f, "suspended"),
        }
    }
}

/// Abstract classification of a delivery failure.
///
/// Every provider-specific error signal is mapped onto this taxonomy in one
/// place (`classify`); retry, cooldown and suspension decisions key off it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Retryable after a short backoff.
    Transient,
    /// Retryable after the provider-reported wait, on a different worker.
    RateLimited { wait_secs: u64 },
    /// Worker-level signal; the worker is quarantined.
    Banned,
    /// Destination-level signal; the destination is suppressed immediately.
    DestinationInvalid,
    /// Unrecognized signal, treated conservatively as transient.
    Unknown,
}

impl FailureKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::RateLimited { .. } => "rate_limited",
            Self::Banned => "banned",
            Self::DestinationInvalid => "destination_invalid",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Append-only audit record of a single delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostingAttempt {
    pub id: Option<i64>,
    pub slot_id: SlotId,
    pub destination: DestinationId,
    pub worker_id: WorkerId,
    pub attempted_at: i64,
    pub success: bool,
    pub failure_kind: Option<String>,
    pub detail: Option<String>,
}

/// Registration of a worker identity, as provided by the external
/// credential store at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub id: WorkerId,
    /// Opaque reference to the worker's credentials.
    pub handle: String,
    pub hourly_limit: Option<u32>,
    pub daily_limit: Option<u32>,
}

/// Point-in-time view of a worker, for operational tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub handle: String,
    pub status: WorkerStatus,
    pub hourly_count: u32,
    pub daily_count: u32,
    pub hourly_limit: u32,
    pub daily_limit: u32,
    pub cooldown_until: Option<i64>,
    pub last_used_at: Option<i64>,
    pub suspended_until: Option<i64>,
}

/// Point-in-time view of a destination's health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationSnapshot {
    pub destination: DestinationId,
    pub consecutive_failures: u32,
    pub success_rate: f64,
    pub total_attempts: u64,
    pub suppressed_until: Option<i64>,
    /// Flagged for operator review; the destination is never deleted.
    pub flagged: bool,
    pub active: bool,
}
