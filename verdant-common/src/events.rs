//! Event types and the application-wide EventBus
//!
//! Events are broadcast in-process and serialized for the SSE stream that the
//! UI shell listens on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Phase of a single identification attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptPhase {
    /// No attempt in progress
    Idle,
    /// Waiting on the AI collaborator
    Analyzing,
    /// Ambiguous text query, waiting for the user to pick a candidate
    Selecting,
    /// Identification resolved
    Success,
    /// Attempt ended with a classified error
    Error,
}

impl AttemptPhase {
    /// Terminal phases accept only a reset or a new attempt
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptPhase::Success | AttemptPhase::Error)
    }
}

/// Subscription plan tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    #[default]
    Free,
    Pro,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Pro => "pro",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "free" => Some(PlanTier::Free),
            "pro" => Some(PlanTier::Pro),
            _ => None,
        }
    }
}

/// Coarse auth status carried on events (the user record stays in-process)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Loading,
    Authenticated,
    Unauthenticated,
}

/// Verdant event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VerdantEvent {
    /// Identification attempt moved between phases
    AttemptPhaseChanged {
        attempt_id: u64,
        old_phase: AttemptPhase,
        new_phase: AttemptPhase,
        timestamp: DateTime<Utc>,
    },

    /// A successful identification was charged against the quota
    UsageRecorded {
        user_id: String,
        used: u32,
        /// `-1` when unlimited
        cap: i64,
        timestamp: DateTime<Utc>,
    },

    /// Cached plan changed
    ///
    /// `confirmed` is false for the optimistic flip right after a subscription
    /// record was observed, true once the forced re-fetch agrees.
    PlanChanged {
        user_id: String,
        plan: PlanTier,
        confirmed: bool,
        timestamp: DateTime<Utc>,
    },

    /// Payment returned successfully but no active subscription was observed
    VerificationPending {
        user_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Auth signal changed
    AuthStateChanged {
        status: AuthStatus,
        user_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl VerdantEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            VerdantEvent::AttemptPhaseChanged { .. } => "AttemptPhaseChanged",
            VerdantEvent::UsageRecorded { .. } => "UsageRecorded",
            VerdantEvent::PlanChanged { .. } => "PlanChanged",
            VerdantEvent::VerificationPending { .. } => "VerificationPending",
            VerdantEvent::AuthStateChanged { .. } => "AuthStateChanged",
        }
    }
}

/// Central event distribution bus
///
/// Wraps `tokio::sync::broadcast`: publishing never blocks on slow
/// subscribers, and subscribers that fall behind observe a lag error.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<VerdantEvent>,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<VerdantEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; with no subscribers it is dropped
    pub fn emit_lossy(&self, event: VerdantEvent) {
        let _ = self.tx.send(event);
    }
}
