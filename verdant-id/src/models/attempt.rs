//! Identification attempt state machine
//!
//! Phases: Idle → Analyzing → {Selecting | Success | Error},
//! Selecting → Analyzing (candidate picked), any → Idle (reset).
//!
//! Once the phase leaves Idle, at most one of {result, error, candidates} is
//! populated, and exactly one is populated in Selecting, Success and Error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use verdant_common::events::AttemptPhase;

use crate::models::{AttemptError, Candidate, ErrorKind, PlantRecord};

/// User input for one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptInput {
    /// Photo bytes with the MIME type declared by the uploader
    Image { bytes: Vec<u8>, mime: String },
    /// Free-text plant name
    Query(String),
}

impl AttemptInput {
    pub fn is_image(&self) -> bool {
        matches!(self, AttemptInput::Image { .. })
    }

    pub fn query(&self) -> Option<&str> {
        match self {
            AttemptInput::Query(q) => Some(q.as_str()),
            AttemptInput::Image { .. } => None,
        }
    }
}

/// Phase transition record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub attempt_id: u64,
    pub old_phase: AttemptPhase,
    pub new_phase: AttemptPhase,
    pub transitioned_at: DateTime<Utc>,
}

/// Rejected phase change
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: AttemptPhase,
    pub to: AttemptPhase,
}

/// Whether `from → to` is an edge of the state machine
pub fn is_valid_transition(from: AttemptPhase, to: AttemptPhase) -> bool {
    use AttemptPhase::*;
    matches!(
        (from, to),
        (_, Idle)
            | (Idle, Analyzing)
            | (Analyzing, Selecting)
            | (Analyzing, Success)
            | (Analyzing, Error)
            | (Selecting, Analyzing)
    )
}

/// One user-initiated identification request
#[derive(Debug, Clone)]
pub struct IdentificationAttempt {
    /// Sequence number; completions carrying another id are stale
    pub attempt_id: u64,
    pub input: Option<AttemptInput>,
    pub phase: AttemptPhase,
    pub result: Option<PlantRecord>,
    pub error: Option<AttemptError>,
    pub candidates: Vec<Candidate>,
    /// Candidate being resolved after a pick
    pub selected: Option<Candidate>,
    pub started_at: Option<DateTime<Utc>>,
}

impl IdentificationAttempt {
    /// Initial (Idle) attempt
    pub fn idle(attempt_id: u64) -> Self {
        Self {
            attempt_id,
            input: None,
            phase: AttemptPhase::Idle,
            result: None,
            error: None,
            candidates: Vec::new(),
            selected: None,
            started_at: None,
        }
    }

    /// Accept intake and enter Analyzing
    pub fn begin(attempt_id: u64, input: AttemptInput) -> (Self, StateTransition) {
        let now = Utc::now();
        let attempt = Self {
            input: Some(input),
            phase: AttemptPhase::Analyzing,
            started_at: Some(now),
            ..Self::idle(attempt_id)
        };
        let transition = StateTransition {
            attempt_id,
            old_phase: AttemptPhase::Idle,
            new_phase: AttemptPhase::Analyzing,
            transitioned_at: now,
        };
        (attempt, transition)
    }

    /// Move to a new phase, clearing payloads that the new phase must not carry
    pub fn transition_to(
        &mut self,
        new_phase: AttemptPhase,
    ) -> Result<StateTransition, InvalidTransition> {
        if !is_valid_transition(self.phase, new_phase) {
            return Err(InvalidTransition {
                from: self.phase,
                to: new_phase,
            });
        }

        let transition = StateTransition {
            attempt_id: self.attempt_id,
            old_phase: self.phase,
            new_phase,
            transitioned_at: Utc::now(),
        };
        self.phase = new_phase;

        match new_phase {
            AttemptPhase::Idle => {
                *self = Self::idle(self.attempt_id);
            }
            AttemptPhase::Analyzing => {
                self.result = None;
                self.error = None;
                self.candidates.clear();
            }
            AttemptPhase::Selecting | AttemptPhase::Success | AttemptPhase::Error => {
                self.selected = None;
            }
        }

        Ok(transition)
    }

    /// Analyzing → Selecting with the candidate list attached
    pub fn present_candidates(
        &mut self,
        candidates: Vec<Candidate>,
    ) -> Result<StateTransition, InvalidTransition> {
        let transition = self.transition_to(AttemptPhase::Selecting)?;
        self.candidates = candidates;
        Ok(transition)
    }

    /// Selecting → Analyzing for the picked candidate
    pub fn pick(&mut self, candidate: Candidate) -> Result<StateTransition, InvalidTransition> {
        let transition = self.transition_to(AttemptPhase::Analyzing)?;
        self.selected = Some(candidate);
        Ok(transition)
    }

    /// Analyzing → Success
    pub fn succeed(&mut self, record: PlantRecord) -> Result<StateTransition, InvalidTransition> {
        let transition = self.transition_to(AttemptPhase::Success)?;
        self.result = Some(record);
        Ok(transition)
    }

    /// Analyzing → Error
    pub fn fail(&mut self, error: AttemptError) -> Result<StateTransition, InvalidTransition> {
        let transition = self.transition_to(AttemptPhase::Error)?;
        self.error = Some(error);
        Ok(transition)
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Serializable view for the display layer (no image bytes)
    pub fn snapshot(&self) -> AttemptSnapshot {
        AttemptSnapshot {
            attempt_id: self.attempt_id,
            phase: self.phase,
            input_kind: self.input.as_ref().map(|input| match input {
                AttemptInput::Image { .. } => InputKind::Image,
                AttemptInput::Query(_) => InputKind::Query,
            }),
            query: self
                .input
                .as_ref()
                .and_then(|input| input.query().map(str::to_string)),
            result: self.result.clone(),
            error_kind: self.error.as_ref().map(|e| e.kind),
            error_message: self.error.as_ref().map(|e| e.message.clone()),
            candidates: self.candidates.clone(),
            selected: self.selected.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Image,
    Query,
}

/// Attempt as seen by the display layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptSnapshot {
    pub attempt_id: u64,
    pub phase: AttemptPhase,
    pub input_kind: Option<InputKind>,
    pub query: Option<String>,
    pub result: Option<PlantRecord>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub candidates: Vec<Candidate>,
    pub selected: Option<Candidate>,
}
