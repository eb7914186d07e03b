//! Identification workflow
//!
//! Drives one attempt at a time through intake, the entitlement gate, AI
//! analysis and candidate resolution. Every attempt gets a fresh id from a
//! monotonically increasing sequence; a completion whose id no longer matches
//! the current attempt is stale and leaves shared state untouched (no phase
//! change, no usage charge, no history).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use verdant_common::events::{AttemptPhase, EventBus, VerdantEvent};

use crate::models::{
    AttemptError, AttemptInput, AttemptSnapshot, Candidate, DenyReason, ErrorKind, HistoryEntry,
    IdentificationAttempt, InvalidTransition, PlantRecord, StateTransition,
};
use crate::services::analyzer::{interpret_identification, AnalysisError, PlantAnalyzer};
use crate::services::candidate_resolver::CandidateResolver;
use crate::services::entitlement::{AccessDecision, EntitlementGate};
use crate::services::intake::{self, IntakeRejection};
use crate::store::HistoryStore;

/// Workflow operation errors
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Input rejected: {0}")]
    Rejected(#[from] IntakeRejection),

    #[error("Access denied: {0:?}")]
    Denied(DenyReason),

    /// A newer attempt (or a reset) replaced this one
    #[error("Attempt was superseded")]
    Superseded,

    #[error("Invalid state: {0}")]
    InvalidState(#[from] InvalidTransition),

    #[error("No candidate at index {0}")]
    NoSuchCandidate(usize),

    #[error("Storage error: {0}")]
    Store(#[from] verdant_common::Error),
}

/// Single-attempt identification state machine
pub struct IdentificationWorkflow {
    analyzer: Arc<dyn PlantAnalyzer>,
    resolver: Arc<CandidateResolver>,
    gate: EntitlementGate,
    history: Arc<dyn HistoryStore>,
    event_bus: EventBus,
    language: String,
    sequence: AtomicU64,
    attempt: Mutex<IdentificationAttempt>,
}

impl IdentificationWorkflow {
    pub fn new(
        analyzer: Arc<dyn PlantAnalyzer>,
        resolver: Arc<CandidateResolver>,
        gate: EntitlementGate,
        history: Arc<dyn HistoryStore>,
        event_bus: EventBus,
        language: impl Into<String>,
    ) -> Self {
        Self {
            analyzer,
            resolver,
            gate,
            history,
            event_bus,
            language: language.into(),
            sequence: AtomicU64::new(0),
            attempt: Mutex::new(IdentificationAttempt::idle(0)),
        }
    }

    pub fn gate(&self) -> &EntitlementGate {
        &self.gate
    }

    pub async fn snapshot(&self) -> AttemptSnapshot {
        self.attempt.lock().await.snapshot()
    }

    /// Result of the current attempt when it succeeded
    pub async fn current_result(&self) -> Option<PlantRecord> {
        let attempt = self.attempt.lock().await;
        match attempt.phase {
            AttemptPhase::Success => attempt.result.clone(),
            _ => None,
        }
    }

    /// Identify the plant in a photo
    pub async fn submit_image(
        &self,
        bytes: Vec<u8>,
        mime: &str,
    ) -> Result<AttemptSnapshot, WorkflowError> {
        intake::validate_image(&bytes, mime)?;

        let (attempt_id, user_id) = self
            .begin(AttemptInput::Image {
                bytes: bytes.clone(),
                mime: mime.to_string(),
            })
            .await?;
        tracing::info!(attempt_id, size = bytes.len(), mime, "Analyzing photo");

        let outcome = match self
            .analyzer
            .analyze_image(&bytes, mime, &self.language)
            .await
            .and_then(|raw| interpret_identification(&raw))
        {
            Ok(mut record) => {
                record.image_url = Some(data_url(&bytes, mime));
                Ok(record)
            }
            Err(e) => Err(self.classify(attempt_id, e)),
        };

        self.finish(attempt_id, &user_id, None, outcome).await
    }

    /// Identify a plant by free-text name
    ///
    /// No match falls through to a direct by-name identification, a single
    /// match is selected automatically, several matches wait in `Selecting`.
    pub async fn submit_query(&self, query: &str) -> Result<AttemptSnapshot, WorkflowError> {
        let query = intake::validate_query(query)?.to_string();

        let (attempt_id, user_id) = self.begin(AttemptInput::Query(query.clone())).await?;
        tracing::info!(attempt_id, query = %query, "Resolving query");

        let candidates = self.resolver.resolve(&query, &self.language).await;

        match candidates.as_slice() {
            [] => {
                self.ensure_current(attempt_id).await?;
                tracing::debug!(attempt_id, "No candidates, identifying by name");
                let outcome = self.identify_by_name(attempt_id, &query, None).await;
                self.finish(attempt_id, &user_id, Some(query), outcome).await
            }
            [single] => {
                let candidate = single.clone();
                self.mark_selected(attempt_id, candidate.clone()).await?;
                tracing::debug!(
                    attempt_id,
                    scientific_name = %candidate.scientific_name,
                    "Single candidate, selecting automatically"
                );
                let outcome = self
                    .identify_by_name(attempt_id, &candidate.lookup_name(), Some(&candidate))
                    .await;
                self.finish(attempt_id, &user_id, Some(query), outcome).await
            }
            _ => {
                let mut attempt = self.attempt.lock().await;
                if !is_current(&attempt, attempt_id) {
                    return Err(WorkflowError::Superseded);
                }
                let transition = attempt.present_candidates(candidates)?;
                self.publish(&transition);
                Ok(attempt.snapshot())
            }
        }
    }

    /// Resolve the candidate at `index` of the current candidate list
    pub async fn select_candidate(&self, index: usize) -> Result<AttemptSnapshot, WorkflowError> {
        let (attempt_id, candidate, query) = {
            let attempt = self.attempt.lock().await;
            if attempt.phase != AttemptPhase::Selecting {
                return Err(InvalidTransition {
                    from: attempt.phase,
                    to: AttemptPhase::Analyzing,
                }
                .into());
            }
            let candidate = attempt
                .candidates
                .get(index)
                .cloned()
                .ok_or(WorkflowError::NoSuchCandidate(index))?;
            let query = attempt
                .input
                .as_ref()
                .and_then(|input| input.query().map(str::to_string));
            (attempt.attempt_id, candidate, query)
        };

        self.gate.resolve_auth().await;
        let user_id = {
            let mut attempt = self.attempt.lock().await;
            if attempt.attempt_id != attempt_id || attempt.phase != AttemptPhase::Selecting {
                return Err(WorkflowError::Superseded);
            }
            // Quota may have changed while the user was choosing
            let user_id = self.authorize().await?;
            let transition = attempt.pick(candidate.clone())?;
            self.publish(&transition);
            user_id
        };
        tracing::info!(
            attempt_id,
            index,
            scientific_name = %candidate.scientific_name,
            "Candidate selected"
        );

        let outcome = self
            .identify_by_name(attempt_id, &candidate.lookup_name(), Some(&candidate))
            .await;
        self.finish(attempt_id, &user_id, query, outcome).await
    }

    /// Abandon the current attempt
    ///
    /// In-flight work for the old attempt becomes stale.
    pub async fn reset(&self) -> AttemptSnapshot {
        let mut attempt = self.attempt.lock().await;
        let next_id = self.next_attempt_id();
        self.retire(&mut attempt);
        *attempt = IdentificationAttempt::idle(next_id);
        tracing::debug!(attempt_id = next_id, "Workflow reset");
        attempt.snapshot()
    }

    async fn authorize(&self) -> Result<String, WorkflowError> {
        match self.gate.check_access().await? {
            AccessDecision::Allowed { user_id } => Ok(user_id),
            AccessDecision::Denied { reason } => Err(WorkflowError::Denied(reason)),
        }
    }

    fn next_attempt_id(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Replace the current attempt with a new one in `Analyzing`
    ///
    /// Access is decided under the attempt lock, after any pending auth
    /// resolution, so a completion charged in between is always counted.
    async fn begin(&self, input: AttemptInput) -> Result<(u64, String), WorkflowError> {
        self.gate.resolve_auth().await;

        let mut attempt = self.attempt.lock().await;
        let user_id = self.authorize().await?;
        let attempt_id = self.next_attempt_id();
        self.retire(&mut attempt);

        let (fresh, transition) = IdentificationAttempt::begin(attempt_id, input);
        *attempt = fresh;
        self.publish(&transition);
        Ok((attempt_id, user_id))
    }

    /// Move a non-idle attempt back to Idle, announcing it
    fn retire(&self, attempt: &mut IdentificationAttempt) {
        if attempt.phase == AttemptPhase::Idle {
            return;
        }
        if let Ok(transition) = attempt.transition_to(AttemptPhase::Idle) {
            self.publish(&transition);
        }
    }

    async fn ensure_current(&self, attempt_id: u64) -> Result<(), WorkflowError> {
        let attempt = self.attempt.lock().await;
        if is_current(&attempt, attempt_id) {
            Ok(())
        } else {
            Err(WorkflowError::Superseded)
        }
    }

    async fn mark_selected(&self, attempt_id: u64, candidate: Candidate) -> Result<(), WorkflowError> {
        let mut attempt = self.attempt.lock().await;
        if !is_current(&attempt, attempt_id) {
            return Err(WorkflowError::Superseded);
        }
        attempt.selected = Some(candidate);
        Ok(())
    }

    /// Full record for a name, with a preview image attached when available
    async fn identify_by_name(
        &self,
        attempt_id: u64,
        name: &str,
        candidate: Option<&Candidate>,
    ) -> Result<PlantRecord, AttemptError> {
        let raw = self
            .analyzer
            .analyze_name(name, &self.language)
            .await
            .map_err(|e| self.classify(attempt_id, e))?;
        let mut record =
            interpret_identification(&raw).map_err(|e| self.classify(attempt_id, e))?;

        if record.image_url.is_none() {
            record.image_url = match candidate.and_then(|c| c.image_url.clone()) {
                Some(url) => Some(url),
                None => {
                    self.resolver
                        .preview_for(&record.scientific_name, &record.common_name)
                        .await
                }
            };
        }
        Ok(record)
    }

    fn classify(&self, attempt_id: u64, error: AnalysisError) -> AttemptError {
        let kind = error.kind();
        tracing::warn!(attempt_id, error = %error, kind = kind.as_str(), "Analysis failed");
        AttemptError::from(kind)
    }

    /// Apply an outcome to the attempt if it is still current
    ///
    /// Success is charged (and recorded in history) before the phase changes,
    /// all under the attempt lock so a concurrent reset cannot interleave.
    async fn finish(
        &self,
        attempt_id: u64,
        user_id: &str,
        query: Option<String>,
        outcome: Result<PlantRecord, AttemptError>,
    ) -> Result<AttemptSnapshot, WorkflowError> {
        let mut attempt = self.attempt.lock().await;
        if !is_current(&attempt, attempt_id) {
            tracing::debug!(
                attempt_id,
                current = attempt.attempt_id,
                "Discarding stale completion"
            );
            return Err(WorkflowError::Superseded);
        }

        let transition = match outcome {
            Ok(record) => match self.gate.ledger().record_success(user_id).await {
                Ok(_) => {
                    self.record_history(user_id, query, &attempt, &record).await;
                    tracing::info!(
                        attempt_id,
                        common_name = %record.common_name,
                        scientific_name = %record.scientific_name,
                        "Identification succeeded"
                    );
                    attempt.succeed(record)?
                }
                Err(e) => {
                    tracing::error!(attempt_id, user_id, error = %e, "Failed to record usage");
                    attempt.fail(AttemptError::from(ErrorKind::Unexpected))?
                }
            },
            Err(error) => attempt.fail(error)?,
        };

        self.publish(&transition);
        Ok(attempt.snapshot())
    }

    async fn record_history(
        &self,
        user_id: &str,
        query: Option<String>,
        attempt: &IdentificationAttempt,
        record: &PlantRecord,
    ) {
        let from_image = attempt.input.as_ref().is_some_and(AttemptInput::is_image);
        let resolved_name = if record.common_name.is_empty() {
            record.scientific_name.clone()
        } else {
            record.common_name.clone()
        };
        let entry = HistoryEntry::new(user_id, query, from_image, resolved_name);

        // History is informational; a failed write does not undo the charge
        if let Err(e) = self.history.record(&entry).await {
            tracing::warn!(user_id, error = %e, "Failed to record history entry");
        }
    }

    fn publish(&self, transition: &StateTransition) {
        tracing::debug!(
            attempt_id = transition.attempt_id,
            old_phase = ?transition.old_phase,
            new_phase = ?transition.new_phase,
            "Attempt phase changed"
        );
        self.event_bus.emit_lossy(VerdantEvent::AttemptPhaseChanged {
            attempt_id: transition.attempt_id,
            old_phase: transition.old_phase,
            new_phase: transition.new_phase,
            timestamp: transition.transitioned_at,
        });
    }
}

fn is_current(attempt: &IdentificationAttempt, attempt_id: u64) -> bool {
    attempt.attempt_id == attempt_id && attempt.phase == AttemptPhase::Analyzing
}

/// Inline `data:` URL for an uploaded photo
pub fn data_url(bytes: &[u8], mime: &str) -> String {
    format!("data:{};base64,{}", mime, BASE64.encode(bytes))
}
