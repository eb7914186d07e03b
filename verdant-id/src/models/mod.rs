//! Data models for the identification engine

pub mod attempt;
pub mod entitlement;
pub mod failure;
pub mod plant_record;
pub mod session;

pub use attempt::{
    AttemptInput, AttemptSnapshot, IdentificationAttempt, InputKind, InvalidTransition,
    StateTransition,
};
pub use entitlement::{
    plan_for, DenyReason, Entitlement, PlanType, SubscriptionRecord, SubscriptionStatus,
    UsageProfile, DEFAULT_FREE_QUOTA, UNLIMITED_CAP,
};
pub use failure::{AttemptError, ErrorKind};
pub use plant_record::{
    validate_plant_record, Candidate, CareGuide, HealthAssessment, MedicinalInfo, PlantRecord,
    SchemaViolation, Toxicity,
};
pub use session::{AuthState, AuthUser, HistoryEntry, Session};
