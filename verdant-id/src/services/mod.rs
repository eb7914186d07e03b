//! Engine services and external collaborator clients

pub mod analyzer;
pub mod auth_bootstrap;
pub mod backend_client;
pub mod candidate_resolver;
pub mod entitlement;
pub mod gemini_client;
pub mod image_lookup;
pub mod intake;
pub mod reconciler;
pub mod workflow;

pub use analyzer::{AnalysisError, PlantAnalyzer};
pub use auth_bootstrap::{
    wait_until_resolved, AuthBackend, AuthBootstrapper, AuthListener, AuthSignal, CallbackParams,
};
pub use backend_client::{BackendClient, BackendError};
pub use candidate_resolver::CandidateResolver;
pub use entitlement::{AccessDecision, EntitlementGate, EntitlementLedger};
pub use gemini_client::GeminiClient;
pub use image_lookup::{ImageLookup, LookupError, WikiImageLookup};
pub use intake::IntakeRejection;
pub use reconciler::{
    strip_checkout_params, CheckoutReturn, PaymentOutcome, ReconcileReport, SubscriptionReconciler,
    SubscriptionSource,
};
pub use workflow::{IdentificationWorkflow, WorkflowError};
