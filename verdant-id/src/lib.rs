//! verdant-id library interface
//!
//! The identification engine (workflow, entitlement gate, subscription
//! reconciler, auth bootstrap) plus the HTTP surface of the localhost
//! companion service.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod store;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use verdant_common::events::EventBus;

use crate::config::EngineSettings;
use crate::services::{
    AuthBackend, AuthBootstrapper, CandidateResolver, EntitlementGate, EntitlementLedger,
    IdentificationWorkflow, ImageLookup, PlantAnalyzer, SubscriptionReconciler,
    SubscriptionSource,
};
use crate::store::{ApiKeyStore, CollectionStore, HistoryStore, UsageStore};

/// External services the engine calls
pub struct Collaborators {
    pub analyzer: Arc<dyn PlantAnalyzer>,
    pub images: Arc<dyn ImageLookup>,
    pub auth_backend: Arc<dyn AuthBackend>,
    pub subscriptions: Arc<dyn SubscriptionSource>,
}

/// Persistence used by the engine
pub struct Stores {
    pub usage: Arc<dyn UsageStore>,
    pub history: Arc<dyn HistoryStore>,
    pub collection: Arc<dyn CollectionStore>,
    pub api_keys: Arc<dyn ApiKeyStore>,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub event_bus: EventBus,
    pub workflow: Arc<IdentificationWorkflow>,
    pub auth: Arc<AuthBootstrapper>,
    pub ledger: Arc<EntitlementLedger>,
    pub reconciler: Arc<SubscriptionReconciler>,
    pub collection: Arc<dyn CollectionStore>,
    pub history: Arc<dyn HistoryStore>,
    pub api_keys: Arc<dyn ApiKeyStore>,
    pub settings: Arc<EngineSettings>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last background error, reported by /health
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    /// Wire the engine components together
    pub fn new(
        event_bus: EventBus,
        collaborators: Collaborators,
        stores: Stores,
        settings: EngineSettings,
    ) -> Self {
        let ledger = Arc::new(EntitlementLedger::new(
            stores.usage,
            event_bus.clone(),
            settings.free_quota,
        ));

        let auth = Arc::new(AuthBootstrapper::new(
            collaborators.auth_backend,
            ledger.clone(),
            event_bus.clone(),
        ));

        let gate = EntitlementGate::new(
            auth.subscribe(),
            ledger.clone(),
            settings.auth_guard_timeout,
        );
        let resolver = Arc::new(CandidateResolver::new(
            collaborators.analyzer.clone(),
            collaborators.images,
        ));

        let workflow = Arc::new(IdentificationWorkflow::new(
            collaborators.analyzer,
            resolver,
            gate,
            stores.history.clone(),
            event_bus.clone(),
            settings.language.clone(),
        ));

        let reconciler = Arc::new(SubscriptionReconciler::new(
            collaborators.subscriptions,
            ledger.clone(),
            event_bus.clone(),
            settings.reconcile_policy.clone(),
            settings.refetch_delay,
        ));

        Self {
            event_bus,
            workflow,
            auth,
            ledger,
            reconciler,
            collection: stores.collection,
            history: stores.history,
            api_keys: stores.api_keys,
            settings: Arc::new(settings),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Remember a background failure for diagnostics
    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::health_routes())
        .merge(api::auth_routes())
        .merge(api::checkout_routes())
        .merge(api::identify_routes())
        .merge(api::collection_routes())
        .merge(api::settings_routes())
        .route("/events", get(api::event_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
