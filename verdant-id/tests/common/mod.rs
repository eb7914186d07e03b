//! Test doubles and harness shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use verdant_common::events::EventBus;

use verdant_id::config::EngineSettings;
use verdant_id::models::{AuthUser, Session, SubscriptionRecord};
use verdant_id::services::{
    AnalysisError, AuthBackend, AuthSignal, BackendError, ImageLookup, LookupError, PlantAnalyzer,
    SubscriptionSource,
};
use verdant_id::store::MemoryStore;
use verdant_id::{AppState, Collaborators, Stores};

/// Smallest buffer the intake validator accepts as PNG
pub const PNG_BYTES: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

/// Valid identification response
pub fn plant_json(common: &str, scientific: &str) -> Value {
    json!({
        "commonName": common,
        "scientificName": scientific,
        "description": "A flowering shrub.",
        "care": {
            "water": "Keep soil moist",
            "light": "Full sun",
            "soil": "Loamy, well drained",
            "temperature": "15-25 C",
            "humidity": "Moderate",
            "fertilizer": "Monthly in spring"
        },
        "health": {
            "isHealthy": true,
            "diagnosis": "Healthy",
            "symptoms": [],
            "treatment": []
        },
        "toxicity": { "isToxic": false, "details": "Non-toxic to pets" },
        "medicinal": { "isMedicinal": false, "uses": [] },
        "wateringIntervalDays": 4
    })
}

pub fn candidate_json(common: &str, scientific: &str) -> Value {
    json!({"commonName": common, "scientificName": scientific})
}

pub fn session_for(user_id: &str) -> Session {
    Session {
        access_token: format!("token-{}", user_id),
        refresh_token: Some("refresh".to_string()),
        expires_at: None,
        user: AuthUser {
            id: user_id.to_string(),
            email: Some(format!("{}@example.com", user_id)),
        },
    }
}

/// Scripted analyzer
///
/// `analyze_name` answers with the first registered plant whose key occurs in
/// the requested name, or `{"notFound": true}`.
#[derive(Default)]
pub struct MockAnalyzer {
    pub image_response: Mutex<Option<Result<Value, AnalysisError>>>,
    pub name_responses: Mutex<Vec<(String, Result<Value, AnalysisError>)>>,
    pub candidate_responses: Mutex<HashMap<String, Result<Value, AnalysisError>>>,
    pub image_calls: AtomicUsize,
    pub name_calls: AtomicUsize,
    pub match_calls: AtomicUsize,
    pub requested_names: Mutex<Vec<String>>,
    /// When set, every call signals `entered` and waits for `release`
    pub hold: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl MockAnalyzer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_image(&self, response: Result<Value, AnalysisError>) {
        *self.image_response.lock().unwrap() = Some(response);
    }

    pub fn on_name(&self, key: &str, response: Result<Value, AnalysisError>) {
        self.name_responses
            .lock()
            .unwrap()
            .push((key.to_string(), response));
    }

    pub fn on_match(&self, query: &str, response: Result<Value, AnalysisError>) {
        self.candidate_responses
            .lock()
            .unwrap()
            .insert(query.to_string(), response);
    }

    /// Make calls block; returns (entered, release)
    pub fn hold_calls(&self) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.hold.lock().unwrap() = Some((entered.clone(), release.clone()));
        (entered, release)
    }

    pub fn total_calls(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst)
            + self.name_calls.load(Ordering::SeqCst)
            + self.match_calls.load(Ordering::SeqCst)
    }

    async fn maybe_hold(&self) {
        let hold = self.hold.lock().unwrap().clone();
        if let Some((entered, release)) = hold {
            entered.notify_one();
            release.notified().await;
        }
    }
}

#[async_trait]
impl PlantAnalyzer for MockAnalyzer {
    async fn analyze_image(&self, _: &[u8], _: &str, _: &str) -> Result<Value, AnalysisError> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_hold().await;
        self.image_response
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(Ok(json!({"isPlant": false})))
    }

    async fn analyze_name(&self, name: &str, _: &str) -> Result<Value, AnalysisError> {
        self.name_calls.fetch_add(1, Ordering::SeqCst);
        self.requested_names.lock().unwrap().push(name.to_string());
        self.maybe_hold().await;
        self.name_responses
            .lock()
            .unwrap()
            .iter()
            .find(|(key, _)| name.contains(key.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or(Ok(json!({"notFound": true})))
    }

    async fn match_candidates(&self, query: &str, _: &str) -> Result<Value, AnalysisError> {
        self.match_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_hold().await;
        self.candidate_responses
            .lock()
            .unwrap()
            .get(query)
            .cloned()
            .unwrap_or(Ok(json!({"candidates": []})))
    }
}

/// Name → preview URL table
#[derive(Default)]
pub struct MockLookup {
    pub images: Mutex<HashMap<String, String>>,
    pub queries: Mutex<Vec<String>>,
}

impl MockLookup {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, name: &str, url: &str) {
        self.images
            .lock()
            .unwrap()
            .insert(name.to_string(), url.to_string());
    }
}

#[async_trait]
impl ImageLookup for MockLookup {
    async fn lookup(&self, query: &str) -> Result<Option<String>, LookupError> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(self.images.lock().unwrap().get(query).cloned())
    }
}

/// Scripted auth backend
#[derive(Default)]
pub struct MockAuthBackend {
    pub current: Mutex<Option<Result<Option<Session>, BackendError>>>,
    pub exchange: Mutex<Option<Result<Session, BackendError>>>,
    pub lookups: AtomicUsize,
    pub exchanges: AtomicUsize,
}

impl MockAuthBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_current(&self, response: Result<Option<Session>, BackendError>) {
        *self.current.lock().unwrap() = Some(response);
    }

    pub fn set_exchange(&self, response: Result<Session, BackendError>) {
        *self.exchange.lock().unwrap() = Some(response);
    }
}

#[async_trait]
impl AuthBackend for MockAuthBackend {
    async fn current_session(&self) -> Result<Option<Session>, BackendError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.current.lock().unwrap().clone().unwrap_or(Ok(None))
    }

    async fn begin_sign_in(&self, provider: &str, redirect_to: &str) -> Result<String, BackendError> {
        Ok(format!(
            "https://backend.test/auth/v1/authorize?provider={}&redirect_to={}",
            provider, redirect_to
        ))
    }

    async fn exchange_code(&self, _code: &str) -> Result<Session, BackendError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        self.exchange
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(Err(BackendError::Auth("no exchange scripted".to_string())))
    }

    async fn session_from_tokens(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<Session, BackendError> {
        let mut session = session_for("token-user");
        session.access_token = access_token.to_string();
        session.refresh_token = refresh_token.map(str::to_string);
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Subscription source answering from a script, repeating the last answer
#[derive(Default)]
pub struct MockSubscriptions {
    pub responses: Mutex<VecDeque<Result<Option<SubscriptionRecord>, BackendError>>>,
    pub fetches: AtomicUsize,
}

impl MockSubscriptions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, responses: Vec<Result<Option<SubscriptionRecord>, BackendError>>) {
        *self.responses.lock().unwrap() = responses.into();
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubscriptionSource for MockSubscriptions {
    async fn fetch_subscription(
        &self,
        _user_id: &str,
    ) -> Result<Option<SubscriptionRecord>, BackendError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap();
        if responses.len() > 1 {
            responses.pop_front().unwrap_or(Ok(None))
        } else {
            responses.front().cloned().unwrap_or(Ok(None))
        }
    }
}

pub struct Harness {
    pub state: AppState,
    pub analyzer: Arc<MockAnalyzer>,
    pub lookup: Arc<MockLookup>,
    pub auth_backend: Arc<MockAuthBackend>,
    pub subscriptions: Arc<MockSubscriptions>,
    pub store: Arc<MemoryStore>,
    pub event_bus: EventBus,
}

impl Harness {
    /// Engine in `Loading` auth state
    pub fn new() -> Self {
        Self::with_settings(EngineSettings::default())
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        let analyzer = MockAnalyzer::new();
        let lookup = MockLookup::new();
        let auth_backend = MockAuthBackend::new();
        let subscriptions = MockSubscriptions::new();
        let store = Arc::new(MemoryStore::new());
        let event_bus = EventBus::new(256);

        let state = AppState::new(
            event_bus.clone(),
            Collaborators {
                analyzer: analyzer.clone(),
                images: lookup.clone(),
                auth_backend: auth_backend.clone(),
                subscriptions: subscriptions.clone(),
            },
            Stores {
                usage: store.clone(),
                history: store.clone(),
                collection: store.clone(),
                api_keys: store.clone(),
            },
            settings,
        );

        Self {
            state,
            analyzer,
            lookup,
            auth_backend,
            subscriptions,
            store,
            event_bus,
        }
    }

    /// Engine with `user_id` signed in
    pub async fn signed_in(user_id: &str) -> Self {
        let harness = Self::new();
        harness.sign_in(user_id).await;
        harness
    }

    pub async fn sign_in(&self, user_id: &str) {
        self.state
            .auth
            .apply_signal(AuthSignal::SignedIn(session_for(user_id)))
            .await;
    }
}
