//! Auth session bootstrap
//!
//! Publishes a tri-state auth signal on a watch channel. The state starts as
//! `Loading`; an initial "no session" report is not trusted until one
//! authoritative lookup against the backend has confirmed it. Route guards
//! wait (bounded) for `Loading` to clear and treat a timeout as signed out.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;
use verdant_common::events::{AuthStatus, EventBus, VerdantEvent};

use crate::models::{AuthState, Session};
use crate::services::backend_client::BackendError;
use crate::services::entitlement::EntitlementLedger;

pub const DEFAULT_AUTH_GUARD_TIMEOUT_MS: u64 = 5000;

/// Hosted auth service
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Authoritative lookup of the current session (refreshing if needed)
    async fn current_session(&self) -> Result<Option<Session>, BackendError>;

    /// Start a PKCE sign-in with `provider`; returns the URL to open
    async fn begin_sign_in(&self, provider: &str, redirect_to: &str) -> Result<String, BackendError>;

    /// Redeem an OAuth exchange code
    async fn exchange_code(&self, code: &str) -> Result<Session, BackendError>;

    /// Adopt tokens delivered in a callback fragment
    async fn session_from_tokens(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<Session, BackendError>;

    async fn sign_out(&self) -> Result<(), BackendError>;
}

/// Auth change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthSignal {
    /// First report after start-up; `None` is not trusted
    InitialSession(Option<Session>),
    SignedIn(Session),
    TokenRefreshed(Session),
    SignedOut,
}

/// Parameters of an OAuth callback URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackParams {
    /// Implicit flow: tokens in the fragment
    Tokens {
        access_token: String,
        refresh_token: Option<String>,
    },
    /// PKCE flow: `?code=`
    Code(String),
    /// Provider reported an error
    Error(String),
    /// Nothing auth-related in the URL
    Empty,
}

impl CallbackParams {
    pub fn from_url(url: &Url) -> Self {
        let fragment_pairs: Vec<(String, String)> = url
            .fragment()
            .map(|fragment| {
                url::form_urlencoded::parse(fragment.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();
        let query_pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        let find = |key: &str| {
            fragment_pairs
                .iter()
                .chain(query_pairs.iter())
                .find(|(k, v)| k == key && !v.is_empty())
                .map(|(_, v)| v.clone())
        };

        if let Some(error) = find("error") {
            return CallbackParams::Error(find("error_description").unwrap_or(error));
        }
        if let Some(access_token) = find("access_token") {
            return CallbackParams::Tokens {
                access_token,
                refresh_token: find("refresh_token"),
            };
        }
        if let Some(code) = find("code") {
            return CallbackParams::Code(code);
        }
        CallbackParams::Empty
    }
}

/// Owns the auth signal
pub struct AuthBootstrapper {
    backend: Arc<dyn AuthBackend>,
    ledger: Arc<EntitlementLedger>,
    event_bus: EventBus,
    state_tx: watch::Sender<AuthState>,
}

impl AuthBootstrapper {
    pub fn new(
        backend: Arc<dyn AuthBackend>,
        ledger: Arc<EntitlementLedger>,
        event_bus: EventBus,
    ) -> Self {
        let (state_tx, _) = watch::channel(AuthState::Loading);
        Self {
            backend,
            ledger,
            event_bus,
            state_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state_tx.subscribe()
    }

    pub fn current(&self) -> AuthState {
        self.state_tx.borrow().clone()
    }

    /// Authoritative session lookup
    ///
    /// A network failure leaves the state as it was (typically `Loading`) so
    /// guards fall back to their timeout instead of signing the user out.
    pub async fn bootstrap(&self) -> AuthState {
        match self.backend.current_session().await {
            Ok(Some(session)) => self.set_authenticated(session).await,
            Ok(None) => self.set_unauthenticated().await,
            Err(BackendError::Network(e)) => {
                tracing::warn!(error = %e, "Session lookup failed, auth state unresolved");
                self.current()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Session lookup rejected, treating as signed out");
                self.set_unauthenticated().await
            }
        }
    }

    pub async fn apply_signal(&self, signal: AuthSignal) -> AuthState {
        match signal {
            AuthSignal::InitialSession(None) => {
                tracing::debug!("Initial auth report has no session, confirming with backend");
                self.bootstrap().await
            }
            AuthSignal::InitialSession(Some(session))
            | AuthSignal::SignedIn(session)
            | AuthSignal::TokenRefreshed(session) => self.set_authenticated(session).await,
            AuthSignal::SignedOut => self.set_unauthenticated().await,
        }
    }

    /// Complete an OAuth redirect
    ///
    /// An already-redeemed code is not an error: the earlier redemption most
    /// likely created the session, so the backend is asked again.
    pub async fn handle_callback(&self, url: &Url) -> Result<AuthState, BackendError> {
        match CallbackParams::from_url(url) {
            CallbackParams::Tokens {
                access_token,
                refresh_token,
            } => {
                let session = self
                    .backend
                    .session_from_tokens(&access_token, refresh_token.as_deref())
                    .await?;
                Ok(self.set_authenticated(session).await)
            }
            CallbackParams::Code(code) => match self.backend.exchange_code(&code).await {
                Ok(session) => Ok(self.set_authenticated(session).await),
                Err(BackendError::CodeAlreadyUsed) => {
                    tracing::info!("Auth code already redeemed, re-checking session");
                    Ok(self.bootstrap().await)
                }
                Err(e) => Err(e),
            },
            CallbackParams::Error(description) => {
                tracing::warn!(error = %description, "Auth provider returned an error");
                if self.current().is_loading() {
                    self.bootstrap().await;
                }
                Err(BackendError::Auth(description))
            }
            CallbackParams::Empty => Ok(self.bootstrap().await),
        }
    }

    /// Authorize URL for a new sign-in; the callback completes it
    pub async fn begin_sign_in(
        &self,
        provider: &str,
        redirect_to: &str,
    ) -> Result<String, BackendError> {
        let url = self.backend.begin_sign_in(provider, redirect_to).await?;
        tracing::info!(provider, redirect_to, "Sign-in started");
        Ok(url)
    }

    pub async fn sign_out(&self) -> AuthState {
        if let Err(e) = self.backend.sign_out().await {
            tracing::warn!(error = %e, "Backend sign-out failed");
        }
        self.set_unauthenticated().await
    }

    async fn set_authenticated(&self, session: Session) -> AuthState {
        let user = session.user;
        if let Err(e) = self.ledger.load(&user.id).await {
            tracing::error!(user_id = %user.id, error = %e, "Failed to load usage profile");
        }
        self.publish(AuthState::Authenticated { user })
    }

    async fn set_unauthenticated(&self) -> AuthState {
        self.ledger.clear().await;
        self.publish(AuthState::Unauthenticated)
    }

    fn publish(&self, state: AuthState) -> AuthState {
        let changed = *self.state_tx.borrow() != state;
        self.state_tx.send_replace(state.clone());

        if changed {
            let (status, user_id) = match &state {
                AuthState::Loading => (AuthStatus::Loading, None),
                AuthState::Authenticated { user } => {
                    (AuthStatus::Authenticated, Some(user.id.clone()))
                }
                AuthState::Unauthenticated => (AuthStatus::Unauthenticated, None),
            };
            tracing::info!(?status, user_id = ?user_id, "Auth state changed");
            self.event_bus.emit_lossy(VerdantEvent::AuthStateChanged {
                status,
                user_id,
                timestamp: Utc::now(),
            });
        }
        state
    }

    /// Apply signals from `signals` until the returned listener is dropped
    pub fn spawn_listener(self: &Arc<Self>, mut signals: mpsc::Receiver<AuthSignal>) -> AuthListener {
        let token = CancellationToken::new();
        let child = token.child_token();
        let bootstrapper = Arc::clone(self);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = child.cancelled() => {
                        tracing::debug!("Auth listener cancelled");
                        break;
                    }
                    signal = signals.recv() => match signal {
                        Some(signal) => {
                            bootstrapper.apply_signal(signal).await;
                        }
                        None => break,
                    }
                }
            }
        });

        AuthListener {
            token,
            handle: Some(handle),
        }
    }
}

/// Running auth listener; cancelled when dropped
pub struct AuthListener {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl AuthListener {
    /// Token cancelled together with this listener
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel and wait for the task to exit
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for AuthListener {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Wait for the auth state to leave `Loading`, at most `timeout`
///
/// On timeout the caller proceeds as signed out.
pub async fn wait_until_resolved(
    rx: &mut watch::Receiver<AuthState>,
    timeout: Duration,
) -> AuthState {
    match tokio::time::timeout(timeout, rx.wait_for(|state| !state.is_loading())).await {
        Ok(Ok(state)) => state.clone(),
        Ok(Err(_)) => {
            tracing::warn!("Auth signal closed while loading");
            AuthState::Unauthenticated
        }
        Err(_) => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Auth still loading, acting as signed out");
            AuthState::Unauthenticated
        }
    }
}
