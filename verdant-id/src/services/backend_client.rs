//! Hosted backend REST client
//!
//! Talks to the auth endpoints (`/auth/v1`) and the subscriptions table
//! (`/rest/v1/subscriptions`). The current session is persisted in the local
//! settings table so a restart resumes it.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::time::Duration;
use thiserror::Error;

use crate::db::settings;
use crate::models::{AuthUser, Session, SubscriptionRecord};
use crate::services::auth_bootstrap::AuthBackend;
use crate::services::reconciler::SubscriptionSource;

const REQUEST_TIMEOUT_SECS: u64 = 20;
const PKCE_VERIFIER_BYTES: usize = 32;
/// Refresh tokens this long before they expire
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Not authorized")]
    Unauthorized,

    /// Exchange code was already redeemed (e.g. callback handled twice)
    #[error("Authorization code already used")]
    CodeAlreadyUsed,

    #[error("Auth error: {0}")]
    Auth(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Local storage error: {0}")]
    Storage(String),
}

impl From<verdant_common::Error> for BackendError {
    fn from(err: verdant_common::Error) -> Self {
        BackendError::Storage(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| Utc::now().timestamp() + secs));
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

/// Classify an auth error body
fn is_code_consumed(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("flow_state_not_found")
        || lower.contains("flow state")
        || lower.contains("already used")
}

/// Random PKCE code verifier (43 URL-safe characters)
fn new_code_verifier() -> String {
    let mut bytes = [0u8; PKCE_VERIFIER_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// S256 challenge for a verifier
fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

pub struct BackendClient {
    http_client: reqwest::Client,
    base_url: String,
    anon_key: String,
    db: SqlitePool,
}

impl BackendClient {
    pub fn new(
        base_url: impl Into<String>,
        anon_key: impl Into<String>,
        db: SqlitePool,
    ) -> Result<Self, BackendError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            db,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, request: reqwest::RequestBuilder, access_token: &str) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
    }

    async fn token_request(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<Session, BackendError> {
        let response = self
            .http_client
            .post(self.url("/auth/v1/token"))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if grant_type == "pkce" && is_code_consumed(&error_text) {
                return Err(BackendError::CodeAlreadyUsed);
            }
            if status.as_u16() == 401 {
                return Err(BackendError::Unauthorized);
            }
            return Err(BackendError::Api(status.as_u16(), error_text));
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;
        let session = tokens.into_session();
        settings::save_session(&self.db, &session).await?;
        Ok(session)
    }

    async fn fetch_user(&self, access_token: &str) -> Result<AuthUser, BackendError> {
        let response = self
            .authed(self.http_client.get(self.url("/auth/v1/user")), access_token)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let status = response.status();
        if matches!(status.as_u16(), 401 | 403) {
            return Err(BackendError::Unauthorized);
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(BackendError::Api(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))
    }

    fn authorize_url(
        &self,
        provider: &str,
        redirect_to: &str,
        challenge: &str,
    ) -> Result<String, BackendError> {
        let url = url::Url::parse_with_params(
            &self.url("/auth/v1/authorize"),
            &[
                ("provider", provider),
                ("redirect_to", redirect_to),
                ("code_challenge", challenge),
                ("code_challenge_method", "s256"),
            ],
        )
        .map_err(|e| BackendError::Parse(e.to_string()))?;
        Ok(url.into())
    }

    /// Token request body for redeeming `code` with the stored verifier
    ///
    /// Without a stored verifier the flow state is gone (never started or
    /// already redeemed), which the backend would report the same way.
    async fn pkce_exchange_body(&self, code: &str) -> Result<serde_json::Value, BackendError> {
        let Some(verifier) = settings::get_code_verifier(&self.db).await? else {
            tracing::info!("No sign-in in progress for exchange code");
            return Err(BackendError::CodeAlreadyUsed);
        };
        Ok(json!({ "auth_code": code, "code_verifier": verifier }))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Session, BackendError> {
        tracing::debug!("Refreshing auth session");
        self.token_request("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
    }

    /// Access token of the persisted session, refreshed if near expiry
    async fn access_token(&self) -> Result<String, BackendError> {
        match self.current_session().await? {
            Some(session) => Ok(session.access_token),
            None => Err(BackendError::Unauthorized),
        }
    }
}

fn is_expiring(session: &Session) -> bool {
    session
        .expires_at
        .is_some_and(|at| at - EXPIRY_MARGIN_SECS <= Utc::now().timestamp())
}

#[async_trait]
impl AuthBackend for BackendClient {
    async fn current_session(&self) -> Result<Option<Session>, BackendError> {
        let Some(session) = settings::load_session(&self.db).await? else {
            return Ok(None);
        };

        if is_expiring(&session) {
            let Some(refresh_token) = session.refresh_token.as_deref() else {
                settings::clear_session(&self.db).await?;
                return Ok(None);
            };
            return match self.refresh(refresh_token).await {
                Ok(session) => Ok(Some(session)),
                Err(BackendError::Unauthorized) | Err(BackendError::Api(400, _)) => {
                    tracing::info!("Persisted session can no longer be refreshed");
                    settings::clear_session(&self.db).await?;
                    Ok(None)
                }
                Err(e) => Err(e),
            };
        }

        match self.fetch_user(&session.access_token).await {
            Ok(user) => Ok(Some(Session { user, ..session })),
            Err(BackendError::Unauthorized) => {
                settings::clear_session(&self.db).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn begin_sign_in(&self, provider: &str, redirect_to: &str) -> Result<String, BackendError> {
        let verifier = new_code_verifier();
        let url = self.authorize_url(provider, redirect_to, &code_challenge(&verifier))?;
        settings::set_code_verifier(&self.db, &verifier).await?;
        Ok(url)
    }

    async fn exchange_code(&self, code: &str) -> Result<Session, BackendError> {
        let body = self.pkce_exchange_body(code).await?;
        let session = self.token_request("pkce", body).await?;
        settings::clear_code_verifier(&self.db).await?;
        Ok(session)
    }

    async fn session_from_tokens(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<Session, BackendError> {
        let user = self.fetch_user(access_token).await?;
        let session = Session {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.map(str::to_string),
            expires_at: None,
            user,
        };
        settings::save_session(&self.db, &session).await?;
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        if let Some(session) = settings::load_session(&self.db).await? {
            let result = self
                .authed(
                    self.http_client.post(self.url("/auth/v1/logout")),
                    &session.access_token,
                )
                .send()
                .await;
            if let Err(e) = result {
                tracing::warn!(error = %e, "Remote sign-out failed, clearing local session anyway");
            }
        }
        settings::clear_session(&self.db).await?;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionSource for BackendClient {
    async fn fetch_subscription(
        &self,
        user_id: &str,
    ) -> Result<Option<SubscriptionRecord>, BackendError> {
        let access_token = self.access_token().await?;
        let user_filter = format!("eq.{}", user_id);

        let response = self
            .authed(
                self.http_client.get(self.url("/rest/v1/subscriptions")),
                &access_token,
            )
            .query(&[
                ("user_id", user_filter.as_str()),
                ("select", "status,plan_type,current_period_end"),
                ("order", "created_at.desc"),
                ("limit", "1"),
            ])
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(BackendError::Api(status.as_u16(), error_text));
        }

        let mut rows: Vec<SubscriptionRecord> = response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;

        tracing::debug!(user_id, rows = rows.len(), "Fetched subscription record");
        Ok(rows.pop())
    }
}
