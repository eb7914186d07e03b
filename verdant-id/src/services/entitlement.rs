//! Entitlement cache and access gate
//!
//! The ledger is the only cross-attempt mutable state: the gate reads it, and
//! attempt completion and the subscription reconciler write it. Every write
//! goes to the `UsageStore` first so counts survive a restart.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use verdant_common::events::{EventBus, PlanTier, VerdantEvent};
use verdant_common::Result;

use crate::models::{AuthState, DenyReason, Entitlement, UsageProfile};
use crate::services::auth_bootstrap::wait_until_resolved;
use crate::store::UsageStore;

/// Per-user usage/plan cache backed by a `UsageStore`
pub struct EntitlementLedger {
    store: Arc<dyn UsageStore>,
    event_bus: EventBus,
    free_cap: u32,
    cached: RwLock<Option<UsageProfile>>,
}

impl EntitlementLedger {
    pub fn new(store: Arc<dyn UsageStore>, event_bus: EventBus, free_cap: u32) -> Self {
        Self {
            store,
            event_bus,
            free_cap,
            cached: RwLock::new(None),
        }
    }

    pub fn free_cap(&self) -> u32 {
        self.free_cap
    }

    /// Profile for `user_id`, from cache when it belongs to the same user
    pub async fn profile(&self, user_id: &str) -> Result<UsageProfile> {
        if let Some(profile) = self.cached.read().await.as_ref() {
            if profile.user_id == user_id {
                return Ok(profile.clone());
            }
        }
        self.load(user_id).await
    }

    /// Reload from the store, replacing the cache
    pub async fn load(&self, user_id: &str) -> Result<UsageProfile> {
        let profile = self.store.load_profile(user_id).await?;
        tracing::debug!(
            user_id,
            plan = profile.plan.as_str(),
            used = profile.used,
            "Loaded usage profile"
        );
        *self.cached.write().await = Some(profile.clone());
        Ok(profile)
    }

    /// Entitlement for the given auth state; `Loading` counts as signed out
    pub async fn entitlement(&self, auth: &AuthState) -> Result<Entitlement> {
        match auth.user() {
            Some(user) => {
                let profile = self.profile(&user.id).await?;
                Ok(Entitlement::for_user(profile.plan, profile.used, self.free_cap))
            }
            None => Ok(Entitlement::anonymous(self.free_cap)),
        }
    }

    /// Charge one successful identification
    pub async fn record_success(&self, user_id: &str) -> Result<u32> {
        let used = self.store.increment_usage(user_id).await?;
        let cached_plan = match self.cached.write().await.as_mut() {
            Some(profile) if profile.user_id == user_id => {
                profile.used = used;
                Some(profile.plan)
            }
            _ => None,
        };
        let plan = match cached_plan {
            Some(plan) => plan,
            None => self.load(user_id).await?.plan,
        };

        let entitlement = Entitlement::for_user(plan, used, self.free_cap);
        tracing::info!(user_id, used, cap = entitlement.cap, "Identification charged");
        self.event_bus.emit_lossy(VerdantEvent::UsageRecorded {
            user_id: user_id.to_string(),
            used,
            cap: entitlement.cap,
            timestamp: Utc::now(),
        });
        Ok(used)
    }

    /// Persist a plan change; `confirmed` marks a re-fetch that agreed
    pub async fn set_plan(&self, user_id: &str, plan: PlanTier, confirmed: bool) -> Result<()> {
        self.store.set_plan(user_id, plan).await?;
        let updated = match self.cached.write().await.as_mut() {
            Some(profile) if profile.user_id == user_id => {
                profile.plan = plan;
                true
            }
            _ => false,
        };
        if !updated {
            self.load(user_id).await?;
        }

        tracing::info!(user_id, plan = plan.as_str(), confirmed, "Plan updated");
        self.event_bus.emit_lossy(VerdantEvent::PlanChanged {
            user_id: user_id.to_string(),
            plan,
            confirmed,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Forget the cached profile (sign-out)
    pub async fn clear(&self) {
        *self.cached.write().await = None;
    }
}

/// Gate outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AccessDecision {
    Allowed { user_id: String },
    Denied { reason: DenyReason },
}

/// Decides whether a costed operation may proceed
///
/// Re-derives the entitlement from the auth signal and ledger on every call;
/// nothing is cached between attempts. A `Loading` signal is waited on for at
/// most `resolve_timeout` before counting as signed out.
#[derive(Clone)]
pub struct EntitlementGate {
    auth: watch::Receiver<AuthState>,
    ledger: Arc<EntitlementLedger>,
    resolve_timeout: Duration,
}

impl EntitlementGate {
    pub fn new(
        auth: watch::Receiver<AuthState>,
        ledger: Arc<EntitlementLedger>,
        resolve_timeout: Duration,
    ) -> Self {
        Self {
            auth,
            ledger,
            resolve_timeout,
        }
    }

    pub fn ledger(&self) -> &Arc<EntitlementLedger> {
        &self.ledger
    }

    pub fn auth_state(&self) -> AuthState {
        self.auth.borrow().clone()
    }

    /// Auth state once `Loading` has cleared or the wait timed out
    pub async fn resolve_auth(&self) -> AuthState {
        let mut rx = self.auth.clone();
        wait_until_resolved(&mut rx, self.resolve_timeout).await
    }

    /// Entitlement for the current auth state
    pub async fn current(&self) -> Result<Entitlement> {
        let auth = self.auth_state();
        self.ledger.entitlement(&auth).await
    }

    pub async fn check_access(&self) -> Result<AccessDecision> {
        let auth = self.resolve_auth().await;
        let entitlement = self.ledger.entitlement(&auth).await?;

        let decision = match (entitlement.decide(), auth.user()) {
            (Ok(()), Some(user)) => AccessDecision::Allowed {
                user_id: user.id.clone(),
            },
            (Err(reason), _) => AccessDecision::Denied { reason },
            (Ok(()), None) => AccessDecision::Denied {
                reason: DenyReason::Unauthenticated,
            },
        };

        if let AccessDecision::Denied { reason } = &decision {
            tracing::debug!(
                ?reason,
                used = entitlement.used,
                cap = entitlement.cap,
                "Access denied"
            );
        }
        Ok(decision)
    }
}
