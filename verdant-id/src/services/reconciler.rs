//! Subscription reconciliation after a checkout redirect
//!
//! The subscription row is written by a payment webhook some time after the
//! browser returns, so the record is polled on a bounded schedule. The local
//! plan is upgraded only after an active (or trialing) record was observed,
//! and a forced re-fetch shortly afterwards corrects any divergence.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;
use verdant_common::events::{EventBus, PlanTier, VerdantEvent};
use verdant_common::{poll_until, PollOutcome, Result, RetryPolicy};

use crate::models::{plan_for, SubscriptionRecord};
use crate::services::backend_client::BackendError;
use crate::services::entitlement::EntitlementLedger;

pub const DEFAULT_RECONCILE_DELAYS_MS: [u64; 3] = [2000, 3000, 5000];
pub const DEFAULT_REFETCH_DELAY_MS: u64 = 1500;

const PAYMENT_PARAM: &str = "payment";
const SESSION_ID_PARAM: &str = "session_id";

/// Read access to the externally owned subscription table
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    /// Latest subscription row for the user, if any
    async fn fetch_subscription(
        &self,
        user_id: &str,
    ) -> std::result::Result<Option<SubscriptionRecord>, BackendError>;
}

/// Payment outcome carried by the checkout return URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Success,
    Cancelled,
}

/// Parsed checkout return parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutReturn {
    pub outcome: PaymentOutcome,
    pub session_id: Option<String>,
}

impl CheckoutReturn {
    /// `None` when the URL is not a checkout return
    pub fn from_url(url: &Url) -> Option<Self> {
        let mut outcome = None;
        let mut session_id = None;

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                PAYMENT_PARAM => {
                    outcome = match value.as_ref() {
                        "success" => Some(PaymentOutcome::Success),
                        "cancelled" | "canceled" => Some(PaymentOutcome::Cancelled),
                        _ => None,
                    }
                }
                SESSION_ID_PARAM if !value.is_empty() => session_id = Some(value.into_owned()),
                _ => {}
            }
        }

        outcome.map(|outcome| Self {
            outcome,
            session_id,
        })
    }

    /// Whether this return should start reconciliation
    pub fn should_reconcile(&self) -> bool {
        self.outcome == PaymentOutcome::Success && self.session_id.is_some()
    }
}

/// Copy of `url` without the checkout parameters
pub fn strip_checkout_params(url: &Url) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != PAYMENT_PARAM && key != SESSION_ID_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut stripped = url.clone();
    if kept.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(kept);
    }
    stripped
}

/// Outcome of one reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub plan: PlanTier,
    /// No authorizing record observed within the schedule
    pub verification_pending: bool,
    pub checks: usize,
    /// Session id had already been reconciled; nothing was done
    pub duplicate: bool,
}

pub struct SubscriptionReconciler {
    source: Arc<dyn SubscriptionSource>,
    ledger: Arc<EntitlementLedger>,
    event_bus: EventBus,
    policy: RetryPolicy,
    refetch_delay: Duration,
    consumed: Mutex<HashSet<String>>,
}

impl SubscriptionReconciler {
    pub fn new(
        source: Arc<dyn SubscriptionSource>,
        ledger: Arc<EntitlementLedger>,
        event_bus: EventBus,
        policy: RetryPolicy,
        refetch_delay: Duration,
    ) -> Self {
        Self {
            source,
            ledger,
            event_bus,
            policy,
            refetch_delay,
            consumed: Mutex::new(HashSet::new()),
        }
    }

    /// Poll for the subscription created by checkout `checkout_session_id`
    ///
    /// Each session id is reconciled at most once per process; a run that
    /// fails with an error releases the id again.
    pub async fn reconcile(
        &self,
        user_id: &str,
        checkout_session_id: &str,
    ) -> Result<ReconcileReport> {
        if !self
            .consumed
            .lock()
            .await
            .insert(checkout_session_id.to_string())
        {
            tracing::info!(
                user_id,
                checkout_session_id,
                "Checkout session already reconciled, ignoring"
            );
            let profile = self.ledger.profile(user_id).await?;
            return Ok(ReconcileReport {
                plan: profile.plan,
                verification_pending: false,
                checks: 0,
                duplicate: true,
            });
        }

        let report = self.poll_and_apply(user_id, checkout_session_id).await;
        if report.is_err() {
            // Failed run does not count; the same session may be retried
            self.consumed.lock().await.remove(checkout_session_id);
        }
        report
    }

    async fn poll_and_apply(
        &self,
        user_id: &str,
        checkout_session_id: &str,
    ) -> Result<ReconcileReport> {
        tracing::info!(
            user_id,
            checkout_session_id,
            max_checks = self.policy.max_checks(),
            "Reconciling subscription after checkout"
        );

        let outcome = poll_until(
            "subscription_reconcile",
            &self.policy,
            || self.source.fetch_subscription(user_id),
            |record| plan_for(record.as_ref()) == PlanTier::Pro,
        )
        .await;

        match outcome {
            PollOutcome::Satisfied { checks, .. } => {
                self.ledger.set_plan(user_id, PlanTier::Pro, false).await?;

                tokio::time::sleep(self.refetch_delay).await;
                let plan = self.refresh_plan(user_id).await?;

                Ok(ReconcileReport {
                    plan,
                    verification_pending: false,
                    checks,
                    duplicate: false,
                })
            }
            PollOutcome::Exhausted { last, checks } => {
                tracing::warn!(
                    user_id,
                    checks,
                    last_status = ?last.flatten().map(|r| r.status),
                    "No active subscription observed, verification pending"
                );
                self.event_bus.emit_lossy(VerdantEvent::VerificationPending {
                    user_id: user_id.to_string(),
                    timestamp: Utc::now(),
                });
                let profile = self.ledger.profile(user_id).await?;
                Ok(ReconcileReport {
                    plan: profile.plan,
                    verification_pending: true,
                    checks,
                    duplicate: false,
                })
            }
        }
    }

    /// Re-read the subscription record and make the local plan agree with it
    ///
    /// A failed fetch leaves the current plan in place.
    pub async fn refresh_plan(&self, user_id: &str) -> Result<PlanTier> {
        let current = self.ledger.profile(user_id).await?.plan;

        match self.source.fetch_subscription(user_id).await {
            Ok(record) => {
                let observed = plan_for(record.as_ref());
                if observed != current {
                    tracing::info!(
                        user_id,
                        from = current.as_str(),
                        to = observed.as_str(),
                        "Subscription re-fetch corrected plan"
                    );
                }
                self.ledger.set_plan(user_id, observed, true).await?;
                Ok(observed)
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Subscription re-fetch failed, keeping plan");
                Ok(current)
            }
        }
    }
}
