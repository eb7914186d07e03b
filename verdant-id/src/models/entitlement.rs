//! Entitlement projection and subscription records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use verdant_common::events::PlanTier;

/// Cap value meaning "unlimited"
pub const UNLIMITED_CAP: i64 = -1;

/// Default identifications allowed on the free plan
pub const DEFAULT_FREE_QUOTA: u32 = 3;

/// Derived authorization state; never stored, rebuilt on every gate check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub authenticated: bool,
    pub plan: PlanTier,
    pub used: u32,
    /// `UNLIMITED_CAP` for pro
    pub cap: i64,
}

impl Entitlement {
    /// Entitlement of a signed-out (or still loading) visitor
    pub fn anonymous(free_cap: u32) -> Self {
        Self {
            authenticated: false,
            plan: PlanTier::Free,
            used: 0,
            cap: free_cap as i64,
        }
    }

    /// Entitlement of a signed-in user
    ///
    /// A free user who used more than the cap (e.g. after a downgrade) is
    /// reported at the cap so that `used <= cap` holds.
    pub fn for_user(plan: PlanTier, used: u32, free_cap: u32) -> Self {
        match plan {
            PlanTier::Pro => Self {
                authenticated: true,
                plan,
                used,
                cap: UNLIMITED_CAP,
            },
            PlanTier::Free => Self {
                authenticated: true,
                plan,
                used: used.min(free_cap),
                cap: free_cap as i64,
            },
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.cap == UNLIMITED_CAP
    }

    /// Identifications left; `None` when unlimited
    pub fn remaining(&self) -> Option<u32> {
        if self.is_unlimited() {
            None
        } else {
            Some((self.cap.max(0) as u32).saturating_sub(self.used))
        }
    }

    /// Gate decision for this entitlement
    pub fn decide(&self) -> Result<(), DenyReason> {
        if !self.authenticated {
            return Err(DenyReason::Unauthenticated);
        }
        if self.plan == PlanTier::Free && !self.is_unlimited() && self.used as i64 >= self.cap {
            return Err(DenyReason::QuotaExhausted);
        }
        Ok(())
    }
}

/// Why the gate refused a costed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// UI should prompt login
    Unauthenticated,
    /// UI should prompt upgrade
    QuotaExhausted,
}

/// Persisted usage/plan for one identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageProfile {
    pub user_id: String,
    pub plan: PlanTier,
    pub used: u32,
}

impl UsageProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            plan: PlanTier::Free,
            used: 0,
        }
    }
}

/// Subscription status as written by the payment webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Incomplete,
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Monthly,
    Annual,
    Lifetime,
}

/// Externally owned subscription row (polled, never written by this client)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub plan_type: Option<PlanType>,
    #[serde(default)]
    pub current_period_end: Option<DateTime<Utc>>,
}

impl SubscriptionRecord {
    /// Only active and trialing subscriptions authorize pro
    pub fn authorizes_pro(&self) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        )
    }
}

/// Plan implied by an (optional) subscription record
pub fn plan_for(record: Option<&SubscriptionRecord>) -> PlanTier {
    match record {
        Some(rec) if rec.authorizes_pro() => PlanTier::Pro,
        _ => PlanTier::Free,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_user_at_cap_is_denied() {
        let ent = Entitlement::for_user(PlanTier::Free, 3, 3);
        assert_eq!(ent.decide(), Err(DenyReason::QuotaExhausted));
        assert_eq!(ent.remaining(), Some(0));
    }

    #[test]
    fn test_free_user_below_cap_allowed() {
        let ent = Entitlement::for_user(PlanTier::Free, 2, 3);
        assert_eq!(ent.decide(), Ok(()));
        assert_eq!(ent.remaining(), Some(1));
    }

    #[test]
    fn test_pro_always_allowed() {
        for used in [0, 3, 10_000] {
            let ent = Entitlement::for_user(PlanTier::Pro, used, 3);
            assert!(ent.is_unlimited());
            assert_eq!(ent.decide(), Ok(()));
            assert_eq!(ent.remaining(), None);
        }
    }

    #[test]
    fn test_anonymous_denied_unauthenticated() {
        let ent = Entitlement::anonymous(3);
        assert_eq!(ent.decide(), Err(DenyReason::Unauthenticated));
    }

    #[test]
    fn test_downgraded_user_reported_at_cap() {
        let ent = Entitlement::for_user(PlanTier::Free, 12, 3);
        assert_eq!(ent.used, 3);
        assert!(ent.used as i64 <= ent.cap);
    }

    #[test]
    fn test_zero_quota_denies_immediately() {
        let ent = Entitlement::for_user(PlanTier::Free, 0, 0);
        assert_eq!(ent.decide(), Err(DenyReason::QuotaExhausted));
    }

    #[test]
    fn test_only_active_and_trialing_authorize_pro() {
        use SubscriptionStatus::*;
        for (status, pro) in [
            (Incomplete, false),
            (Active, true),
            (Trialing, true),
            (PastDue, false),
            (Canceled, false),
            (Unpaid, false),
        ] {
            let rec = SubscriptionRecord {
                status,
                plan_type: Some(PlanType::Monthly),
                current_period_end: None,
            };
            assert_eq!(rec.authorizes_pro(), pro, "{:?}", status);
        }
        assert_eq!(plan_for(None), PlanTier::Free);
    }

    #[test]
    fn test_subscription_record_parses_backend_row() {
        let rec: SubscriptionRecord =
            serde_json::from_str(r#"{"status":"past_due","plan_type":"annual"}"#).unwrap();
        assert_eq!(rec.status, SubscriptionStatus::PastDue);
        assert_eq!(rec.plan_type, Some(PlanType::Annual));
    }
}
