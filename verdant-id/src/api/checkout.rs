//! Checkout return and entitlement endpoints

use axum::{
    extract::State,
    http::{StatusCode, Uri},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use verdant_common::events::PlanTier;

use crate::api::{local_url, require_user};
use crate::error::{ApiError, ApiResult};
use crate::services::{strip_checkout_params, CheckoutReturn, PaymentOutcome};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct CheckoutReturnResponse {
    pub payment: PaymentOutcome,
    /// Return URL with the checkout parameters removed
    pub clean_url: String,
    /// Reconciliation started in the background
    pub reconciling: bool,
}

#[derive(Debug, Serialize)]
pub struct EntitlementResponse {
    pub authenticated: bool,
    pub plan: PlanTier,
    pub used: u32,
    /// `-1` when unlimited
    pub cap: i64,
    /// Absent when unlimited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
}

/// GET /checkout/return?payment=success&session_id=...
///
/// Reconciliation runs in the background; progress is reported on the event
/// stream (`PlanChanged`, `VerificationPending`).
pub async fn checkout_return(
    State(state): State<AppState>,
    uri: Uri,
) -> ApiResult<(StatusCode, Json<CheckoutReturnResponse>)> {
    let url = local_url(&uri)?;
    let checkout = CheckoutReturn::from_url(&url)
        .ok_or_else(|| ApiError::BadRequest("Not a checkout return URL".to_string()))?;
    let clean_url = strip_checkout_params(&url);
    let clean_url = format!(
        "{}{}",
        clean_url.path(),
        clean_url.query().map(|q| format!("?{}", q)).unwrap_or_default()
    );

    let session_id = match (&checkout.session_id, checkout.should_reconcile()) {
        (Some(session_id), true) => session_id.clone(),
        _ => {
            tracing::info!(payment = ?checkout.outcome, "Checkout returned without reconciliation");
            return Ok((
                StatusCode::OK,
                Json(CheckoutReturnResponse {
                    payment: checkout.outcome,
                    clean_url,
                    reconciling: false,
                }),
            ));
        }
    };

    let user = require_user(&state).await?;
    let reconciler = state.reconciler.clone();
    let background_state = state.clone();

    tokio::spawn(async move {
        match reconciler.reconcile(&user.id, &session_id).await {
            Ok(report) => tracing::info!(
                user_id = %user.id,
                plan = report.plan.as_str(),
                pending = report.verification_pending,
                checks = report.checks,
                duplicate = report.duplicate,
                "Checkout reconciliation finished"
            ),
            Err(e) => {
                tracing::error!(user_id = %user.id, error = %e, "Checkout reconciliation failed");
                background_state
                    .record_error(format!("Checkout reconciliation failed: {}", e))
                    .await;
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(CheckoutReturnResponse {
            payment: checkout.outcome,
            clean_url,
            reconciling: true,
        }),
    ))
}

/// GET /entitlement
pub async fn entitlement(State(state): State<AppState>) -> ApiResult<Json<EntitlementResponse>> {
    let current = state.workflow.gate().current().await?;
    Ok(Json(EntitlementResponse {
        authenticated: current.authenticated,
        plan: current.plan,
        used: current.used,
        cap: current.cap,
        remaining: current.remaining(),
    }))
}

pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/checkout/return", get(checkout_return))
        .route("/entitlement", get(entitlement))
}
