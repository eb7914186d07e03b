//! HTTP API integration tests
//!
//! Requests are driven through the router with `oneshot`; collaborators are
//! the scripted doubles from `common`.

mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use common::{candidate_json, plant_json, Harness, PNG_BYTES};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;
use verdant_id::build_router;
use verdant_id::config::EngineSettings;
use verdant_id::services::AuthSignal;
use verdant_id::store::{ApiKeyStore, UsageStore};

async fn send(h: &Harness, request: Request<Body>) -> (StatusCode, Value) {
    let response = build_router(h.state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Harness whose auth guard gives up quickly
async fn signed_out() -> Harness {
    let h = Harness::with_settings(EngineSettings {
        auth_guard_timeout: Duration::from_millis(50),
        ..EngineSettings::default()
    });
    h.state.auth.apply_signal(AuthSignal::SignedOut).await;
    h
}

#[tokio::test]
async fn test_health_reports_module() {
    let h = Harness::new();
    let (status, body) = send(&h, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "verdant-id");
    assert!(body["last_error"].is_null());
}

#[tokio::test]
async fn test_search_requires_sign_in() {
    let h = signed_out().await;
    let (status, body) = send(&h, post_json("/identify/search", json!({"query": "rose"}))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthenticated");
    assert_eq!(h.analyzer.total_calls(), 0);
}

#[tokio::test]
async fn test_search_during_session_restore_succeeds() {
    let h = Harness::new();
    h.analyzer.on_name("pothos", Ok(plant_json("Pothos", "Epipremnum aureum")));

    let auth = h.state.auth.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        auth.apply_signal(AuthSignal::SignedIn(common::session_for("alice")))
            .await;
    });

    let (status, body) = send(&h, post_json("/identify/search", json!({"query": "pothos"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "success");
    assert_eq!(h.store.load_profile("alice").await.unwrap().used, 1);
}

#[tokio::test]
async fn test_search_over_quota_is_payment_required() {
    let h = Harness::signed_in("alice").await;
    for _ in 0..3 {
        h.state.ledger.record_success("alice").await.unwrap();
    }

    let (status, body) = send(&h, post_json("/identify/search", json!({"query": "rose"}))).await;

    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"]["code"], "quota_exhausted");
}

#[tokio::test]
async fn test_short_query_is_bad_request() {
    let h = Harness::signed_in("alice").await;
    let (status, _) = send(&h, post_json("/identify/search", json!({"query": "x"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_search_then_select_flow() {
    // Given: an ambiguous query
    let h = Harness::signed_in("alice").await;
    h.analyzer.on_match(
        "lily",
        Ok(json!([
            candidate_json("Peace lily", "Spathiphyllum wallisii"),
            candidate_json("Calla lily", "Zantedeschia aethiopica"),
        ])),
    );
    h.analyzer.on_name(
        "Zantedeschia aethiopica",
        Ok(plant_json("Calla lily", "Zantedeschia aethiopica")),
    );

    // When: searching
    let (status, body) = send(&h, post_json("/identify/search", json!({"query": "lily"}))).await;

    // Then: candidates wait for a pick
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "selecting");
    assert_eq!(body["candidates"].as_array().unwrap().len(), 2);
    assert_eq!(body["candidates"][1]["scientificName"], "Zantedeschia aethiopica");

    // When: picking the second candidate
    let (status, body) = send(&h, post_json("/identify/select", json!({"index": 1}))).await;

    // Then: the record is resolved and charged
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "success");
    assert_eq!(body["result"]["commonName"], "Calla lily");
    assert_eq!(body["result"]["wateringIntervalDays"], 4);

    let (_, entitlement) = send(&h, get("/entitlement")).await;
    assert_eq!(entitlement["used"], 1);
    assert_eq!(entitlement["remaining"], 2);

    let (_, current) = send(&h, get("/identify")).await;
    assert_eq!(current["phase"], "success");
}

#[tokio::test]
async fn test_select_without_candidates_is_conflict() {
    let h = Harness::signed_in("alice").await;
    let (status, body) = send(&h, post_json("/identify/select", json!({"index": 0}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_failed_identification_is_reported_in_snapshot() {
    let h = Harness::signed_in("alice").await;
    let (status, body) =
        send(&h, post_json("/identify/search", json!({"query": "nothing"}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "error");
    assert_eq!(body["error_kind"], "not_found");
    assert_eq!(body["error_message"], "No plant matched that name.");
}

#[tokio::test]
async fn test_image_upload() {
    let h = Harness::signed_in("alice").await;
    h.analyzer.on_image(Ok(plant_json("Aloe", "Aloe vera")));

    let request = Request::builder()
        .method(Method::POST)
        .uri("/identify/image")
        .header(header::CONTENT_TYPE, "image/png")
        .body(Body::from(PNG_BYTES.to_vec()))
        .unwrap();
    let (status, body) = send(&h, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["input_kind"], "image");
    assert_eq!(body["result"]["scientificName"], "Aloe vera");
}

#[tokio::test]
async fn test_image_upload_with_wrong_type_rejected() {
    let h = Harness::signed_in("alice").await;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/identify/image")
        .header(header::CONTENT_TYPE, "application/pdf")
        .body(Body::from(b"%PDF-1.7".to_vec()))
        .unwrap();

    let (status, _) = send(&h, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.analyzer.total_calls(), 0);
}

#[tokio::test]
async fn test_reset_returns_idle() {
    let h = Harness::signed_in("alice").await;
    let (status, body) = send(
        &h,
        Request::builder()
            .method(Method::POST)
            .uri("/identify/reset")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "idle");
}

#[tokio::test]
async fn test_entitlement_signed_out_and_pro() {
    let h = signed_out().await;
    let (_, body) = send(&h, get("/entitlement")).await;
    assert_eq!(body["authenticated"], false);
    assert_eq!(body["cap"], 3);

    h.sign_in("alice").await;
    h.state
        .ledger
        .set_plan("alice", verdant_common::events::PlanTier::Pro, true)
        .await
        .unwrap();
    let (_, body) = send(&h, get("/entitlement")).await;
    assert_eq!(body["authenticated"], true);
    assert_eq!(body["plan"], "pro");
    assert_eq!(body["cap"], -1);
    assert!(body.get("remaining").is_none());
}

#[tokio::test]
async fn test_checkout_cancelled_is_cleaned_without_reconciling() {
    let h = Harness::signed_in("alice").await;
    let (status, body) = send(
        &h,
        get("/checkout/return?tab=plants&payment=cancelled"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payment"], "cancelled");
    assert_eq!(body["clean_url"], "/checkout/return?tab=plants");
    assert_eq!(body["reconciling"], false);
    assert_eq!(h.subscriptions.fetch_count(), 0);
}

#[tokio::test]
async fn test_checkout_success_starts_reconciliation() {
    let h = Harness::signed_in("alice").await;
    let (status, body) = send(
        &h,
        get("/checkout/return?payment=success&session_id=cs_test_1"),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["payment"], "success");
    assert_eq!(body["clean_url"], "/checkout/return");
    assert_eq!(body["reconciling"], true);
}

#[tokio::test]
async fn test_checkout_success_requires_sign_in() {
    let h = signed_out().await;
    let (status, _) = send(
        &h,
        get("/checkout/return?payment=success&session_id=cs_test_1"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_non_checkout_url_is_bad_request() {
    let h = Harness::signed_in("alice").await;
    let (status, _) = send(&h, get("/checkout/return?tab=plants")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_collection_save_get_delete() {
    let h = Harness::signed_in("alice").await;

    // Nothing identified yet
    let (status, _) = send(&h, post_json("/collection", json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    h.analyzer.on_name("pothos", Ok(plant_json("Pothos", "Epipremnum aureum")));
    send(&h, post_json("/identify/search", json!({"query": "pothos"}))).await;

    let (status, saved) = send(&h, post_json("/collection", json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(saved["commonName"], "Pothos");
    let id = saved["id"].as_str().unwrap().to_string();

    let (status, list) = send(&h, get("/collection")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, fetched) = send(&h, get(&format!("/collection/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["scientificName"], "Epipremnum aureum");

    let delete = |id: &str| {
        Request::builder()
            .method(Method::DELETE)
            .uri(format!("/collection/{}", id))
            .body(Body::empty())
            .unwrap()
    };
    let (status, _) = send(&h, delete(&id)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&h, delete(&id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_collection_requires_sign_in() {
    let h = signed_out().await;
    let (status, _) = send(&h, get("/collection")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_history_lists_recent_identifications() {
    let h = Harness::signed_in("alice").await;
    h.analyzer.on_name("pothos", Ok(plant_json("Pothos", "Epipremnum aureum")));
    send(&h, post_json("/identify/search", json!({"query": "pothos"}))).await;

    let (status, body) = send(&h, get("/history?limit=5")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["resolved_name"], "Pothos");
    assert_eq!(body[0]["query"], "pothos");
    assert_eq!(h.store.load_profile("alice").await.unwrap().used, 1);
}

#[tokio::test]
async fn test_auth_state_and_sign_out() {
    let h = Harness::signed_in("alice").await;
    let (_, body) = send(&h, get("/auth/state")).await;
    assert_eq!(body["status"], "authenticated");
    assert_eq!(body["user"]["id"], "alice");

    let request = Request::builder()
        .method(Method::POST)
        .uri("/auth/sign-out")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "unauthenticated");
}

#[tokio::test]
async fn test_auth_callback_with_code() {
    let h = Harness::new();
    h.auth_backend.set_exchange(Ok(common::session_for("dana")));

    let (status, body) = send(&h, get("/auth/callback?code=xyz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["id"], "dana");

    let (status, body) = send(
        &h,
        post_json(
            "/auth/callback",
            json!({"url": "verdant://auth#access_token=at&refresh_token=rt"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["id"], "token-user");
}

#[tokio::test]
async fn test_sign_in_returns_authorize_url() {
    let h = Harness::new();
    let (status, body) = send(&h, post_json("/auth/sign-in", json!({}))).await;

    assert_eq!(status, StatusCode::OK);
    let url = body["url"].as_str().unwrap();
    assert!(url.contains("provider=google"));
    assert!(url.contains(&format!(
        "redirect_to=http://localhost:{}/auth/callback",
        h.state.settings.listen_port
    )));
}

#[tokio::test]
async fn test_set_gemini_api_key_stores_and_mirrors_to_toml() {
    let dir = tempfile::TempDir::new().unwrap();
    let config_path = dir.path().join("verdant-id.toml");
    std::fs::write(&config_path, "listen_port = 6000\n").unwrap();
    let h = Harness::with_settings(EngineSettings {
        config_path: Some(config_path.clone()),
        ..EngineSettings::default()
    });

    let (status, body) = send(
        &h,
        post_json("/settings/gemini-api-key", json!({"api_key": " new-key "})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["synced_to_toml"], true);
    assert_eq!(
        h.store.gemini_api_key().await.unwrap().as_deref(),
        Some("new-key")
    );

    let toml = verdant_common::config::load_toml_config(&config_path).unwrap();
    assert_eq!(toml.gemini_api_key.as_deref(), Some("new-key"));
    assert_eq!(toml.listen_port, Some(6000));
}

#[tokio::test]
async fn test_blank_gemini_api_key_is_rejected() {
    let h = Harness::new();
    let (status, _) = send(
        &h,
        post_json("/settings/gemini-api-key", json!({"api_key": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(h.store.gemini_api_key().await.unwrap().is_none());
}
