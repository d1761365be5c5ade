//! Integration tests for the `/sequences` endpoints.

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use common::{body_json, build_test_app, get, post_json, send};
use drip_db::models::enrollment::EnrollmentStatus;
use serde_json::json;
use tower::ServiceExt;

const SECRET: &str = "cron-s3cret";

// ---------------------------------------------------------------------------
// Enroll
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enroll_creates_enrollment_at_step_one() {
    let app = build_test_app(None);

    let response = post_json(
        &app.router,
        "/sequences",
        json!({"email": "Ada@Example.com", "sequenceId": "academy-onboarding", "source": "landing"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["currentStep"], 1);
    assert!(json["sequenceRecordId"].is_i64());
    assert!(json.get("message").is_none());

    let rows = app.store.inner.all();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].email, "ada@example.com");
    assert_eq!(rows[0].source.as_deref(), Some("landing"));
}

#[tokio::test]
async fn enroll_twice_returns_existing_record() {
    let app = build_test_app(None);
    let body = json!({"email": "ada@example.com", "sequenceId": "stackshack-welcome"});

    let first = body_json(post_json(&app.router, "/sequences", body.clone()).await).await;
    let response = post_json(&app.router, "/sequences", body).await;

    assert_eq!(response.status(), StatusCode::OK);
    let second = body_json(response).await;
    assert_eq!(second["message"], "Already enrolled in sequence");
    assert_eq!(second["sequenceRecordId"], first["sequenceRecordId"]);
    assert_eq!(second["currentStep"], 1);
    assert_eq!(app.store.inner.all().len(), 1);
}

#[tokio::test]
async fn enroll_missing_fields_returns_400() {
    let app = build_test_app(None);

    for body in [
        json!({}),
        json!({"email": "ada@example.com"}),
        json!({"sequenceId": "academy-onboarding"}),
        json!({"email": "  ", "sequenceId": "academy-onboarding"}),
    ] {
        let response = post_json(&app.router, "/sequences", body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "email and sequenceId are required");
    }
    assert_eq!(app.store.calls(), 0);
}

#[tokio::test]
async fn enroll_invalid_email_returns_400() {
    let app = build_test_app(None);

    let response = post_json(
        &app.router,
        "/sequences",
        json!({"email": "not-an-email", "sequenceId": "academy-onboarding"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn enroll_unknown_sequence_returns_400() {
    let app = build_test_app(None);

    let response = post_json(
        &app.router,
        "/sequences",
        json!({"email": "ada@example.com", "sequenceId": "does-not-exist"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "UNKNOWN_SEQUENCE");
    assert_eq!(json["error"], "Unknown sequence: does-not-exist");
}

#[tokio::test]
async fn enroll_malformed_json_returns_400() {
    let app = build_test_app(None);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/sequences")
        .header("Content-Type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "BAD_REQUEST");
}

// ---------------------------------------------------------------------------
// Tick
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tick_with_nothing_due_reports_no_emails() {
    let app = build_test_app(None);

    let response = get(&app.router, "/sequences/tick").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(
        json,
        json!({
            "success": true,
            "message": "No emails to send",
            "results": {"processed": 0, "sent": 0, "completed": 0, "errors": []}
        })
    );
}

#[tokio::test]
async fn tick_sends_first_step_and_advances() {
    let app = build_test_app(Some(SECRET));
    post_json(
        &app.router,
        "/sequences",
        json!({"email": "ada@example.com", "sequenceId": "academy-onboarding"}),
    )
    .await;

    let response = send(&app.router, Method::POST, "/sequences/tick", Some(SECRET), None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert!(json.get("message").is_none());
    assert_eq!(json["results"]["processed"], 1);
    assert_eq!(json["results"]["sent"], 1);
    assert_eq!(json["results"]["completed"], 0);

    let row = &app.store.inner.all()[0];
    assert_eq!(row.current_step, 2);
    assert_eq!(row.status, EnrollmentStatus::Active);
    assert_eq!(app.channel.sent().len(), 1);
    assert_eq!(app.channel.sent()[0].0, "ada@example.com");
}

#[tokio::test]
async fn tick_reports_delivery_failures_per_enrollment() {
    let app = build_test_app(None);
    for email in ["one@example.com", "two@example.com", "three@example.com"] {
        post_json(
            &app.router,
            "/sequences",
            json!({"email": email, "sequenceId": "stackshack-welcome"}),
        )
        .await;
    }
    app.channel.fail_for("two@example.com");

    let response = get(&app.router, "/sequences/tick").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["results"]["processed"], 3);
    assert_eq!(json["results"]["sent"], 2);
    let errors = json["results"]["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["email"], "two@example.com");
    assert_eq!(errors[0]["sequenceId"], "stackshack-welcome");
    assert_eq!(errors[0]["step"], 1);
    assert_eq!(errors[0]["kind"], "delivery");
    assert!(errors[0]["message"]
        .as_str()
        .unwrap()
        .contains("mailbox unavailable"));
}

#[tokio::test]
async fn tick_without_token_is_rejected_before_store_access() {
    let app = build_test_app(Some(SECRET));

    for method in [Method::GET, Method::POST] {
        let response = send(&app.router, method, "/sequences/tick", None, None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Unauthorized");
    }
    assert_eq!(app.store.calls(), 0);
}

#[tokio::test]
async fn tick_with_wrong_token_is_rejected_before_store_access() {
    let app = build_test_app(Some(SECRET));

    let response = send(&app.router, Method::GET, "/sequences/tick", Some("guess"), None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "Unauthorized");

    let request = Request::builder()
        .uri("/sequences/tick")
        .header("Authorization", SECRET)
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(app.store.calls(), 0);
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_lists_enrollments_for_email() {
    let app = build_test_app(None);
    for sequence_id in ["academy-onboarding", "stackshack-welcome"] {
        post_json(
            &app.router,
            "/sequences",
            json!({"email": "ada@example.com", "sequenceId": sequence_id}),
        )
        .await;
    }

    let json = body_json(get(&app.router, "/sequences?email=ada@example.com").await).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["sequences"].as_array().unwrap().len(), 2);

    let json = body_json(
        get(
            &app.router,
            "/sequences?email=ada@example.com&sequenceId=stackshack-welcome",
        )
        .await,
    )
    .await;
    let sequences = json["sequences"].as_array().unwrap();
    assert_eq!(sequences.len(), 1);
    assert_eq!(sequences[0]["sequenceId"], "stackshack-welcome");
    assert_eq!(sequences[0]["currentStep"], 1);
    assert_eq!(sequences[0]["status"], "active");
}

#[tokio::test]
async fn status_requires_email() {
    let app = build_test_app(None);

    let response = get(&app.router, "/sequences").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "email is required");
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_stops_active_enrollment() {
    let app = build_test_app(Some(SECRET));
    post_json(
        &app.router,
        "/sequences",
        json!({"email": "ada@example.com", "sequenceId": "academy-onboarding"}),
    )
    .await;

    let response = send(
        &app.router,
        Method::POST,
        "/sequences/cancel",
        Some(SECRET),
        Some(json!({"email": "ada@example.com", "sequenceId": "academy-onboarding"})),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["enrollment"]["status"], "cancelled");

    let tick = body_json(send(&app.router, Method::GET, "/sequences/tick", Some(SECRET), None).await).await;
    assert_eq!(tick["results"]["processed"], 0);
    assert!(app.channel.sent().is_empty());
}

#[tokio::test]
async fn cancel_without_active_enrollment_returns_404() {
    let app = build_test_app(None);

    let response = post_json(
        &app.router,
        "/sequences/cancel",
        json!({"email": "ada@example.com", "sequenceId": "academy-onboarding"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn cancel_requires_token_when_configured() {
    let app = build_test_app(Some(SECRET));

    let response = post_json(
        &app.router,
        "/sequences/cancel",
        json!({"email": "ada@example.com", "sequenceId": "academy-onboarding"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.store.calls(), 0);
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[tokio::test]
async fn catalog_lists_builtin_sequences() {
    let app = build_test_app(None);

    let json = body_json(get(&app.router, "/sequences/catalog").await).await;

    let sequences = json["sequences"].as_array().unwrap();
    assert_eq!(sequences.len(), 2);
    let academy = sequences
        .iter()
        .find(|s| s["id"] == "academy-onboarding")
        .unwrap();
    assert_eq!(academy["totalSteps"], 5);
    assert_eq!(academy["schedule"]["2"], 24);
}
