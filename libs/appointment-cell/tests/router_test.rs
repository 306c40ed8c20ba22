mod common;

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use appointment_cell::{appointment_routes, AppointmentState};
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

use common::{at, Harness};

struct App {
    router: Router,
    harness: Harness,
    secret: String,
}

fn app() -> App {
    let harness = Harness::new(at(2025, 6, 1, 8, 0));
    let config = TestConfig::default();
    let state = AppointmentState {
        machine: Arc::clone(&harness.machine),
        config: config.to_arc(),
    };
    App {
        router: appointment_routes(state),
        harness,
        secret: config.jwt_secret,
    }
}

impl App {
    async fn call(&self, method: &str, uri: &str, user: &TestUser, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, JwtTestUtils::bearer(user, &self.secret));
        let body = match body {
            Some(value) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = self.router.clone().oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }
}

fn booking(provider: &TestUser, time: &str) -> Value {
    json!({
        "provider_id": provider.id,
        "date": "2025-06-10",
        "time": time,
        "kind": "checkup",
        "reason": "Annual physical"
    })
}

#[tokio::test]
async fn booking_flow_over_http() {
    let app = app();
    let patient = TestUser::patient();
    let doctor = TestUser::doctor();

    let (status, body) = app.call("POST", "/", &patient, Some(booking(&doctor, "09:00"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["appointment"]["status"], "pending");
    assert_eq!(body["notification_warning"], Value::Null);
    let id = body["appointment"]["id"].as_str().unwrap().to_string();

    let (status, _) = app.call("POST", &format!("/{}/accept", id), &patient, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.call("POST", &format!("/{}/accept", id), &doctor, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["appointment"]["status"], "accepted");

    let (status, body) = app.call("GET", "/", &doctor, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    let (status, body) = app.call("GET", &format!("/{}/modification-window", id), &patient, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["can_be_modified"], true);

    let (status, _) = app
        .call("POST", "/", &TestUser::patient(), Some(booking(&doctor, "09:00")))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn malformed_time_is_a_bad_request() {
    let app = app();
    let (status, body) = app
        .call("POST", "/", &TestUser::patient(), Some(booking(&TestUser::provider(), "25:00")))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("25:00"));
}

#[tokio::test]
async fn rejected_transition_explains_both_statuses() {
    let app = app();
    let patient = TestUser::patient();
    let doctor = TestUser::provider();

    let (_, body) = app.call("POST", "/", &patient, Some(booking(&doctor, "10:00"))).await;
    let id = body["appointment"]["id"].as_str().unwrap().to_string();
    let (status, _) = app
        .call("PATCH", &format!("/{}/status", id), &doctor, Some(json!({ "status": "completed" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    app.call("POST", &format!("/{}/reject", id), &doctor, Some(json!({ "provider_notes": "Fully booked" })))
        .await;

    let (status, body) = app
        .call("PATCH", &format!("/{}/status", id), &patient, Some(json!({ "status": "cancelled" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["current_status"], "rejected");
    assert_eq!(body["attempted_status"], "cancelled");
}

#[tokio::test]
async fn strangers_cannot_read_an_appointment() {
    let app = app();
    let patient = TestUser::patient();
    let (_, body) = app
        .call("POST", "/", &patient, Some(booking(&TestUser::provider(), "11:00")))
        .await;
    let id = body["appointment"]["id"].as_str().unwrap().to_string();

    let (status, _) = app.call("GET", &format!("/{}", id), &TestUser::patient(), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.call("GET", &format!("/{}", id), &patient, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["appointment"]["reason"], "Annual physical");
    assert_eq!(app.harness.inbox_len(patient.actor()).await, 0);
}
