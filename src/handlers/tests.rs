//! # Tests for Handlers

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;
use serde_json::{Value, json};
use tower::ServiceExt;

use chrono::{Duration, Utc};
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::config::provider::{KEY_API_KEY, KEY_API_URL};
use crate::config::{AppConfig, IngestionConfig, StaticConfigProvider};
use crate::models::smm_job::TargetKind;
use crate::orders::InMemoryOrderSource;
use crate::repositories::NewJob;
use crate::routing::{RoutingConfig, RoutingTable};
use crate::server::{AppState, create_app};

async fn test_app() -> Router {
    create_app(test_state(StaticConfigProvider::new()).await)
}

async fn test_state(provider: StaticConfigProvider) -> AppState {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    Migrator::up(&db, None).await.unwrap();

    let routing = RoutingTable::default().with_product(
        10,
        RoutingConfig {
            service_id: Some("4420".to_string()),
            ..RoutingConfig::default()
        },
    );

    AppState::new(
        Arc::new(AppConfig::default()),
        db,
        Arc::new(routing),
        Arc::new(InMemoryOrderSource::new(IngestionConfig::default())),
        Arc::new(provider),
    )
}

/// Inserts a job for order 100 and, when given, records it as delivered.
async fn insert_job(state: &AppState, provider_job_id: Option<&str>) -> Uuid {
    let (id, _) = state
        .jobs
        .insert_if_absent(NewJob {
            order_id: 100,
            line_item_id: 1,
            product_id: 10,
            target_kind: TargetKind::Username,
            target_value: "alice_ig".to_string(),
            quantity: 50,
            multiplier: 1,
            service_id: Some("4420".to_string()),
            next_attempt_at: (Utc::now() - Duration::seconds(1)).fixed_offset(),
        })
        .await
        .unwrap();
    if let Some(provider_job_id) = provider_job_id {
        state.jobs.mark_success(id, provider_job_id).await.unwrap();
    }
    id
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn order_event(status: &str) -> Value {
    json!({
        "order_id": 100,
        "status": status,
        "order": {
            "id": 100,
            "status": status,
            "line_items": [
                {"id": 1, "product_id": 10, "quantity": 50,
                 "meta": [{"key": "username", "value": "alice_ig"}]}
            ]
        }
    })
}

#[tokio::test]
async fn test_root_handler_returns_service_info() {
    let app = test_app().await;
    let (status, body) = send(&app, "GET", "/", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "smm-dispatch");
}

#[tokio::test]
async fn test_healthz_reports_ok() {
    let app = test_app().await;
    let (status, body) = send(&app, "GET", "/healthz", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_confirmed_event_creates_one_job() {
    let app = test_app().await;

    let (status, body) = send(&app, "POST", "/orders/events", Some(order_event("processing"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ingested"], true);
    assert_eq!(body["inserted"], 1);

    let (_, body) = send(&app, "POST", "/orders/events", Some(order_event("completed"))).await;
    assert_eq!(body["inserted"], 0);
    assert_eq!(body["skipped"], 1);

    let (status, counts) = send(&app, "GET", "/jobs/counts", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(counts["pending"], 1);
    assert_eq!(counts["total"], 1);
    assert_eq!(counts["exhausted"], 0);

    let (_, jobs) = send(&app, "GET", "/jobs?order_id=100", None).await;
    let jobs = jobs["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["target_value"], "alice_ig");
    assert_eq!(jobs[0]["service_id"], "4420");
    assert_eq!(jobs[0]["attempts"], 0);
}

#[tokio::test]
async fn test_unconfirmed_event_is_ignored() {
    let app = test_app().await;

    let (status, body) = send(&app, "POST", "/orders/events", Some(order_event("pending"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ingested"], false);

    let (_, counts) = send(&app, "GET", "/jobs/counts", None).await;
    assert_eq!(counts["total"], 0);
}

#[tokio::test]
async fn test_event_for_unknown_order_without_snapshot_is_404() {
    let app = test_app().await;
    let (status, body) = send(
        &app,
        "POST",
        "/orders/events",
        Some(json!({"order_id": 5, "status": "processing"})),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_list_jobs_rejects_bad_filters() {
    let app = test_app().await;

    let (status, body) = send(&app, "GET", "/jobs?limit=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");

    let (status, _) = send(&app, "GET", "/jobs?status=error", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reset_rebuilds_from_backlog() {
    let app = test_app().await;
    send(&app, "POST", "/orders/events", Some(order_event("processing"))).await;

    let (status, body) = send(&app, "POST", "/jobs/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 1);
    assert_eq!(body["ingested"], 1);
}

#[tokio::test]
async fn test_sweep_without_provider_settings_processes_nothing() {
    let app = test_app().await;
    send(&app, "POST", "/orders/events", Some(order_event("processing"))).await;

    let (status, body) = send(&app, "POST", "/jobs/sweep", None).await;
    // A concurrent secondary trigger from the event may hold the guard.
    if status == StatusCode::OK {
        assert_eq!(body["processed"], 0);
    } else {
        assert_eq!(status, StatusCode::CONFLICT);
    }
}

#[tokio::test]
async fn test_provider_balance_requires_configuration() {
    let app = test_app().await;
    let (status, body) = send(&app, "GET", "/provider/balance", None).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "PROVIDER_NOT_CONFIGURED");
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let app = test_app().await;
    let (status, body) = send(&app, "GET", "/openapi.json", None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/jobs/sweep"].is_object());
}

#[tokio::test]
async fn test_job_provider_status_unknown_job() {
    let app = test_app().await;
    let uri = format!("/jobs/{}/provider-status", Uuid::new_v4());
    let (status, body) = send(&app, "GET", &uri, None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_undelivered_job_has_no_provider_orders() {
    let state = test_state(StaticConfigProvider::new()).await;
    let job_id = insert_job(&state, None).await;
    let app = create_app(state);

    let (status, body) = send(&app, "GET", &format!("/jobs/{}/provider-status", job_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");

    let (status, _) = send(&app, "POST", &format!("/jobs/{}/refill", job_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_delivered_job_requires_provider_configuration() {
    let state = test_state(StaticConfigProvider::new()).await;
    let job_id = insert_job(&state, Some("555")).await;
    let app = create_app(state);

    let (status, body) = send(&app, "POST", &format!("/jobs/{}/cancel", job_id), None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "PROVIDER_NOT_CONFIGURED");
}

#[tokio::test]
async fn test_job_provider_status_covers_every_split_order() {
    let server = MockServer::start().await;
    for (order, remains) in [("1", "0"), ("2", "40")] {
        Mock::given(method("POST"))
            .and(body_string_contains("action=status"))
            .and(body_string_contains(format!("order={}", order)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "charge": "0.27",
                "start_count": "3572",
                "status": "In progress",
                "remains": remains,
                "currency": "USD"
            })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let provider = StaticConfigProvider::new()
        .with(KEY_API_URL, server.uri())
        .with(KEY_API_KEY, "test-key");
    let state = test_state(provider).await;
    let job_id = insert_job(&state, Some("1,2")).await;
    let app = create_app(state);

    let (status, body) = send(&app, "GET", &format!("/jobs/{}/provider-status", job_id), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job_id"], job_id.to_string());
    assert_eq!(body["orders"][0]["provider_job_id"], "1");
    assert_eq!(body["orders"][0]["status"]["remains"], "0");
    assert_eq!(body["orders"][1]["provider_job_id"], "2");
    assert_eq!(body["orders"][1]["status"]["remains"], "40");
}

#[tokio::test]
async fn test_refill_job_passes_provider_answer_through() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("action=refill"))
        .and(body_string_contains("order=555"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"refill": "1"})))
        .expect(1)
        .mount(&server)
        .await;

    let provider = StaticConfigProvider::new()
        .with(KEY_API_URL, server.uri())
        .with(KEY_API_KEY, "test-key");
    let state = test_state(provider).await;
    let job_id = insert_job(&state, Some("555")).await;
    let app = create_app(state);

    let (status, body) = send(&app, "POST", &format!("/jobs/{}/refill", job_id), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["provider_job_ids"], json!(["555"]));
    assert_eq!(body["response"]["refill"], "1");
}
