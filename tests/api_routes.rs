/// HTTP route tests
/// Drives the axum router in-process with a mocked scoring service
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::{routing::get, Router};
use rust_recon_api::circuit_breaker::ResilienceGuard;
use rust_recon_api::config::Config;
use rust_recon_api::errors::AppError;
use rust_recon_api::api::handlers::{self, AppState};
use rust_recon_api::orchestrator::ScoringOrchestrator;
use rust_recon_api::pipeline::ReconciliationService;
use rust_recon_api::review::ReviewQueue;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BOUNDARY: &str = "recon-test-boundary";

fn build_app(scoring_api_url: String) -> (Router, Arc<ResilienceGuard>) {
    build_app_with_config(Config::with_scoring_url(scoring_api_url))
}

fn build_app_with_config(config: Config) -> (Router, Arc<ResilienceGuard>) {
    let guard = Arc::new(ResilienceGuard::new(
        config.circuit_failure_threshold,
        config.circuit_cooldown(),
    ));
    let orchestrator = ScoringOrchestrator::from_config(&config, guard.clone()).unwrap();
    let service = Arc::new(ReconciliationService::new(
        config.clone(),
        orchestrator,
        Arc::new(ReviewQueue::new()),
    ));
    let state = Arc::new(AppState {
        config: config.clone(),
        service,
        guard: guard.clone(),
    });

    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(handlers::api_routes(config.max_upload_bytes * 3))
        .with_state(state);
    (app, guard)
}

fn multipart_body(parts: &[(&str, &str, &str)]) -> Vec<u8> {
    let mut body = String::new();
    for (field, file_name, content) in parts {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: text/csv\r\n\r\n{content}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    body.into_bytes()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, bytes.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let (status, _, bytes) = send(app, request).await;
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn wait_for_terminal(app: &Router, job_id: &str) -> serde_json::Value {
    for _ in 0..100 {
        let (status, body) =
            send_json(app, get_request(&format!("/api/v1/reconciliation/status/{}", job_id))).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] == "Completed" || body["status"] == "Failed" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {} never finished", job_id);
}

fn pair_json() -> serde_json::Value {
    let txn = serde_json::json!({
        "customer_name": "John Doe",
        "service": "Botox",
        "amount": 150.0,
        "date": "2024-01-15"
    });
    serde_json::json!({"reward_transaction": txn, "pos_transaction": txn})
}

#[tokio::test]
async fn test_health_endpoint() {
    let mock_server = MockServer::start().await;
    let (app, _guard) = build_app(mock_server.uri());

    let (status, body) = send_json(&app, get_request("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "rust-recon-api");
}

#[tokio::test]
async fn test_scoring_health_reports_circuit_state() {
    let mock_server = MockServer::start().await;
    let (app, _guard) = build_app(mock_server.uri());

    let (status, body) = send_json(&app, get_request("/api/v1/scoring/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["circuitOpen"], false);
    assert_eq!(body["consecutiveFailures"], 0);
}

#[tokio::test]
async fn test_upload_review_and_export_flow() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/batch-predict"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "results": [{
                "match_probability": 0.88,
                "feature_analysis": {"name_similarity": 0.9},
                "confidence_level": "Medium",
                "recommendation": "Manual Review"
            }]
        })))
        .mount(&mock_server)
        .await;

    let (app, _guard) = build_app(mock_server.uri());

    let body = multipart_body(&[
        (
            "pos",
            "pos.csv",
            "Patient Name,Amount,Date,Service\nJohn Doe,150.00,2024-01-15,Botox",
        ),
        (
            "alle",
            "alle.csv",
            "Patient Name,Reward Value,Transaction Date,Product Name\nJohn Doe,150.00,2024-01-16,Botox",
        ),
    ]);
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/reconciliation/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, accepted) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = accepted["job_id"].as_str().unwrap().to_string();

    let job = wait_for_terminal(&app, &job_id).await;
    assert_eq!(job["status"], "Completed");
    assert_eq!(job["summary"]["manual_review"], 1);
    assert_eq!(job["summary"]["review_pending"], 1);

    let (status, reviews) = send_json(
        &app,
        get_request(&format!("/api/v1/reconciliation/reviews/{}", job_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let match_id = reviews[0]["id"].as_str().unwrap().to_string();

    let decision = serde_json::json!({"matchId": match_id, "decision": "reject"});
    let (status, item) =
        send_json(&app, json_request("/api/v1/reconciliation/review", decision.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(item["state"], "Rejected");
    assert_eq!(item["decided_by"], "reviewer");

    let (status, _) = send_json(&app, json_request("/api/v1/reconciliation/review", decision)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, headers, bytes) = send(
        &app,
        get_request(&format!("/api/v1/reconciliation/export/{}?format=excel", job_id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("reconciliation.xlsx"));
    assert!(bytes.starts_with(b"PK"));
}

#[tokio::test]
async fn test_upload_without_rewards_file_is_bad_request() {
    let mock_server = MockServer::start().await;
    let (app, _guard) = build_app(mock_server.uri());

    let body = multipart_body(&[(
        "pos",
        "pos.csv",
        "Patient Name,Amount,Date,Service\nJohn Doe,150.00,2024-01-15,Botox",
    )]);
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/reconciliation/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, _) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let mock_server = MockServer::start().await;
    let (app, _guard) = build_app(mock_server.uri());
    let job_id = uuid::Uuid::new_v4();

    let (status, _) = send_json(
        &app,
        get_request(&format!("/api/v1/reconciliation/status/{}", job_id)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send_json(
        &app,
        get_request(&format!("/api/v1/reconciliation/export/{}", job_id)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_export_format_is_bad_request() {
    let mock_server = MockServer::start().await;
    let (app, _guard) = build_app(mock_server.uri());

    let (status, _) = send_json(
        &app,
        get_request(&format!(
            "/api/v1/reconciliation/export/{}?format=pdf",
            uuid::Uuid::new_v4()
        )),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_predict_endpoint_classifies_score() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "result": {
                "match_probability": 0.96,
                "feature_analysis": {},
                "confidence_level": "High",
                "recommendation": "Auto-Accept"
            }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (app, _guard) = build_app(mock_server.uri());
    let (status, body) = send_json(&app, json_request("/api/v1/test/predict", pair_json())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["recommendation"], "Auto-Accept");
    assert_eq!(body["confidence_level"], "High");
}

#[tokio::test]
async fn test_predict_endpoint_fails_fast_when_circuit_open() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/predict"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let (app, guard) = build_app(mock_server.uri());
    for _ in 0..3 {
        let _ = guard
            .call(|| async {
                Err::<(), _>(AppError::ScoringServiceError("connection refused".to_string()))
            })
            .await;
    }
    assert!(guard.is_open());

    let (status, headers, _) = send(&app, json_request("/api/v1/test/predict", pair_json())).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let retry_after: u64 = headers[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
}

#[tokio::test]
async fn test_oversize_upload_is_rejected_before_a_job_exists() {
    let mock_server = MockServer::start().await;
    let mut config = Config::with_scoring_url(mock_server.uri());
    config.max_upload_bytes = 64;
    let (app, _guard) = build_app_with_config(config);

    let big_pos = format!(
        "Patient Name,Amount,Date,Service\n{}",
        "John Doe,150.00,2024-01-15,Botox\n".repeat(10)
    );
    let body = multipart_body(&[
        ("pos", "pos.csv", big_pos.as_str()),
        (
            "alle",
            "alle.csv",
            "Patient Name,Reward Value\nJohn Doe,1",
        ),
    ]);
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/reconciliation/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, body) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("limit is 64"));
}

#[tokio::test]
async fn test_cancel_of_unknown_job_is_not_found() {
    let mock_server = MockServer::start().await;
    let (app, _guard) = build_app(mock_server.uri());

    let request = Request::builder()
        .method("POST")
        .uri(format!(
            "/api/v1/reconciliation/cancel/{}",
            uuid::Uuid::new_v4()
        ))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
