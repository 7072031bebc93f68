use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use webhook_tester::config::Config;
use webhook_tester::docs::{DocGenError, DocRequest, DocumentationGenerator};
use webhook_tester::http_server::{build_router, AppState};

/// Records what it was asked to document and answers with a canned result.
struct StubGenerator {
    outcome: Result<String, DocGenError>,
    seen: Mutex<Vec<usize>>,
}

impl StubGenerator {
    fn new(outcome: Result<String, DocGenError>) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl DocumentationGenerator for StubGenerator {
    async fn generate(&self, requests: &[DocRequest]) -> Result<String, DocGenError> {
        self.seen.lock().unwrap().push(requests.len());
        self.outcome.clone()
    }
}

fn app_with(generator: Arc<dyn DocumentationGenerator>) -> (Router, AppState) {
    let state = AppState::new(Config::default(), generator);
    (build_router(state.clone()), state)
}

fn app() -> (Router, AppState) {
    app_with(StubGenerator::new(Ok("# Docs".into())))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(request).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::HOST, "localhost:3000")
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::HOST, "localhost:3000")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn captured_post_shows_up_in_snapshot() {
    let (app, _) = app();

    let (status, body) = send(
        &app,
        post_json("/webhook/abc123", json!({ "event": "user.created" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "message": "Webhook received" }));

    let (status, body) = send(&app, get("/webhook/abc123/requests")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["webhookId"], "abc123");
    let requests = body["requests"].as_array().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["method"], "POST");
    assert_eq!(requests[0]["path"], "/webhook/abc123");
    assert_eq!(requests[0]["url"], "http://localhost:3000/webhook/abc123");
    assert_eq!(requests[0]["body"], json!({ "event": "user.created" }));
    assert_eq!(requests[0]["headers"]["content-type"], "application/json");
}

#[tokio::test]
async fn every_capture_verb_is_recorded_with_query_and_raw_bodies() {
    let (app, state) = app();

    for method in [Method::GET, Method::PUT, Method::PATCH, Method::DELETE] {
        let request = Request::builder()
            .method(method)
            .uri("/webhook/verbs?test=parameter")
            .header(header::HOST, "localhost:3000")
            .body(Body::from("plain=text"))
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
    }

    let listed = state.store().list("verbs");
    let methods: Vec<String> = listed.iter().map(|r| r.method.to_string()).collect();
    assert_eq!(methods, vec!["GET", "PUT", "PATCH", "DELETE"]);
    assert!(listed
        .iter()
        .all(|r| r.query.as_ref().unwrap()["test"] == "parameter"));
    assert_eq!(listed[0].body, Some(Value::String("plain=text".into())));
}

#[tokio::test]
async fn oversized_body_is_a_server_error() {
    let config = Config {
        max_body_bytes: 16,
        ..Config::default()
    };
    let app = build_router(AppState::new(config, StubGenerator::new(Ok(String::new()))));

    let (status, body) = send(&app, post_json("/webhook/big", json!({ "padding": "x".repeat(64) }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());

    let (_, body) = send(&app, get("/webhook/big/requests")).await;
    assert_eq!(body["requests"], json!([]));
}

#[tokio::test]
async fn responses_carry_cors_and_preflight_succeeds() {
    let (app, _) = app();

    for uri in [
        "/webhook/abc",
        "/webhook/abc/requests",
        "/webhook-requests/abc",
        "/webhook-requests/abc/clear",
        "/webhook-requests/abc/delete/0",
        "/generate-documentation",
        "/webhooks",
    ] {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(request).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK, "preflight for {uri}");
        assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(
            resp.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS],
            "Content-Type, Authorization"
        );
    }

    let resp = app
        .clone()
        .oneshot(get("/webhook/abc/requests"))
        .await
        .unwrap();
    assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert_eq!(
        resp.headers()[header::ACCESS_CONTROL_ALLOW_METHODS],
        "GET, OPTIONS"
    );
}

#[tokio::test]
async fn admin_routes_list_delete_and_clear() {
    let (app, _) = app();
    for n in 0..3 {
        send(&app, post_json("/webhook/admin", json!({ "n": n }))).await;
    }

    let (_, body) = send(&app, get("/webhook-requests/admin")).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["requests"].as_array().unwrap().len(), 3);

    let (status, body) = send(&app, post_json("/webhook-requests/admin/delete/1", Value::Null)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Webhook request deleted");

    // Out of range, negative and non-numeric indices are ignored.
    for index in ["7", "-1", "abc"] {
        let uri = format!("/webhook-requests/admin/delete/{index}");
        let (status, _) = send(&app, post_json(&uri, Value::Null)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, body) = send(&app, get("/webhook-requests/admin")).await;
    let ns: Vec<i64> = body["requests"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["body"]["n"].as_i64().unwrap())
        .collect();
    assert_eq!(ns, vec![0, 2]);

    let (status, body) = send(&app, post_json("/webhook-requests/admin/clear", Value::Null)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Webhook requests cleared");
    let (_, body) = send(&app, get("/webhook/admin/requests")).await;
    assert_eq!(body["requests"], json!([]));
}

#[tokio::test]
async fn blank_ids_are_rejected_on_query_routes() {
    let (app, _) = app();
    for (method, uri) in [
        (Method::GET, "/webhook/%20/requests"),
        (Method::GET, "/webhook-requests/%20"),
        (Method::POST, "/webhook-requests/%20/clear"),
        (Method::POST, "/webhook-requests/%20/delete/0"),
    ] {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Webhook ID is required");
    }
}

#[tokio::test]
async fn unknown_webhook_lists_empty_without_materializing() {
    let (app, _) = app();
    let (_, body) = send(&app, get("/webhook/never-seen/requests")).await;
    assert_eq!(body["requests"], json!([]));

    let (_, body) = send(&app, get("/webhooks")).await;
    assert_eq!(body["webhooks"], json!([]));
}

#[tokio::test]
async fn issued_webhooks_get_a_capture_url() {
    let (app, _) = app();
    let (status, body) = send(&app, post_json("/webhooks", Value::Null)).await;
    assert_eq!(status, StatusCode::OK);

    let id = body["webhookId"].as_str().unwrap();
    assert_eq!(id.len(), 36);
    assert_eq!(
        body["url"].as_str().unwrap(),
        format!("http://localhost:3000/webhook/{id}")
    );

    send(&app, post_json(&format!("/webhook/{id}"), json!({}))).await;
    let (_, body) = send(&app, get("/webhooks")).await;
    assert_eq!(
        body["webhooks"],
        json!([{ "webhookId": id, "requestCount": 1 }])
    );
}

#[tokio::test]
async fn simulate_replays_a_template_through_capture() {
    let (app, state) = app();

    let (status, body) = send(
        &app,
        post_json("/webhook/sim/simulate/github/push", Value::Null),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let listed = state.store().list("sim");
    assert_eq!(listed.len(), 1);
    let record = &listed[0];
    assert_eq!(record.headers["x-simulated-webhook"], "true");
    assert_eq!(record.headers["x-webhook-service"], "github");
    assert_eq!(record.headers["x-webhook-event"], "push");
    assert_eq!(record.body.as_ref().unwrap()["ref"], "refs/heads/main");

    let (status, body) = send(
        &app,
        post_json("/webhook/sim/simulate/github/fork", Value::Null),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(state.store().len("sim"), 1);
}

#[tokio::test]
async fn simulate_keeps_an_encoded_id_as_one_path_segment() {
    let (app, state) = app();

    let (status, _) = send(
        &app,
        post_json("/webhook/a%3Fb/simulate/github/push", Value::Null),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let listed = state.store().list("a?b");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].path, "/webhook/a%3Fb");
    assert!(listed[0].query.is_none());
}

#[tokio::test]
async fn templates_are_listed() {
    let (app, _) = app();
    let (status, body) = send(&app, get("/templates")).await;
    assert_eq!(status, StatusCode::OK);
    let templates = body["templates"].as_array().unwrap();
    assert!(templates
        .iter()
        .any(|t| t["service"] == "stripe" && t["event"] == "payment_intent_succeeded"));
}

#[tokio::test]
async fn health_reports_ok() {
    let (app, _) = app();
    let (status, body) = send(&app, get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn documentation_uses_captured_traffic() {
    let generator = StubGenerator::new(Ok("# Webhook API".into()));
    let (app, _) = app_with(generator.clone());
    send(&app, post_json("/webhook/docs", json!({ "a": 1 }))).await;
    send(&app, post_json("/webhook/docs", json!({ "a": 2 }))).await;

    let (status, body) = send(
        &app,
        post_json("/generate-documentation", json!({ "webhookId": "docs" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "success": true,
            "documentation": "# Webhook API",
            "requestCount": 2,
            "sampleData": false,
        })
    );
    assert_eq!(*generator.seen.lock().unwrap(), vec![2]);
}

#[tokio::test]
async fn documentation_seeds_samples_for_an_empty_log() {
    let generator = StubGenerator::new(Ok("# Samples".into()));
    let (app, state) = app_with(generator.clone());

    let (status, body) = send(
        &app,
        post_json("/generate-documentation", json!({ "webhookId": "fresh" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["requestCount"], 3);
    assert_eq!(body["sampleData"], true);

    let methods: Vec<String> = state
        .store()
        .list("fresh")
        .iter()
        .map(|r| r.method.to_string())
        .collect();
    assert_eq!(methods, vec!["GET", "POST", "PUT"]);
}

#[tokio::test]
async fn documentation_errors_map_to_statuses() {
    let (app, _) = app();
    let (status, body) = send(&app, post_json("/generate-documentation", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Webhook ID is required");

    let cases = [
        (DocGenError::MissingCredential, StatusCode::INTERNAL_SERVER_ERROR),
        (DocGenError::InvalidCredential, StatusCode::UNAUTHORIZED),
        (
            DocGenError::Upstream("quota exceeded".into()),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    ];
    for (error, expected) in cases {
        let message = error.to_string();
        let (app, _) = app_with(StubGenerator::new(Err(error)));
        let (status, body) = send(
            &app,
            post_json("/generate-documentation", json!({ "webhookId": "abc" })),
        )
        .await;
        assert_eq!(status, expected);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], message);
    }
}

#[tokio::test]
async fn event_stream_pushes_log_mutations() {
    let (app, state) = app();

    let resp = app
        .clone()
        .oneshot(get("/webhook/live/events"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(state.store().events().subscriber_count("live"), 1);

    send(&app, post_json("/webhook/live", json!({ "ping": true }))).await;

    let mut body = resp.into_body();
    let frame = body.frame().await.unwrap().unwrap();
    let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    assert!(text.contains("event: new-request"), "{text}");
    assert!(text.contains(r#""ping":true"#), "{text}");

    drop(body);
    assert_eq!(state.store().events().subscriber_count("live"), 0);
}
