use crate::config::Config;
use crate::docs::{self, DocGenError, DocRequest, DocumentationGenerator};
use crate::events::LogEvent;
use crate::feed::webhook_url;
use crate::ingest::{self, IngestGateway};
use crate::store::RequestLog;
use crate::templates;
use crate::types::SnapshotResponse;
use axum::{
    body::Bytes,
    extract::{Path, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::UnboundedReceiverStream, StreamExt};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const CAPTURE_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, OPTIONS";
const READ_METHODS: &str = "GET, OPTIONS";
const WRITE_METHODS: &str = "POST, OPTIONS";
const COLLECTION_METHODS: &str = "GET, POST, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, Authorization";
const FALLBACK_BASE_URL: &str = "http://localhost:3000";

/// Everything a handler needs, built once by the entry point.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    store: Arc<RequestLog>,
    gateway: IngestGateway,
    generator: Arc<dyn DocumentationGenerator>,
}

impl AppState {
    pub fn new(config: Config, generator: Arc<dyn DocumentationGenerator>) -> Self {
        let events = crate::events::EventBus::new(config.max_subscribers);
        let store = Arc::new(RequestLog::new(config.log_capacity, events));
        let gateway = IngestGateway::new(store.clone(), config.public_base_url.clone());
        Self {
            config: Arc::new(config),
            store,
            gateway,
            generator,
        }
    }

    pub fn store(&self) -> &Arc<RequestLog> {
        &self.store
    }

    fn base_url(&self, headers: &HeaderMap) -> String {
        ingest::base_url(headers, self.config.public_base_url.as_deref())
            .unwrap_or_else(|| FALLBACK_BASE_URL.to_string())
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route(
            "/webhooks",
            get(list_webhooks)
                .post(create_webhook)
                .options(|| async { preflight(COLLECTION_METHODS) }),
        )
        .route(
            "/templates",
            get(list_templates).options(|| async { preflight(READ_METHODS) }),
        )
        .route(
            "/webhook/{webhook_id}",
            get(capture)
                .post(capture)
                .put(capture)
                .patch(capture)
                .delete(capture)
                .options(|| async { preflight(CAPTURE_METHODS) }),
        )
        .route(
            "/webhook/{webhook_id}/requests",
            get(snapshot).options(|| async { preflight(READ_METHODS) }),
        )
        .route(
            "/webhook/{webhook_id}/events",
            get(event_stream).options(|| async { preflight(READ_METHODS) }),
        )
        .route(
            "/webhook/{webhook_id}/simulate/{service}/{event}",
            post(simulate).options(|| async { preflight(WRITE_METHODS) }),
        )
        .route(
            "/webhook-requests/{webhook_id}",
            get(list_requests).options(|| async { preflight(READ_METHODS) }),
        )
        .route(
            "/webhook-requests/{webhook_id}/clear",
            post(clear_requests).options(|| async { preflight(WRITE_METHODS) }),
        )
        .route(
            "/webhook-requests/{webhook_id}/delete/{index}",
            post(delete_request).options(|| async { preflight(WRITE_METHODS) }),
        )
        .route(
            "/generate-documentation",
            post(generate_documentation).options(|| async { preflight(WRITE_METHODS) }),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve on a background task. Returns the bound address,
/// which differs from `addr` when port 0 is requested.
pub async fn spawn(addr: SocketAddr, state: AppState) -> std::io::Result<SocketAddr> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    info!(addr = %local, "HTTP server bound");

    let app = build_router(state);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(reason = %e, "HTTP server error");
        }
    });
    Ok(local)
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

fn cors(methods: &'static str) -> [(HeaderName, &'static str); 3] {
    [
        (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        (header::ACCESS_CONTROL_ALLOW_METHODS, methods),
        (header::ACCESS_CONTROL_ALLOW_HEADERS, ALLOW_HEADERS),
    ]
}

fn preflight(methods: &'static str) -> Response {
    (StatusCode::OK, cors(methods)).into_response()
}

fn ok(methods: &'static str, body: Value) -> Response {
    (StatusCode::OK, cors(methods), Json(body)).into_response()
}

fn fail(status: StatusCode, methods: &'static str, message: impl Into<String>) -> Response {
    let body = json!({ "success": false, "error": message.into() });
    (status, cors(methods), Json(body)).into_response()
}

fn missing_id(methods: &'static str) -> Response {
    fail(StatusCode::BAD_REQUEST, methods, "Webhook ID is required")
}

fn is_blank(webhook_id: &str) -> bool {
    webhook_id.trim().is_empty()
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

async fn capture(
    State(state): State<AppState>,
    Path(webhook_id): Path<String>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.config.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(webhook_id, reason = %e, "failed to read webhook body");
            return fail(
                StatusCode::INTERNAL_SERVER_ERROR,
                CAPTURE_METHODS,
                "Failed to process webhook",
            );
        }
    };

    state
        .gateway
        .capture(&webhook_id, &parts.method, &parts.uri, &parts.headers, &body);

    ok(
        CAPTURE_METHODS,
        json!({ "success": true, "message": "Webhook received" }),
    )
}

/// Origin-relative capture path with the id encoded as one segment.
fn capture_uri(webhook_id: &str) -> Option<Uri> {
    let origin = Url::parse("http://localhost/").ok()?;
    webhook_url(&origin, webhook_id, &[])?.path().parse().ok()
}

async fn simulate(
    State(state): State<AppState>,
    Path((webhook_id, service, event)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    if is_blank(&webhook_id) {
        return missing_id(WRITE_METHODS);
    }
    let Some(payload) = templates::render(&service, &event) else {
        return fail(
            StatusCode::NOT_FOUND,
            WRITE_METHODS,
            format!("Unknown template {service}/{event}"),
        );
    };
    let body = match serde_json::to_vec(&payload) {
        Ok(body) => body,
        Err(e) => {
            return fail(
                StatusCode::INTERNAL_SERVER_ERROR,
                WRITE_METHODS,
                format!("Failed to encode template: {e}"),
            )
        }
    };

    let mut forwarded = HeaderMap::new();
    if let Some(host) = headers.get(header::HOST) {
        forwarded.insert(header::HOST, host.clone());
    }
    forwarded.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    forwarded.insert("x-simulated-webhook", HeaderValue::from_static("true"));
    for (name, value) in [("x-webhook-service", &service), ("x-webhook-event", &event)] {
        if let Ok(value) = HeaderValue::from_str(value) {
            forwarded.insert(name, value);
        }
    }

    let Some(uri) = capture_uri(&webhook_id) else {
        return fail(
            StatusCode::BAD_REQUEST,
            WRITE_METHODS,
            format!("Cannot build a capture path for {webhook_id}"),
        );
    };
    info!(webhook_id, service, event, "simulating webhook");
    let request = state
        .gateway
        .capture(&webhook_id, &Method::POST, &uri, &forwarded, &body);

    ok(
        WRITE_METHODS,
        json!({ "success": true, "message": "Webhook simulated", "request": request }),
    )
}

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

async fn snapshot(State(state): State<AppState>, Path(webhook_id): Path<String>) -> Response {
    if is_blank(&webhook_id) {
        return missing_id(READ_METHODS);
    }
    let requests = state.store.list(&webhook_id);
    let response = SnapshotResponse {
        success: true,
        webhook_id,
        requests,
    };
    match serde_json::to_value(response) {
        Ok(body) => ok(READ_METHODS, body),
        Err(e) => fail(StatusCode::INTERNAL_SERVER_ERROR, READ_METHODS, e.to_string()),
    }
}

async fn event_stream(State(state): State<AppState>, Path(webhook_id): Path<String>) -> Response {
    if is_blank(&webhook_id) {
        return missing_id(READ_METHODS);
    }

    let (tx, rx) = mpsc::unbounded_channel::<LogEvent>();
    let subscription = match state.store.events().subscribe(&webhook_id, move |event| {
        tx.send(event.clone())
            .map_err(|_| anyhow::anyhow!("event stream closed"))
    }) {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!(webhook_id, reason = %e, "rejecting event stream");
            return fail(StatusCode::TOO_MANY_REQUESTS, READ_METHODS, e.to_string());
        }
    };
    info!(webhook_id, "event stream opened");

    // The subscription lives as long as the stream; the client going away
    // drops both.
    let stream = UnboundedReceiverStream::new(rx).map(move |event| {
        let _live = &subscription;
        Event::default().event(event.kind()).json_data(&event)
    });

    (
        cors(READ_METHODS),
        Sse::new(stream).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

async fn list_requests(State(state): State<AppState>, Path(webhook_id): Path<String>) -> Response {
    if is_blank(&webhook_id) {
        return missing_id(READ_METHODS);
    }
    let requests = state.store.list(&webhook_id);
    ok(READ_METHODS, json!({ "success": true, "requests": requests }))
}

async fn clear_requests(State(state): State<AppState>, Path(webhook_id): Path<String>) -> Response {
    if is_blank(&webhook_id) {
        return missing_id(WRITE_METHODS);
    }
    state.store.clear(&webhook_id);
    ok(
        WRITE_METHODS,
        json!({ "success": true, "message": "Webhook requests cleared" }),
    )
}

async fn delete_request(
    State(state): State<AppState>,
    Path((webhook_id, index)): Path<(String, String)>,
) -> Response {
    if is_blank(&webhook_id) {
        return missing_id(WRITE_METHODS);
    }
    match index.trim().parse::<usize>() {
        Ok(index) => state.store.delete_at(&webhook_id, index),
        Err(_) => warn!(webhook_id, index, "ignoring delete with invalid index"),
    }
    ok(
        WRITE_METHODS,
        json!({ "success": true, "message": "Webhook request deleted" }),
    )
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn create_webhook(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let webhook_id = uuid::Uuid::new_v4().to_string();
    let url = format!("{}/webhook/{webhook_id}", state.base_url(&headers));
    info!(webhook_id, "webhook issued");
    ok(
        COLLECTION_METHODS,
        json!({ "success": true, "webhookId": webhook_id, "url": url }),
    )
}

async fn list_webhooks(State(state): State<AppState>) -> Response {
    ok(
        COLLECTION_METHODS,
        json!({ "success": true, "webhooks": state.store.webhook_ids() }),
    )
}

async fn list_templates() -> Response {
    ok(
        READ_METHODS,
        json!({ "success": true, "templates": templates::CATALOG }),
    )
}

// ---------------------------------------------------------------------------
// Documentation
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentationRequest {
    #[serde(default)]
    webhook_id: Option<String>,
}

fn doc_error_status(error: &DocGenError) -> StatusCode {
    match error {
        DocGenError::InvalidCredential => StatusCode::UNAUTHORIZED,
        DocGenError::MissingCredential | DocGenError::Upstream(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn generate_documentation(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request: DocumentationRequest = serde_json::from_slice(&body).unwrap_or_default();
    let Some(webhook_id) = request.webhook_id.filter(|id| !is_blank(id)) else {
        return missing_id(WRITE_METHODS);
    };

    let mut requests = state.store.list(&webhook_id);
    let sample_data = requests.is_empty();
    if sample_data {
        info!(webhook_id, "no traffic yet, seeding sample requests");
        for record in docs::sample_requests(&webhook_id, &state.base_url(&headers)) {
            if let Err(e) = state.store.append(&webhook_id, record) {
                warn!(webhook_id, reason = %e, "failed to seed sample request");
            }
        }
        requests = state.store.list(&webhook_id);
    }
    if requests.is_empty() {
        return fail(
            StatusCode::NOT_FOUND,
            WRITE_METHODS,
            "Could not generate sample requests. Please send some requests to the webhook URL first before generating documentation.",
        );
    }

    let payload: Vec<DocRequest> = requests.iter().map(DocRequest::from).collect();
    match state.generator.generate(&payload).await {
        Ok(documentation) => {
            info!(webhook_id, requests = payload.len(), sample_data, "documentation generated");
            ok(
                WRITE_METHODS,
                json!({
                    "success": true,
                    "documentation": documentation,
                    "requestCount": payload.len(),
                    "sampleData": sample_data,
                }),
            )
        }
        Err(e) => {
            warn!(webhook_id, reason = %e, "documentation generation failed");
            fail(doc_error_status(&e), WRITE_METHODS, e.to_string())
        }
    }
}
