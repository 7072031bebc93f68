//! Turns inbound webhook calls into [`RequestRecord`]s and files them.

use crate::store::RequestLog;
use crate::types::{HttpMethod, RequestRecord};
use axum::extract::Query;
use axum::http::{header, HeaderMap, Method, Uri};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Passive recorder in front of the request log. Capture never fails from
/// the sender's point of view; problems are logged and swallowed.
#[derive(Clone)]
pub struct IngestGateway {
    store: Arc<RequestLog>,
    public_base_url: Option<String>,
}

impl IngestGateway {
    pub fn new(store: Arc<RequestLog>, public_base_url: Option<String>) -> Self {
        Self {
            store,
            public_base_url,
        }
    }

    pub fn capture(
        &self,
        webhook_id: &str,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Option<RequestRecord> {
        let record = normalize(method, uri, headers, body, self.public_base_url.as_deref())?;
        info!(webhook_id, method = %record.method, path = %record.path, "webhook request received");
        self.store.append(webhook_id, record).ok()
    }
}

/// Build a record from the raw parts of an inbound call. Returns `None` only
/// for verbs a webhook cannot be invoked with.
pub fn normalize(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: &[u8],
    public_base_url: Option<&str>,
) -> Option<RequestRecord> {
    let method = match HttpMethod::try_from(method) {
        Ok(m) => m,
        Err(e) => {
            warn!(reason = %e, "ignoring webhook call");
            return None;
        }
    };

    Some(RequestRecord {
        method,
        path: uri.path().to_string(),
        url: absolute_url(uri, headers, public_base_url),
        headers: flatten_headers(headers),
        query: parse_query(uri),
        body: decode_body(body),
        timestamp: Utc::now(),
    })
}

/// Lower-cased header names; repeated headers are joined with ", ".
pub fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flat = BTreeMap::new();
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect::<Vec<_>>()
            .join(", ");
        flat.insert(name.as_str().to_ascii_lowercase(), joined);
    }
    flat
}

fn parse_query(uri: &Uri) -> Option<BTreeMap<String, String>> {
    uri.query()?;
    Query::<BTreeMap<String, String>>::try_from_uri(uri)
        .map(|Query(params)| params)
        .ok()
}

/// JSON when it parses, otherwise the raw text as a JSON string.
pub fn decode_body(body: &[u8]) -> Option<serde_json::Value> {
    if body.is_empty() {
        return None;
    }
    Some(
        serde_json::from_slice(body)
            .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(body).into())),
    )
}

/// Externally visible origin of this server: the configured public base URL,
/// else scheme and `Host` of the inbound call.
pub fn base_url(headers: &HeaderMap, public_base_url: Option<&str>) -> Option<String> {
    if let Some(base) = public_base_url {
        return Some(base.trim_end_matches('/').to_string());
    }
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok())?;
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    Some(format!("{scheme}://{host}"))
}

fn absolute_url(uri: &Uri, headers: &HeaderMap, public_base_url: Option<&str>) -> String {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return uri.to_string();
    }
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());

    match base_url(headers, public_base_url) {
        Some(base) => format!("{base}{path_and_query}"),
        None => path_and_query.to_string(),
    }
}
