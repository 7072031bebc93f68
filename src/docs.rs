use crate::types::{HttpMethod, RequestRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";

const SYSTEM_PROMPT: &str = "You are an API documentation expert. Analyze the following webhook \
requests and generate comprehensive API documentation. Include endpoint details, \
request/response formats, headers, and example usage. Format the documentation in markdown.";

/// What the generator sees of a captured request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocRequest {
    pub method: HttpMethod,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl From<&RequestRecord> for DocRequest {
    fn from(r: &RequestRecord) -> Self {
        Self {
            method: r.method,
            path: r.path.clone(),
            headers: r.headers.clone(),
            query: r.query.clone(),
            body: r.body.clone(),
            timestamp: r.timestamp,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DocGenError {
    #[error("OpenAI API key is not configured. Please set OPENAI_API_KEY and restart the server.")]
    MissingCredential,
    #[error("Your OpenAI API key appears to be invalid or has expired. Please update your API key.")]
    InvalidCredential,
    #[error("OpenAI API error: {0}")]
    Upstream(String),
}

/// Turns observed traffic into markdown documentation.
#[async_trait]
pub trait DocumentationGenerator: Send + Sync {
    async fn generate(&self, requests: &[DocRequest]) -> Result<String, DocGenError>;
}

// ---------------------------------------------------------------------------
// OpenAI chat completions
// ---------------------------------------------------------------------------

pub struct OpenAiGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<String>,
}

impl OpenAiGenerator {
    pub fn new(base_url: &str, api_key: Option<String>, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.to_string(),
        }
    }
}

fn classify_failure(status: reqwest::StatusCode, body: &str) -> DocGenError {
    let detail = serde_json::from_str::<ApiErrorBody>(body).ok().map(|b| b.error);
    let message = detail
        .as_ref()
        .map(|d| d.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("HTTP {status}"));
    let code = detail.and_then(|d| d.code);

    if status == reqwest::StatusCode::UNAUTHORIZED
        || code.as_deref() == Some("invalid_api_key")
        || message.to_ascii_lowercase().contains("api key")
    {
        return DocGenError::InvalidCredential;
    }
    DocGenError::Upstream(message)
}

#[async_trait]
impl DocumentationGenerator for OpenAiGenerator {
    async fn generate(&self, requests: &[DocRequest]) -> Result<String, DocGenError> {
        let api_key = self.api_key.as_deref().ok_or(DocGenError::MissingCredential)?;

        let traffic = serde_json::to_string_pretty(requests)
            .map_err(|e| DocGenError::Upstream(format!("failed to encode requests: {e}")))?;
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: format!(
                        "Based on these webhook requests, generate API documentation:\n{traffic}"
                    ),
                },
            ],
            temperature: 0.7,
            max_tokens: 2500,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DocGenError::Upstream(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_failure(status, &text));
        }

        let data: ChatResponse = resp
            .json()
            .await
            .map_err(|e| DocGenError::Upstream(format!("response parse error: {e}")))?;

        data.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| DocGenError::Upstream("response contained no documentation".into()))
    }
}

// ---------------------------------------------------------------------------
// Demonstration traffic
// ---------------------------------------------------------------------------

fn headers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Three illustrative requests (GET, POST, PUT) used when a webhook has no
/// traffic yet.
pub fn sample_requests(webhook_id: &str, base_url: &str) -> Vec<RequestRecord> {
    let base_url = base_url.trim_end_matches('/');
    let host = base_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(base_url);
    let path = format!("/webhook/{webhook_id}");
    let url = format!("{base_url}{path}");
    let now = Utc::now();

    vec![
        RequestRecord {
            method: HttpMethod::Get,
            path: path.clone(),
            url: format!("{url}?test=parameter"),
            headers: headers(&[
                ("user-agent", "Mozilla/5.0"),
                ("accept", "application/json"),
                ("host", host),
            ]),
            query: Some(headers(&[("test", "parameter")])),
            body: None,
            timestamp: now,
        },
        RequestRecord {
            method: HttpMethod::Post,
            path: path.clone(),
            url: url.clone(),
            headers: headers(&[
                ("content-type", "application/json"),
                ("user-agent", "PostmanRuntime/7.32.3"),
                ("accept", "*/*"),
                ("host", host),
            ]),
            query: None,
            body: Some(serde_json::json!({
                "event": "user.created",
                "data": {
                    "id": "usr_123456",
                    "name": "John Doe",
                    "email": "john@example.com",
                    "created_at": now.to_rfc3339(),
                }
            })),
            timestamp: now,
        },
        RequestRecord {
            method: HttpMethod::Put,
            path,
            url,
            headers: headers(&[
                ("content-type", "application/json"),
                ("user-agent", "curl/7.88.1"),
                ("accept", "*/*"),
                ("host", host),
            ]),
            query: None,
            body: Some(serde_json::json!({
                "event": "user.updated",
                "data": {
                    "id": "usr_123456",
                    "name": "John Smith",
                    "email": "john@example.com",
                    "updated_at": now.to_rfc3339(),
                }
            })),
            timestamp: now,
        },
    ]
}
