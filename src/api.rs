//! Remote mutation API client.
//!
//! The POS server exposes a GraphQL endpoint; every queued transaction maps
//! to exactly one mutation whose `input` variable is the stored payload.
//! [`RemoteApi`] is the seam the sync driver talks to, so tests and other
//! transports can stand in for [`GraphqlClient`].

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::RemoteError;

/// Default timeout for mutation requests (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout used for the lightweight health probe.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

/// Remote mutations a queued transaction can be replayed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mutation {
    CreateSale,
    AddCashIn,
    AddCashOut,
    OpenCashDrawer,
    CloseCashDrawer,
    RecordShiftEvent,
    CreateParkedSale,
}

impl Mutation {
    /// GraphQL field name, also the key of the result under `data`.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::CreateSale => "createSale",
            Self::AddCashIn => "addCashIn",
            Self::AddCashOut => "addCashOut",
            Self::OpenCashDrawer => "openCashDrawer",
            Self::CloseCashDrawer => "closeCashDrawer",
            Self::RecordShiftEvent => "recordShiftEvent",
            Self::CreateParkedSale => "createParkedSale",
        }
    }

    /// Operation document sent as `query`.
    pub fn document(&self) -> String {
        format!(
            "mutation SyncQueued($input: JSON!) {{ {}(input: $input) }}",
            self.field_name()
        )
    }
}

// ---------------------------------------------------------------------------
// URL normalisation and connection strings
// ---------------------------------------------------------------------------

/// Normalise the server URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
/// - strip a trailing `/api` or `/graphql` segment
pub fn normalize_server_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }
    for suffix in ["/graphql", "/api"] {
        if url.ends_with(suffix) {
            url.truncate(url.len() - suffix.len());
        }
        while url.ends_with('/') {
            url.pop();
        }
    }

    url
}

/// Settings carried by an onboarding connection string: either raw JSON or
/// URL-safe base64 of `{"url": ..., "key": ..., "tid": ...}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionString {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub terminal_id: Option<String>,
}

fn decode_connection_string_payload(raw: &str) -> Option<Value> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.starts_with('{') {
        return serde_json::from_str::<Value>(&compact).ok();
    }
    if compact.len() < 20 {
        return None;
    }

    let base64 = compact.replace('-', "+").replace('_', "/");
    let padded = format!(
        "{}{}",
        base64,
        "=".repeat((4usize.wrapping_sub(base64.len() % 4)) % 4)
    );
    let decoded = BASE64_STANDARD.decode(padded).ok()?;
    serde_json::from_slice::<Value>(&decoded).ok()
}

impl ConnectionString {
    pub fn parse(raw: &str) -> Option<Self> {
        let payload = decode_connection_string_payload(raw)?;
        let field = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| payload.get(*k).and_then(Value::as_str))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let parsed = Self {
            url: field(&["url"]).map(|u| normalize_server_url(&u)),
            api_key: field(&["key", "apiKey"]),
            terminal_id: field(&["tid", "terminalId"]),
        };
        if parsed == Self::default() {
            return None;
        }
        Some(parsed)
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly transport error.
fn friendly_error(url: &str, err: &reqwest::Error) -> RemoteError {
    let message = if err.is_connect() {
        format!("Cannot reach sync server at {url}")
    } else if err.is_timeout() {
        format!("Connection to {url} timed out")
    } else {
        format!("Network error communicating with {url}: {err}")
    };
    RemoteError::Transport(message)
}

/// Convert an HTTP status code into a user-friendly message.
fn status_message(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "API key is invalid or expired".to_string(),
        403 => "Terminal not authorized".to_string(),
        404 => "Sync endpoint not found".to_string(),
        408 => "Sync server request timed out".to_string(),
        429 => "Sync server is rate limiting requests".to_string(),
        s if s >= 500 => "Sync server error".to_string(),
        _ => "Unexpected response from sync server".to_string(),
    }
}

/// First GraphQL error as (joined message, first extensions.code).
fn graphql_errors(body: &Value) -> Option<(String, Option<String>)> {
    let errors = body.get("errors")?.as_array()?;
    if errors.is_empty() {
        return None;
    }
    let message = errors
        .iter()
        .filter_map(|e| e.get("message").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("; ");
    let code = errors
        .iter()
        .find_map(|e| e.pointer("/extensions/code").and_then(Value::as_str))
        .map(str::to_string);
    let message = if message.is_empty() {
        "Mutation rejected by sync server".to_string()
    } else {
        message
    };
    Some((message, code))
}

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

/// Remote side of the sync.
///
/// Implementations must honour `idempotency_key`: a second request with
/// the same key must not apply the mutation again. The queue resends an
/// entry whenever it cannot tell whether the first attempt landed (a
/// timeout, an unreadable 2xx body, a crash between the request and the
/// local delete), and relies on the server to deduplicate.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Run one mutation. Exactly one request is made per call.
    async fn execute(
        &self,
        mutation: Mutation,
        input: &Value,
        idempotency_key: &str,
    ) -> Result<Value, RemoteError>;

    /// Whether the server answers at all.
    async fn health_check(&self) -> bool;
}

/// Result of a connectivity test.
#[derive(Debug, serde::Serialize)]
pub struct ConnectivityResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Authenticated GraphQL-over-HTTP client for the POS server.
pub struct GraphqlClient {
    client: Client,
    probe: Client,
    base_url: String,
    api_key: Option<String>,
    terminal_id: Option<String>,
}

impl GraphqlClient {
    pub fn new(
        server_url: &str,
        api_key: Option<String>,
        terminal_id: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Transport(format!("Failed to create HTTP client: {e}")))?;
        let probe = Client::builder()
            .timeout(HEALTH_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::Transport(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            probe,
            base_url: normalize_server_url(server_url),
            api_key,
            terminal_id,
        })
    }

    pub fn graphql_url(&self) -> String {
        format!("{}/graphql", self.base_url)
    }

    pub fn health_url(&self) -> String {
        format!("{}/api/health", self.base_url)
    }

    fn authorize(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(key) = self.api_key.as_deref() {
            req = req.header("X-POS-API-Key", key);
        }
        if let Some(tid) = self.terminal_id.as_deref() {
            req = req.header("x-terminal-id", tid);
        }
        req
    }

    /// Health check with latency, for diagnostics.
    pub async fn test_connectivity(&self) -> ConnectivityResult {
        let start = Instant::now();
        let resp = match self
            .authorize(self.probe.get(self.health_url()))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return ConnectivityResult {
                    success: false,
                    latency_ms: None,
                    error: Some(friendly_error(&self.base_url, &e).to_string()),
                };
            }
        };

        let latency = start.elapsed().as_millis() as u64;
        let status = resp.status();
        if status.is_success() {
            info!(latency_ms = latency, "connectivity test passed");
            ConnectivityResult {
                success: true,
                latency_ms: Some(latency),
                error: None,
            }
        } else {
            ConnectivityResult {
                success: false,
                latency_ms: Some(latency),
                error: Some(format!("{} (HTTP {})", status_message(status), status.as_u16())),
            }
        }
    }
}

#[async_trait]
impl RemoteApi for GraphqlClient {
    async fn execute(
        &self,
        mutation: Mutation,
        input: &Value,
        idempotency_key: &str,
    ) -> Result<Value, RemoteError> {
        let url = self.graphql_url();
        let body = json!({
            "query": mutation.document(),
            "operationName": "SyncQueued",
            "variables": { "input": input },
        });

        debug!(mutation = mutation.field_name(), idempotency_key, "Sending queued mutation");
        let resp = self
            .authorize(self.client.post(&url))
            .header("Idempotency-Key", idempotency_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp
            .text()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        let parsed = serde_json::from_str::<Value>(&body_text).ok();

        if !status.is_success() {
            // Servers often answer validation failures with 400 + GraphQL errors.
            let detail = parsed
                .as_ref()
                .and_then(graphql_errors)
                .map(|(message, _)| message)
                .or_else(|| {
                    let trimmed = body_text.trim();
                    (!trimmed.is_empty()).then(|| trimmed.chars().take(300).collect())
                });
            let base = status_message(status);
            return Err(RemoteError::Status {
                status: status.as_u16(),
                message: match detail {
                    Some(detail) => format!("{base}: {detail}"),
                    None => base,
                },
            });
        }

        let Some(body) = parsed else {
            return Err(RemoteError::Decode(format!(
                "expected JSON, got {} bytes",
                body_text.len()
            )));
        };
        if let Some((message, code)) = graphql_errors(&body) {
            return Err(RemoteError::Rejected { message, code });
        }

        Ok(body
            .get("data")
            .and_then(|d| d.get(mutation.field_name()))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn health_check(&self) -> bool {
        match self
            .authorize(self.probe.head(self.health_url()))
            .send()
            .await
        {
            // Any answer short of a gateway/server error proves the link;
            // servers without a health route reply 404 or 405.
            Ok(resp) => !resp.status().is_server_error(),
            Err(_) => false,
        }
    }
}
