#![allow(dead_code)]

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{EncodingKey, Header, encode};
use mivaa_gateway::{
    auth::{ApiKeyRecord, InMemoryKeyStore},
    config::Config,
    context::{AppContext, Collaborators},
};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub const TEST_JWT_SECRET: &str = "integration-test-secret";
pub const TEST_API_KEY: &str = "mk_test_0123456789abcdef";

/// What the mock upstream saw for one call
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Scriptable stand-in for the MIVAA service
#[derive(Clone, Default)]
pub struct MockUpstream {
    pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
    /// Non-zero: answer every call with this status
    pub fail_status: Arc<AtomicU16>,
    pub delay_ms: Arc<AtomicU64>,
    pub healthy: Arc<AtomicBool>,
}

impl MockUpstream {
    pub fn calls(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_call(&self) -> RecordedRequest {
        self.calls().last().cloned().expect("upstream was not called")
    }

    pub fn fail_with(&self, status: u16) {
        self.fail_status.store(status, Ordering::SeqCst);
    }

    pub fn delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

async fn mock_handler(State(mock): State<MockUpstream>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let bytes: Bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();
    let body: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    let recorded = RecordedRequest {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts
            .headers
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect(),
        body: body.clone(),
    };
    mock.requests.lock().unwrap().push(recorded.clone());

    let delay = mock.delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    if recorded.path == "/health" && !mock.healthy.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "status": "down" }))).into_response();
    }

    let fail = mock.fail_status.load(Ordering::SeqCst);
    if fail != 0 {
        let status = StatusCode::from_u16(fail).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, Json(json!({ "detail": "mock failure" }))).into_response();
    }

    match recorded.path.as_str() {
        "/health" => Json(json!({ "status": "ok", "service": "mivaa" })).into_response(),
        "/api/search/semantic" => Json(json!({
            "results": [{ "id": "chunk-1", "score": 0.92 }],
            "query": body.get("query").cloned().unwrap_or(Value::Null),
        }))
        .into_response(),
        path => Json(json!({
            "echo": {
                "method": recorded.method,
                "path": path,
                "query": recorded.query,
                "body": body,
            }
        }))
        .into_response(),
    }
}

pub async fn spawn_upstream() -> (String, MockUpstream) {
    let mock = MockUpstream::default();
    mock.healthy.store(true, Ordering::SeqCst);

    let app = Router::new()
        .fallback(mock_handler)
        .with_state(mock.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), mock)
}

pub struct TestApp {
    pub address: String,
    pub upstream: MockUpstream,
    pub upstream_url: String,
    pub key_store: Arc<InMemoryKeyStore>,
    pub client: reqwest::Client,
}

impl TestApp {
    pub fn gateway_url(&self) -> String {
        format!("{}/api/mivaa/gateway", self.address)
    }

    /// POST an envelope with the given auth header
    pub async fn call(&self, auth: (&str, &str), body: Value) -> (u16, Value) {
        let response = self
            .client
            .post(self.gateway_url())
            .header(auth.0, auth.1)
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request");
        let status = response.status().as_u16();
        let json = response.json().await.expect("Response is not JSON");
        (status, json)
    }
}

pub fn api_key_record() -> ApiKeyRecord {
    ApiKeyRecord {
        key_id: "key-1".to_string(),
        raw_key: TEST_API_KEY.to_string(),
        workspace_id: "ws-key".to_string(),
        is_active: true,
        expires_at: None,
        allowed_origins: vec![],
        rate_limit_per_minute: 1000,
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

/// Gateway in front of a fresh mock upstream; `configure` adjusts the config
pub async fn spawn_app_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    let (upstream_url, upstream) = spawn_upstream().await;

    let mut config = Config::new(upstream_url.clone());
    config.auth.jwt_secret = Some(TEST_JWT_SECRET.to_string());
    config.upstream.api_key = Some("upstream-credential".to_string());
    configure(&mut config);

    let key_store = Arc::new(InMemoryKeyStore::new(vec![api_key_record()]));
    let app_context = AppContext::with_collaborators(
        config,
        Collaborators {
            key_store: Some(key_store.clone()),
            ..Collaborators::default()
        },
    )
    .expect("Failed to build app context");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(mivaa_gateway::serve(
        listener,
        Arc::new(app_context),
        std::future::pending(),
    ));

    TestApp {
        address,
        upstream,
        upstream_url,
        key_store,
        client: reqwest::Client::new(),
    }
}

/// HS256 token signed with the test secret; `extra` is merged into the claims
pub fn bearer_token(subject: &str, extra: Value) -> String {
    let mut claims = json!({
        "sub": subject,
        "iat": chrono::Utc::now().timestamp(),
        "exp": chrono::Utc::now().timestamp() + 3600,
    });
    if let (Some(claims), Value::Object(extra)) = (claims.as_object_mut(), extra) {
        claims.extend(extra);
    }

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}
