// ============================================================================
// Request / Response Envelope
// ============================================================================
//
// Wire format of the processing endpoint. Field names are camelCase on the
// wire; every response, success or failure, carries `metadata`.
//
// ============================================================================

use crate::error::GatewayError;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Instant;

/// Version reported in every response's metadata
pub const GATEWAY_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
        }
    }

    pub fn to_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
        }
    }

    /// Whether requests with this method carry a JSON body upstream
    pub fn has_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

/// Inbound processing request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRequest {
    /// Symbolic action name (or a legacy endpoint path)
    pub action: String,
    #[serde(default)]
    pub payload: Option<Value>,
    /// Legacy literal endpoint path, used when `action` is not recognized
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub method: Option<HttpMethod>,
    /// Extra headers to pass upstream
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Values for `{name}` placeholders in the endpoint path
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default)]
    pub query: Map<String, Value>,
}

impl GatewayRequest {
    /// Flatten `query` into key/value pairs; arrays repeat the key, nulls are dropped
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for (key, value) in &self.query {
            match value {
                Value::Null => {}
                Value::Array(items) => {
                    for item in items {
                        if let Some(v) = scalar_to_string(item) {
                            pairs.push((key.clone(), v));
                        }
                    }
                }
                other => {
                    if let Some(v) = scalar_to_string(other) {
                        pairs.push((key.clone(), v));
                    }
                }
            }
        }
        pairs
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        // Nested structures go through as compact JSON
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    /// RFC 3339, millisecond precision, UTC
    pub timestamp: String,
    /// Milliseconds from request receipt to response
    pub processing_time: u64,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mivaa_endpoint: Option<String>,
}

impl ResponseMetadata {
    fn new(started: Instant, endpoint: Option<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            processing_time: started.elapsed().as_millis() as u64,
            version: GATEWAY_VERSION.to_string(),
            mivaa_endpoint: endpoint,
        }
    }
}

/// Outbound envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub metadata: ResponseMetadata,
}

impl GatewayResponse {
    pub fn success(data: Value, started: Instant, endpoint: Option<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: ResponseMetadata::new(started, endpoint),
        }
    }

    pub fn failure(err: &GatewayError, started: Instant, endpoint: Option<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                code: err.error_code().to_string(),
                message: err.user_message(),
                details: err.details(),
            }),
            metadata: ResponseMetadata::new(started, endpoint),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_defaults_and_method_parsing() {
        let req: GatewayRequest = serde_json::from_value(json!({
            "action": "semantic_search",
            "payload": { "query": "oak flooring" },
            "method": "POST"
        }))
        .unwrap();
        assert_eq!(req.action, "semantic_search");
        assert_eq!(req.method, Some(HttpMethod::Post));
        assert!(req.params.is_empty());

        let err = serde_json::from_value::<GatewayRequest>(json!({
            "action": "semantic_search",
            "method": "TRACE"
        }));
        assert!(err.is_err());

        assert!(serde_json::from_value::<GatewayRequest>(json!({ "payload": {} })).is_err());
    }

    #[test]
    fn test_query_pairs() {
        let req: GatewayRequest = serde_json::from_value(json!({
            "action": "list_documents",
            "query": { "limit": 10, "tag": ["a", "b"], "q": "tiles", "skip": null, "active": true }
        }))
        .unwrap();

        let mut pairs = req.query_pairs();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("active".to_string(), "true".to_string()),
                ("limit".to_string(), "10".to_string()),
                ("q".to_string(), "tiles".to_string()),
                ("tag".to_string(), "a".to_string()),
                ("tag".to_string(), "b".to_string()),
            ]
        );
    }

    #[test]
    fn test_envelope_wire_shape() {
        let started = Instant::now();
        let ok = GatewayResponse::success(
            json!({ "results": [] }),
            started,
            Some("https://mivaa.example.com/api/search/semantic".to_string()),
        );
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["success"], true);
        assert!(value.get("error").is_none());
        assert!(value["metadata"]["processingTime"].is_u64());
        assert_eq!(value["metadata"]["version"], GATEWAY_VERSION);
        assert!(
            value["metadata"]["mivaaEndpoint"]
                .as_str()
                .unwrap()
                .ends_with("/api/search/semantic")
        );

        let failed = GatewayResponse::failure(&GatewayError::validation("bad"), started, None);
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "VALIDATION_ERROR");
        assert!(value.get("data").is_none());
        assert!(value["metadata"].get("mivaaEndpoint").is_none());
        assert!(value["metadata"]["timestamp"].as_str().unwrap().ends_with('Z'));
    }
}
