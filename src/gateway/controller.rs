// ============================================================================
// Gateway Controller
// ============================================================================
//
// Runs one processing request through its lifecycle:
//
//   RECEIVED -> AUTHENTICATED -> RATE_LIMIT_CHECKED -> VALIDATED
//            -> FORWARDED -> RESPONDED
//
// Any stage may fail, in which case the request jumps straight to
// RESPONDED with a failure envelope. `Lifecycle::respond` consumes the
// lifecycle, so a request can only ever be answered once.
//
// Authentication runs before the body is validated: an unauthenticated
// caller learns nothing about which actions or payloads are valid. The
// action is only peeked at to work out which scopes and workspace the
// caller needs.
//
// ============================================================================

use crate::auth::{AuthContext, AuthRequest, AuthResolver};
use crate::config::{RateLimitConfig, UpstreamConfig};
use crate::envelope::{GatewayRequest, GatewayResponse};
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::forwarder::{CallerIdentity, ForwardRequest, RequestForwarder};
use crate::gateway::rate_limiter::RateLimiter;
use crate::gateway::router::Action;
use crate::metrics;
use crate::utils::{header_str, log_safe_id};
use axum::http::{HeaderMap, StatusCode, header::ORIGIN};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Received,
    Authenticated,
    RateLimitChecked,
    Validated,
    Forwarded,
    Responded,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "RECEIVED",
            Stage::Authenticated => "AUTHENTICATED",
            Stage::RateLimitChecked => "RATE_LIMIT_CHECKED",
            Stage::Validated => "VALIDATED",
            Stage::Forwarded => "FORWARDED",
            Stage::Responded => "RESPONDED",
        }
    }
}

/// Per-request progress
struct Lifecycle {
    request_id: String,
    stage: Stage,
    started: Instant,
    endpoint: Option<String>,
    identity: Option<String>,
}

impl Lifecycle {
    fn start() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            stage: Stage::Received,
            started: Instant::now(),
            endpoint: None,
            identity: None,
        }
    }

    fn advance(&mut self, next: Stage) {
        debug!(
            request_id = %self.request_id,
            from = self.stage.as_str(),
            to = next.as_str(),
            "Request stage transition"
        );
        self.stage = next;
    }

    /// Terminal transition: build the one and only response
    fn respond(self, outcome: GatewayResult<Value>) -> GatewayReply {
        let last_stage = self.stage;
        let (status, envelope) = match &outcome {
            Ok(data) => (
                StatusCode::OK,
                GatewayResponse::success(data.clone(), self.started, self.endpoint.clone()),
            ),
            Err(e) => {
                e.log();
                (
                    e.status_code(),
                    GatewayResponse::failure(e, self.started, self.endpoint.clone()),
                )
            }
        };

        let code = envelope
            .error
            .as_ref()
            .map(|e| e.code.clone())
            .unwrap_or_else(|| "OK".to_string());
        metrics::record_request(&code);

        info!(
            request_id = %self.request_id,
            identity = self.identity.as_deref().unwrap_or("-"),
            last_stage = last_stage.as_str(),
            status = status.as_u16(),
            code = %code,
            duration_ms = envelope.metadata.processing_time,
            "Gateway request completed"
        );

        GatewayReply {
            status,
            envelope,
            last_stage,
        }
    }
}

/// Final answer for one request
#[derive(Debug)]
pub struct GatewayReply {
    pub status: StatusCode,
    pub envelope: GatewayResponse,
    /// Last stage completed before RESPONDED
    pub last_stage: Stage,
}

impl IntoResponse for GatewayReply {
    fn into_response(self) -> Response {
        (self.status, axum::Json(self.envelope)).into_response()
    }
}

pub struct GatewayController {
    auth: AuthResolver,
    rate_limiter: Arc<RateLimiter>,
    forwarder: Arc<RequestForwarder>,
    rate_limit: RateLimitConfig,
    log_salt: String,
}

impl GatewayController {
    pub fn new(
        auth: AuthResolver,
        rate_limiter: Arc<RateLimiter>,
        forwarder: Arc<RequestForwarder>,
        rate_limit: RateLimitConfig,
        log_salt: String,
    ) -> Self {
        Self {
            auth,
            rate_limiter,
            forwarder,
            rate_limit,
            log_salt,
        }
    }

    pub fn forwarder(&self) -> &RequestForwarder {
        &self.forwarder
    }

    fn upstream(&self) -> &UpstreamConfig {
        self.forwarder.config()
    }

    /// Process one envelope request
    pub async fn handle(&self, headers: &HeaderMap, body: &[u8]) -> GatewayReply {
        let mut lifecycle = Lifecycle::start();
        let outcome = self.run(&mut lifecycle, headers, body).await;
        lifecycle.respond(outcome)
    }

    async fn run(
        &self,
        lifecycle: &mut Lifecycle,
        headers: &HeaderMap,
        body: &[u8],
    ) -> GatewayResult<Value> {
        let parsed = serde_json::from_slice::<GatewayRequest>(body);

        // Peek at the action for its auth requirements; unknown actions need none here
        let route = parsed.as_ref().ok().and_then(resolve_action).map(|a| a.route());
        let required_scopes: Vec<&str> = route.iter().map(|r| r.required_scope).collect();

        let auth = self
            .auth
            .resolve(&AuthRequest {
                headers,
                origin: header_str(headers, ORIGIN.as_str()),
                required_scopes: &required_scopes,
                workspace_required: route.map(|r| r.workspace_required).unwrap_or(false),
            })
            .await?;
        lifecycle.identity = Some(log_safe_id(&auth.identity_id, &self.log_salt));
        lifecycle.advance(Stage::Authenticated);

        self.check_rate_limit(&auth).await?;
        lifecycle.advance(Stage::RateLimitChecked);

        let request = parsed
            .map_err(|e| GatewayError::validation(format!("Invalid request body: {}", e)))?;
        let action = resolve_action(&request).ok_or_else(|| GatewayError::UnknownAction {
            action: request.action.clone(),
            valid_actions: Action::valid_names(),
        })?;
        let route = action.route();
        let path = route.render_path(&request.params)?;

        if let Some(method) = request.method {
            if method != route.method {
                warn!(
                    action = action.name(),
                    requested = method.as_str(),
                    routed = route.method.as_str(),
                    "Ignoring request method, using the routed one"
                );
            }
        }
        if route.method.has_body() {
            if let Some(payload) = &request.payload {
                if !payload.is_object() {
                    return Err(GatewayError::validation("payload must be a JSON object"));
                }
            }
        }
        lifecycle.endpoint = Some(self.forwarder.endpoint_url(&path));
        lifecycle.advance(Stage::Validated);

        let caller = CallerIdentity {
            identity_id: auth.identity_id.clone(),
            workspace_id: auth.workspace_id.clone(),
        };
        let query = request.query_pairs();
        let response = self
            .forwarder
            .forward(ForwardRequest {
                path: &path,
                method: route.method,
                headers: &request.headers,
                body: request.payload.as_ref(),
                query: &query,
                caller: Some(&caller),
                timeout: self.upstream().timeout,
            })
            .await?;
        lifecycle.advance(Stage::Forwarded);

        debug!(
            request_id = %lifecycle.request_id,
            action = action.name(),
            upstream_status = response.status,
            "Upstream call succeeded"
        );
        Ok(response.body)
    }

    async fn check_rate_limit(&self, auth: &AuthContext) -> GatewayResult<()> {
        let allowed = self
            .rate_limiter
            .check(
                &format!("identity:{}", auth.identity_id),
                self.rate_limit.max_requests,
                self.rate_limit.window,
            )
            .await;
        if allowed {
            Ok(())
        } else {
            Err(GatewayError::RateLimited {
                limit: self.rate_limit.max_requests,
                window_secs: self.rate_limit.window.as_secs(),
            })
        }
    }

    /// Upstream health probe for the public health endpoint
    pub async fn health(&self) -> GatewayReply {
        let mut lifecycle = Lifecycle::start();
        lifecycle.endpoint = Some(self.forwarder.endpoint_url("/health"));

        let outcome = match self.forwarder.check_health().await {
            Ok(response) => {
                lifecycle.advance(Stage::Forwarded);
                let snapshot = self.forwarder.breaker().snapshot().await;
                Ok(json!({
                    "status": "healthy",
                    "upstream": response.body,
                    "circuitBreaker": {
                        "state": snapshot.state.as_str(),
                        "failureCount": snapshot.failure_count,
                    },
                }))
            }
            Err(e) => Err(GatewayError::HealthCheckFailed(Box::new(e.into()))),
        };

        lifecycle.respond(outcome)
    }
}

fn resolve_action(request: &GatewayRequest) -> Option<Action> {
    Action::resolve(&request.action).or_else(|| request.endpoint.as_deref().and_then(Action::resolve))
}
