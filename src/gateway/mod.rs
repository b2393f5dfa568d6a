// ============================================================================
// MIVAA Gateway
// ============================================================================
//
// Single entry point between clients and the MIVAA document/AI service.
// It handles:
// - Authentication (workspace API keys, bearer tokens)
// - Per-identity rate limiting (fixed window)
// - Action routing to upstream endpoints
// - Forwarding with timeout and circuit breaker
//
// Architecture:
// - Shared mutable state (rate windows, breaker snapshots) lives behind
//   StateStore, so several gateway instances can share one store
// - Every collaborator is constructed explicitly and handed in; there are
//   no process-wide singletons apart from the metrics registry
//
// ============================================================================

pub mod circuit_breaker;
pub mod controller;
pub mod forwarder;
pub mod rate_limiter;
pub mod router;
pub mod store;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitSnapshot, CircuitState};
pub use controller::{GatewayController, GatewayReply, Stage};
pub use forwarder::{ForwardError, RequestForwarder};
pub use rate_limiter::{RateLimitWindow, RateLimiter};
pub use router::{Action, Route};
pub use store::{InMemoryStore, StateStore};
