// ============================================================================
// Circuit Breaker
// ============================================================================
//
// Fails fast when the upstream is deemed unhealthy instead of letting every
// request wait out its timeout.
//
// States:
// - Closed: normal operation, calls pass through
// - Open: consecutive failures reached the threshold, calls are rejected
//   without being attempted until the reset timeout elapses
// - Half-Open: exactly one probe call is admitted; its outcome closes or
//   re-opens the circuit
//
// State lives in a StateStore keyed by call-site (upstream host). Every
// transition is a compare-and-swap, so concurrent callers can never admit
// more than one probe. A probe whose future is dropped before it finishes
// (client disconnect, outer timeout) re-opens the circuit with a fresh
// reset timeout.
//
// ============================================================================

use crate::config::CircuitBreakerConfig;
use crate::gateway::store::StateStore;
use crate::metrics;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Closed: Normal operation
    Closed,
    /// Open: Upstream is failing, reject calls
    Open,
    /// Half-Open: One probe call in flight
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Persisted breaker state for one call-site
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    /// When an Open circuit may admit its probe
    pub next_attempt_at: Option<Instant>,
}

impl Default for CircuitSnapshot {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            next_attempt_at: None,
        }
    }
}

/// Circuit breaker error
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Rejected without attempting the operation
    #[error("Circuit breaker is open - upstream unavailable (retry in {retry_after:?})")]
    Open { retry_after: Duration },

    /// The operation ran and failed
    #[error("{0}")]
    Inner(#[source] E),
}

/// How a call got through the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// Circuit breaker for one protected call-site
#[derive(Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    store: Arc<dyn StateStore<CircuitSnapshot>>,
    site: String,
}

impl CircuitBreaker {
    pub fn new(
        config: Arc<CircuitBreakerConfig>,
        store: Arc<dyn StateStore<CircuitSnapshot>>,
        site: impl Into<String>,
    ) -> Self {
        Self {
            config,
            store,
            site: site.into(),
        }
    }

    /// Call-site this breaker protects
    pub fn site(&self) -> &str {
        &self.site
    }

    /// Run `operation` under breaker protection
    ///
    /// # Returns
    /// * `Ok(T)` - Operation succeeded
    /// * `Err(CircuitBreakerError::Open)` - Rejected, operation never invoked
    /// * `Err(CircuitBreakerError::Inner(E))` - Operation failed (recorded)
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.admit().await?;
        let mut guard = ProbeGuard {
            breaker: (admission == Admission::Probe).then(|| self.clone()),
        };

        let result = match operation().await {
            Ok(value) => {
                self.record_success(admission).await;
                Ok(value)
            }
            Err(error) => {
                self.record_failure(admission).await;
                Err(CircuitBreakerError::Inner(error))
            }
        };
        guard.disarm();
        result
    }

    /// Current snapshot (for health reporting and metrics)
    pub async fn snapshot(&self) -> CircuitSnapshot {
        self.load().await.unwrap_or_default()
    }

    pub async fn state(&self) -> CircuitState {
        self.snapshot().await.state
    }

    pub async fn failure_count(&self) -> u32 {
        self.snapshot().await.failure_count
    }

    async fn load(&self) -> Option<CircuitSnapshot> {
        match self.store.get(&self.site).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(error = %e, site = %self.site, "Failed to read circuit state");
                None
            }
        }
    }

    /// Try to move the stored snapshot from `current` to `next`.
    /// Store errors count as success so a broken store never blocks traffic.
    async fn swap(&self, current: Option<&CircuitSnapshot>, next: CircuitSnapshot) -> bool {
        match self.store.compare_and_swap(&self.site, current, next).await {
            Ok(swapped) => swapped,
            Err(e) => {
                tracing::error!(error = %e, site = %self.site, "Failed to write circuit state");
                true
            }
        }
    }

    async fn admit<E>(&self) -> Result<Admission, CircuitBreakerError<E>> {
        loop {
            let current = self.load().await;
            let snapshot = current.clone().unwrap_or_default();

            match snapshot.state {
                CircuitState::Closed => return Ok(Admission::Normal),
                CircuitState::HalfOpen => {
                    // Probe already in flight
                    return Err(CircuitBreakerError::Open {
                        retry_after: self.config.reset_timeout,
                    });
                }
                CircuitState::Open => {
                    let now = Instant::now();
                    let next_attempt_at = snapshot.next_attempt_at.unwrap_or(now);

                    if now < next_attempt_at {
                        let retry_after = next_attempt_at - now;
                        tracing::debug!(
                            site = %self.site,
                            retry_after_ms = retry_after.as_millis(),
                            "Circuit breaker OPEN - rejecting call"
                        );
                        return Err(CircuitBreakerError::Open { retry_after });
                    }

                    let probing = CircuitSnapshot {
                        state: CircuitState::HalfOpen,
                        ..snapshot
                    };
                    if self.swap(current.as_ref(), probing).await {
                        tracing::info!(site = %self.site, "Circuit breaker transitioning to half-open");
                        metrics::record_circuit_transition(&self.site, CircuitState::HalfOpen);
                        return Ok(Admission::Probe);
                    }
                }
            }
        }
    }

    async fn record_success(&self, admission: Admission) {
        loop {
            let current = self.load().await;
            let snapshot = current.clone().unwrap_or_default();

            let next = match (snapshot.state, admission) {
                (CircuitState::Closed, _) if snapshot.failure_count == 0 => return,
                (CircuitState::Closed, _) => CircuitSnapshot::default(),
                (CircuitState::HalfOpen, Admission::Probe) => CircuitSnapshot::default(),
                // Straggler admitted before the circuit opened: the probe decides
                _ => return,
            };

            if self.swap(current.as_ref(), next).await {
                if snapshot.state == CircuitState::HalfOpen {
                    tracing::info!(site = %self.site, "Circuit breaker closed after successful probe");
                    metrics::record_circuit_transition(&self.site, CircuitState::Closed);
                }
                return;
            }
        }
    }

    async fn record_failure(&self, admission: Admission) {
        loop {
            let current = self.load().await;
            let snapshot = current.clone().unwrap_or_default();

            let next = match (snapshot.state, admission) {
                (CircuitState::Closed, _) => {
                    let failure_count = snapshot.failure_count + 1;
                    if failure_count >= self.config.failure_threshold {
                        self.opened(failure_count)
                    } else {
                        CircuitSnapshot {
                            failure_count,
                            ..snapshot.clone()
                        }
                    }
                }
                (CircuitState::HalfOpen, Admission::Probe) => {
                    self.opened(snapshot.failure_count + 1)
                }
                _ => return,
            };

            let opened = next.state == CircuitState::Open;
            let failure_count = next.failure_count;

            if self.swap(current.as_ref(), next).await {
                if opened {
                    tracing::warn!(
                        site = %self.site,
                        failure_count = failure_count,
                        threshold = self.config.failure_threshold,
                        reset_timeout_secs = self.config.reset_timeout.as_secs(),
                        "Circuit breaker OPENED"
                    );
                    metrics::record_circuit_transition(&self.site, CircuitState::Open);
                } else {
                    tracing::debug!(
                        site = %self.site,
                        failure_count = failure_count,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker failure recorded"
                    );
                }
                return;
            }
        }
    }

    /// Re-open a circuit whose probe never reported an outcome
    async fn abandon_probe(&self) {
        loop {
            let current = self.load().await;
            let snapshot = current.clone().unwrap_or_default();
            if snapshot.state != CircuitState::HalfOpen {
                return;
            }

            if self.swap(current.as_ref(), self.opened(snapshot.failure_count)).await {
                tracing::warn!(
                    site = %self.site,
                    reset_timeout_secs = self.config.reset_timeout.as_secs(),
                    "Circuit breaker probe abandoned, re-opening"
                );
                metrics::record_circuit_transition(&self.site, CircuitState::Open);
                return;
            }
        }
    }

    fn opened(&self, failure_count: u32) -> CircuitSnapshot {
        CircuitSnapshot {
            state: CircuitState::Open,
            failure_count,
            next_attempt_at: Some(Instant::now() + self.config.reset_timeout),
        }
    }
}

/// Armed while a probe runs; if dropped armed, the probe was cancelled
struct ProbeGuard {
    breaker: Option<CircuitBreaker>,
}

impl ProbeGuard {
    fn disarm(&mut self) {
        self.breaker = None;
    }
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        let Some(breaker) = self.breaker.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { breaker.abandon_probe().await });
            }
            Err(_) => tracing::warn!(
                site = %breaker.site,
                "Probe dropped outside a runtime, circuit left half-open"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::store::InMemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, reset_secs: u64) -> CircuitBreaker {
        let config = CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout: Duration::from_secs(reset_secs),
            monitoring_period: Duration::from_secs(300),
        };
        CircuitBreaker::new(
            Arc::new(config),
            Arc::new(InMemoryStore::<CircuitSnapshot>::new()),
            "upstream.test",
        )
    }

    async fn fail(cb: &CircuitBreaker, calls: &AtomicU32) -> Result<(), CircuitBreakerError<&'static str>> {
        cb.execute(move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("boom")
        })
        .await
    }

    async fn succeed(cb: &CircuitBreaker, calls: &AtomicU32) -> Result<u32, CircuitBreakerError<&'static str>> {
        cb.execute(move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &'static str>(42)
        })
        .await
    }

    #[tokio::test]
    async fn test_passes_through_when_closed() {
        let cb = breaker(3, 30);
        let calls = AtomicU32::new(0);

        assert_eq!(succeed(&cb, &calls).await.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_inner_error_is_reraised() {
        let cb = breaker(3, 30);
        let calls = AtomicU32::new(0);

        match fail(&cb, &calls).await {
            Err(CircuitBreakerError::Inner(e)) => assert_eq!(e, "boom"),
            other => panic!("expected inner error, got {:?}", other),
        }
        assert_eq!(cb.failure_count().await, 1);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let cb = breaker(3, 30);
        let calls = AtomicU32::new(0);

        let _ = fail(&cb, &calls).await;
        let _ = fail(&cb, &calls).await;
        succeed(&cb, &calls).await.unwrap();
        let _ = fail(&cb, &calls).await;

        assert_eq!(cb.state().await, CircuitState::Closed);
        assert_eq!(cb.failure_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_threshold_and_rejects_without_invoking() {
        let cb = breaker(3, 30);
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let _ = fail(&cb, &calls).await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        tokio::time::advance(Duration::from_secs(29)).await;
        for _ in 0..5 {
            match succeed(&cb, &calls).await {
                Err(CircuitBreakerError::Open { retry_after }) => {
                    assert!(retry_after <= Duration::from_secs(1));
                }
                other => panic!("expected open error, got {:?}", other),
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let cb = breaker(2, 10);
        let calls = AtomicU32::new(0);

        let _ = fail(&cb, &calls).await;
        let _ = fail(&cb, &calls).await;
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(succeed(&cb, &calls).await.unwrap(), 42);

        let snapshot = cb.snapshot().await;
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_with_fresh_window() {
        let cb = breaker(2, 10);
        let calls = AtomicU32::new(0);

        let _ = fail(&cb, &calls).await;
        let _ = fail(&cb, &calls).await;

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(matches!(
            fail(&cb, &calls).await,
            Err(CircuitBreakerError::Inner(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cb.state().await, CircuitState::Open);

        // New window: still rejected just before it elapses
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(matches!(
            succeed(&cb, &calls).await,
            Err(CircuitBreakerError::Open { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(succeed(&cb, &calls).await.is_ok());
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_probe_admitted() {
        let cb = breaker(1, 5);
        let calls = AtomicU32::new(0);
        let _ = fail(&cb, &calls).await;

        tokio::time::advance(Duration::from_secs(5)).await;

        // Hold the probe open while a second caller arrives
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe_cb = cb.clone();
        let probe = tokio::spawn(async move {
            probe_cb
                .execute(move || async move {
                    let _ = release_rx.await;
                    Ok::<_, &'static str>(())
                })
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        match succeed(&cb, &calls).await {
            Err(CircuitBreakerError::Open { retry_after }) => {
                assert_eq!(retry_after, Duration::from_secs(5));
            }
            other => panic!("expected open error, got {:?}", other),
        }

        release_tx.send(()).unwrap();
        probe.await.unwrap().unwrap();
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_probe_reopens_circuit() {
        let cb = breaker(1, 5);
        let calls = AtomicU32::new(0);
        let _ = fail(&cb, &calls).await;

        tokio::time::advance(Duration::from_secs(5)).await;

        let probe_cb = cb.clone();
        let probe = tokio::spawn(async move {
            probe_cb
                .execute(std::future::pending::<Result<(), &'static str>>)
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        probe.abort();
        assert!(probe.await.unwrap_err().is_cancelled());
        for _ in 0..10 {
            if cb.state().await == CircuitState::Open {
                break;
            }
            tokio::task::yield_now().await;
        }

        let snapshot = cb.snapshot().await;
        assert_eq!(snapshot.state, CircuitState::Open);
        assert!(snapshot.next_attempt_at.is_some());

        // Rejected until the fresh reset timeout elapses, then a new probe closes it
        assert!(matches!(
            succeed(&cb, &calls).await,
            Err(CircuitBreakerError::Open { .. })
        ));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(succeed(&cb, &calls).await.unwrap(), 42);
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_breakers_share_state_per_site() {
        let store: Arc<dyn StateStore<CircuitSnapshot>> = Arc::new(InMemoryStore::<CircuitSnapshot>::new());
        let config = Arc::new(CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(60),
            monitoring_period: Duration::from_secs(300),
        });
        let a = CircuitBreaker::new(config.clone(), store.clone(), "a.example");
        let a_again = CircuitBreaker::new(config.clone(), store.clone(), "a.example");
        let b = CircuitBreaker::new(config, store, "b.example");
        let calls = AtomicU32::new(0);

        let _ = fail(&a, &calls).await;

        assert_eq!(a_again.state().await, CircuitState::Open);
        assert_eq!(b.state().await, CircuitState::Closed);
    }
}
