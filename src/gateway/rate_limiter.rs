// ============================================================================
// Rate Limiter
// ============================================================================
//
// Fixed-window request counter per caller identity:
// - first request (or first after expiry) opens a window with count = 1
// - further requests increment while count < limit
// - at count = limit the request is rejected and the count stays put
//
// Bursts straddling a window boundary are accepted. This is a fixed window,
// not a sliding one.
//
// Check-and-increment is a compare-and-swap on the window store, so two
// concurrent requests can never both take the last slot.
//
// Expired windows are swept from the store at most once per SWEEP_INTERVAL,
// piggybacked on a regular check, so one-off identities do not pile up.
//
// ============================================================================

use crate::gateway::store::StateStore;
use crate::metrics;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Minimum time between sweeps of expired windows
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Counter for one identity
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitWindow {
    pub count: u32,
    pub window_reset_at: Instant,
}

pub struct RateLimiter {
    store: Arc<dyn StateStore<RateLimitWindow>>,
    next_sweep_at: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn StateStore<RateLimitWindow>>) -> Self {
        Self {
            store,
            next_sweep_at: Mutex::new(Instant::now() + SWEEP_INTERVAL),
        }
    }

    /// Count one request for `identity` and report whether it is allowed
    pub async fn check(&self, identity: &str, limit: u32, window: Duration) -> bool {
        self.sweep_if_due().await;

        loop {
            let current = match self.store.get(identity).await {
                Ok(current) => current,
                Err(e) => {
                    // Fail open: losing the counter must not take the gateway down
                    tracing::error!(error = %e, "Failed to read rate limit window, allowing request");
                    return true;
                }
            };

            let now = Instant::now();
            let next = match &current {
                Some(w) if now <= w.window_reset_at => {
                    if w.count >= limit {
                        tracing::debug!(
                            count = w.count,
                            limit = limit,
                            "Rate limit exceeded"
                        );
                        metrics::RATE_LIMIT_REJECTIONS_TOTAL.inc();
                        return false;
                    }
                    RateLimitWindow {
                        count: w.count + 1,
                        window_reset_at: w.window_reset_at,
                    }
                }
                // No window yet, or the old one expired: replace it
                _ => {
                    if limit == 0 {
                        metrics::RATE_LIMIT_REJECTIONS_TOTAL.inc();
                        return false;
                    }
                    RateLimitWindow {
                        count: 1,
                        window_reset_at: now + window,
                    }
                }
            };

            match self.store.compare_and_swap(identity, current.as_ref(), next).await {
                Ok(true) => return true,
                Ok(false) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to update rate limit window, allowing request");
                    return true;
                }
            }
        }
    }

    /// Remove every window that has expired
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        match self.store.retain(&|w: &RateLimitWindow| now <= w.window_reset_at).await {
            Ok(removed) => {
                if removed > 0 {
                    tracing::debug!(removed = removed, "Swept expired rate limit windows");
                }
                removed
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to sweep rate limit windows");
                0
            }
        }
    }

    async fn sweep_if_due(&self) {
        let now = Instant::now();
        let due = match self.next_sweep_at.lock() {
            Ok(mut next) if now >= *next => {
                *next = now + SWEEP_INTERVAL;
                true
            }
            _ => false,
        };
        if due {
            self.sweep_expired().await;
        }
    }

    /// Current window for `identity` (for tests and diagnostics)
    pub async fn window(&self, identity: &str) -> Option<RateLimitWindow> {
        self.store.get(identity).await.ok().flatten()
    }
}
