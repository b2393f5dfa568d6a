use crate::gateway::circuit_breaker::CircuitState;
use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, TextEncoder, histogram_opts,
    opts, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge_vec,
};

/// Gateway responses by envelope outcome (`OK` or the error code)
pub static REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "mivaa_gateway_requests_total",
            "Total number of processed gateway requests by outcome code"
        ),
        &["code"]
    )
    .unwrap()
});

pub static UPSTREAM_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "mivaa_gateway_upstream_request_duration_seconds",
            "Latency of forwarded upstream calls",
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        ),
        &["outcome"]
    )
    .unwrap()
});

pub static RATE_LIMIT_REJECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "mivaa_gateway_rate_limit_rejections_total",
        "Requests rejected by a fixed-window rate limit"
    ))
    .unwrap()
});

pub static CIRCUIT_TRANSITIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "mivaa_gateway_circuit_transitions_total",
            "Circuit breaker state transitions by call-site and target state"
        ),
        &["site", "state"]
    )
    .unwrap()
});

/// 0 = closed, 1 = half-open, 2 = open
pub static CIRCUIT_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        opts!(
            "mivaa_gateway_circuit_state",
            "Current circuit breaker state per call-site"
        ),
        &["site"]
    )
    .unwrap()
});

pub fn record_circuit_transition(site: &str, state: CircuitState) {
    CIRCUIT_TRANSITIONS_TOTAL
        .with_label_values(&[site, state.as_str()])
        .inc();
    let level = match state {
        CircuitState::Closed => 0,
        CircuitState::HalfOpen => 1,
        CircuitState::Open => 2,
    };
    CIRCUIT_STATE.with_label_values(&[site]).set(level);
}

pub fn record_request(code: &str) {
    REQUESTS_TOTAL.with_label_values(&[code]).inc();
}

pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}
