//! Metrics module
//!
//! Prometheus metrics for authentication outcomes and proxied traffic.

pub mod server;

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec,
};

lazy_static! {
    // Auth metrics
    pub static ref AUTH_OUTCOMES: CounterVec = register_counter_vec!(
        "gatehouse_auth_outcomes_total",
        "Authentication middleware outcomes",
        &["outcome"]  // "anonymous", "authenticated" or "rejected"
    ).unwrap();

    pub static ref AUTH_FAILURES: CounterVec = register_counter_vec!(
        "gatehouse_auth_failures_total",
        "Verification failures by cause",
        &["kind"]
    ).unwrap();

    pub static ref VERIFY_DURATION: HistogramVec = register_histogram_vec!(
        "gatehouse_verify_duration_seconds",
        "Identity provider verification latency in seconds",
        &["result"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    ).unwrap();

    // Routing metrics
    pub static ref PROXY_REQUESTS: CounterVec = register_counter_vec!(
        "gatehouse_proxy_requests_total",
        "Requests forwarded upstream",
        &["route", "status"]
    ).unwrap();

    pub static ref POLICY_DENIALS: CounterVec = register_counter_vec!(
        "gatehouse_policy_denials_total",
        "Anonymous requests refused by the route authorization policy",
        &["method"]
    ).unwrap();

    pub static ref PROXY_DURATION: HistogramVec = register_histogram_vec!(
        "gatehouse_proxy_duration_seconds",
        "Upstream round trip in seconds",
        &["route"],
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    ).unwrap();
}

/// Record the terminal state of one pass through the middleware
pub fn record_auth_outcome(outcome: &str) {
    AUTH_OUTCOMES.with_label_values(&[outcome]).inc();
}

/// Record a verification failure by cause
pub fn record_auth_failure(kind: &str) {
    AUTH_FAILURES.with_label_values(&[kind]).inc();
}

/// Record how long the provider took to answer
pub fn record_verify_duration(success: bool, duration_secs: f64) {
    let result = if success { "success" } else { "failure" };
    VERIFY_DURATION
        .with_label_values(&[result])
        .observe(duration_secs);
}

/// Record a forwarded request; `status` is bucketed into its class ("2xx", ...)
pub fn record_proxy_request(route: &str, status: u16, duration_secs: f64) {
    let class = format!("{}xx", status / 100);
    PROXY_REQUESTS.with_label_values(&[route, &class]).inc();
    PROXY_DURATION
        .with_label_values(&[route])
        .observe(duration_secs);
}

/// Record a request refused for lack of authentication
pub fn record_policy_denial(method: &str) {
    POLICY_DENIALS.with_label_values(&[method]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_auth_outcome() {
        record_auth_outcome("authenticated");
        assert!(AUTH_OUTCOMES.with_label_values(&["authenticated"]).get() >= 1.0);
    }

    #[test]
    fn test_record_auth_failure() {
        record_auth_failure("timeout");
        record_verify_duration(false, 5.0);
        // Just verify it doesn't panic
    }

    #[test]
    fn test_proxy_status_class() {
        record_proxy_request("test-route", 204, 0.01);
        assert!(
            PROXY_REQUESTS
                .with_label_values(&["test-route", "2xx"])
                .get()
                >= 1.0
        );
    }

    #[test]
    fn test_record_policy_denial() {
        record_policy_denial("POST");
        // Just verify it doesn't panic
    }
}
