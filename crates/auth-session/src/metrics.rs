//! Session metrics
//!
//! - `token_refresh_total` (counter): label `outcome`
//! - `api_requests_total` (counter): label `outcome`
//!
//! Without an installed recorder these are no-ops.

/// Record a completed refresh flight.
pub fn record_refresh(outcome: &'static str) {
    metrics::counter!("token_refresh_total", "outcome" => outcome).increment(1);
}

/// Record the final outcome of an executor call.
pub fn record_request(outcome: &'static str) {
    metrics::counter!("api_requests_total", "outcome" => outcome).increment(1);
}
