//! Prometheus metrics for the API server.

use std::sync::LazyLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex::Regex;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "profiles_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "profiles_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "profiles_http_requests_in_flight";

    // Account metrics
    pub const USERS_PROVISIONED_TOTAL: &str = "profiles_users_provisioned_total";
    pub const PROFILES_SAVED_TOTAL: &str = "profiles_profiles_saved_total";
    pub const PASSWORD_RESETS_TOTAL: &str = "profiles_password_resets_total";
    pub const AUTH_FAILURES_TOTAL: &str = "profiles_auth_failures_total";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "profiles_rate_limit_hits_total";
}

static NUMERIC_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/[0-9]+(/|$)").expect("static regex"));

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a login; `created` distinguishes first-time provisioning.
pub fn record_login(created: bool) {
    let labels = [("outcome", if created { "created" } else { "existing" }.to_string())];
    counter!(names::USERS_PROVISIONED_TOTAL, &labels).increment(1);
}

/// Record a profile create or update.
pub fn record_profile_saved(created: bool) {
    let labels = [("kind", if created { "create" } else { "update" }.to_string())];
    counter!(names::PROFILES_SAVED_TOTAL, &labels).increment(1);
}

/// Record a completed password reset.
pub fn record_password_reset() {
    counter!(names::PASSWORD_RESETS_TOTAL).increment(1);
}

/// Record a refused bearer token.
pub fn record_auth_failure(reason: &'static str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::AUTH_FAILURES_TOTAL, &labels).increment(1);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", endpoint.to_string())];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Sanitize path for metrics labels (replace numeric IDs).
fn sanitize_path(path: &str) -> String {
    let path = path.trim_end_matches('/');
    let path = if path.is_empty() { "/" } else { path };
    // Two passes: adjacent numeric segments share a slash
    let once = NUMERIC_SEGMENT.replace_all(path, "/:id$1");
    NUMERIC_SEGMENT.replace_all(&once, "/:id$1").into_owned()
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}
