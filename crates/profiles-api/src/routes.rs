//! API routes.

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, patch, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::handlers::{
    create_profile, delete_profile, firebase_login, get_own_profile, get_profile, health, ready,
    reset_password, update_phone,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    rate_limit_middleware, request_id, request_logging, security_headers, RateLimiterCache,
};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    // Each path is also served with a trailing slash
    let profile_routes = Router::new()
        .route("/profile", get(get_own_profile))
        .route("/profile/", get(get_own_profile))
        .route("/profile/create", post(create_profile))
        .route("/profile/create/", post(create_profile))
        .route("/profile/:id", get(get_profile).delete(delete_profile))
        .route("/profile/:id/", get(get_profile).delete(delete_profile))
        .route("/profile/:id/update-phone", patch(update_phone))
        .route("/profile/:id/update-phone/", patch(update_phone));

    // Unauthenticated credential routes are rate limited per client IP
    let rate_limiter = Arc::new(
        RateLimiterCache::new(state.config.rate_limit_rps)
            .with_trusted_proxy_headers(state.config.trust_proxy_headers),
    );
    let credential_routes = Router::new()
        .route("/firebase-login", post(firebase_login))
        .route("/firebase-login/", post(firebase_login))
        .route("/reset-password", post(reset_password))
        .route("/reset-password/", post(reset_password))
        .layer(middleware::from_fn_with_state(rate_limiter, rate_limit_middleware));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .merge(profile_routes)
        .merge(credential_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(TimeoutLayer::new(state.config.request_timeout))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_logging))
        // Outermost so the id is visible to logging
        .layer(middleware::from_fn(request_id))
        .with_state(state)
}
