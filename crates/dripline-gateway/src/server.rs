//! HTTP server implementation using Axum.

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::get,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use dripline_core::config::GatewayConfig;
use dripline_scheduler::Poller;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub poller: Arc<Poller>,
    /// Expected bearer token. `None` disables the check.
    pub cron_secret: Option<String>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(poller: Arc<Poller>, cron_secret: Option<String>) -> Self {
        Self {
            poller,
            cron_secret: cron_secret.filter(|s| !s.is_empty()),
            start_time: std::time::Instant::now(),
        }
    }
}

/// Whether an `Authorization` header value carries the shared secret.
pub(crate) fn bearer_matches(expected: &str, header: Option<&str>) -> bool {
    header
        .and_then(|h| h.strip_prefix("Bearer "))
        .is_some_and(|token| constant_time_eq(token.as_bytes(), expected.as_bytes()))
}

/// Byte comparison whose running time does not depend on where inputs differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Cron secret middleware: validates `Authorization: Bearer <secret>`.
async fn require_cron_secret(
    State(state): State<Arc<AppState>>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    // If no secret configured, allow all
    let Some(expected) = &state.cron_secret else {
        return next.run(req).await;
    };

    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if bearer_matches(expected, header) {
        return next.run(req).await;
    }

    tracing::warn!("🔒 Rejected cron trigger: missing or invalid bearer token");
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": "unauthorized"})),
    )
        .into_response()
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let shared = Arc::new(state);

    let protected = Router::new()
        .route(
            "/api/cron/marketing",
            get(super::routes::run_marketing_cron).post(super::routes::run_marketing_cron),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            shared.clone(),
            require_cron_secret,
        ));

    let public = Router::new().route("/health", get(super::routes::health_check));

    protected
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Start the HTTP server.
pub async fn start(config: &GatewayConfig, poller: Arc<Poller>) -> anyhow::Result<()> {
    let state = AppState::new(poller, config.cron_secret.clone());
    if state.cron_secret.is_none() {
        tracing::warn!(
            "⚠️ CRON_SECRET not set: /api/cron/marketing accepts unauthenticated requests"
        );
    }

    let app = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Cron gateway listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
