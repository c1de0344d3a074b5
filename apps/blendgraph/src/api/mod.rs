//! # Blendgraph HTTP API Module
//!
//! HTTP REST API over the composition graph, using axum.
//!
//! ## Endpoints
//!
//! - `GET /health` - Liveness, never behind the key
//! - `GET /status` - Record counts
//! - `GET /formulas/{id}` - Formula with its direct edges
//! - `GET /formulas/{id}/flatten` - Raw-substance composition
//! - `GET /formulas/{id}/tree` - Nested structure
//! - `GET /formulas/{id}/used-in` - Formulas using this one as a compound
//! - `POST /formulas/{id}/ingredients` - Add a compound ingredient
//! - `PATCH|DELETE /formulas/{id}/ingredients/{child}`
//! - `POST /formulas/{id}/substances` - Add a raw substance
//! - `PATCH|DELETE /formulas/{id}/substances/{child}`
//! - `POST /cycle-check` - Dry-run the cycle guard
//!
//! ## Security Configuration
//!
//! Taken from the `[server]` config section (see [`ServerConfig`]):
//! `api_key`, `rate_limit` and `cors_origins`.

mod auth;
mod handlers;
mod middleware;
mod types;

pub use auth::{ANONYMOUS, ActingUser, ApiKey, USER_HEADER};
pub use middleware::{SharedLimiter, build_limiter};
pub use types::{
    AddIngredientRequest, AddSubstanceRequest, ApiError, CycleCheckRequest, CycleCheckResponse,
    ErrorResponse, FlattenQuery, FormulaResponse, HealthResponse, StatusResponse,
    UpdateIngredientRequest, UpdateSubstanceRequest, status_for,
};

use crate::config::ServerConfig;
use crate::error::AppError;
use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, patch, post},
};
use blendgraph_core::{AccessList, Session, TracingSink};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Maximum request body size.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// The session type served over HTTP: per-formula access lists, events to
/// the tracing log.
pub type ServerSession = Session<AccessList, TracingSink>;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Router state: one session behind an async lock. Reads share it, edge
/// mutations take it exclusively.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<RwLock<ServerSession>>,
}

impl AppState {
    #[must_use]
    pub fn new(session: ServerSession) -> Self {
        Self {
            session: Arc::new(RwLock::new(session)),
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

const CORS_METHODS: [Method; 5] = [
    Method::GET,
    Method::POST,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
];

fn cors_headers() -> [HeaderName; 3] {
    [
        header::CONTENT_TYPE,
        header::AUTHORIZATION,
        HeaderName::from_static(USER_HEADER),
    ]
}

/// Build the CORS layer from `server.cors_origins`.
///
/// - `["*"]`: any origin
/// - unset, or no valid entries: localhost only
/// - otherwise: the listed origins
fn build_cors_layer(origins: Option<&[String]>) -> CorsLayer {
    match origins {
        Some([only]) if only == "*" => {
            tracing::warn!(event = "cors", "any origin may call the API");
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| match origin.trim().parse::<HeaderValue>() {
                    Ok(hv) => {
                        tracing::info!(event = "cors", %origin, "origin allowed");
                        Some(hv)
                    }
                    Err(e) => {
                        tracing::warn!(
                            event = "cors",
                            %origin,
                            error = %e,
                            "ignoring unparsable origin"
                        );
                        None
                    }
                })
                .collect();

            if allowed.is_empty() {
                tracing::warn!(event = "cors", "no usable origins, falling back to localhost");
                localhost_only()
            } else {
                CorsLayer::new()
                    .allow_origin(allowed)
                    .allow_methods(CORS_METHODS)
                    .allow_headers(cors_headers())
            }
        }
        None => {
            tracing::info!(event = "cors", "cors_origins unset, localhost only");
            localhost_only()
        }
    }
}

fn localhost_only() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .into_iter()
    .filter_map(|o| o.parse::<HeaderValue>().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(CORS_METHODS)
        .allow_headers(cors_headers())
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// All routes, wrapped (outermost first) in request tracing, CORS, the body
/// size cap, the throttle when `rate_limit > 0`, and the key check when an
/// API key is configured.
pub fn create_router(state: AppState, config: &ServerConfig) -> Router {
    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/status", get(handlers::status_handler))
        .route("/formulas/{id}", get(handlers::formula_handler))
        .route("/formulas/{id}/flatten", get(handlers::flatten_handler))
        .route("/formulas/{id}/tree", get(handlers::tree_handler))
        .route("/formulas/{id}/used-in", get(handlers::used_in_handler))
        .route(
            "/formulas/{id}/ingredients",
            post(handlers::add_ingredient_handler),
        )
        .route(
            "/formulas/{id}/ingredients/{child}",
            patch(handlers::update_ingredient_handler).delete(handlers::remove_ingredient_handler),
        )
        .route(
            "/formulas/{id}/substances",
            post(handlers::add_substance_handler),
        )
        .route(
            "/formulas/{id}/substances/{child}",
            patch(handlers::update_substance_handler).delete(handlers::remove_substance_handler),
        )
        .route("/cycle-check", post(handlers::cycle_check_handler));

    match config.api_key() {
        Some(key) => {
            tracing::info!(event = "auth", "api key required on all routes but /health");
            router = router.layer(axum_middleware::from_fn_with_state(
                ApiKey::new(key),
                auth::require_api_key,
            ));
        }
        None => {
            tracing::warn!(
                event = "auth",
                "no api key configured; set server.api_key or BLENDGRAPH_API_KEY to require one"
            );
        }
    }

    if config.rate_limit > 0 {
        tracing::info!(event = "throttle", per_second = config.rate_limit, "throttle on");
        router = router.layer(axum_middleware::from_fn_with_state(
            build_limiter(config.rate_limit),
            middleware::throttle,
        ));
    } else {
        tracing::info!(event = "throttle", "throttle off");
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors_layer(config.cors_origins.as_deref()))
                .layer(axum::extract::DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Bind `config.bind_addr()` and serve until Ctrl+C.
pub async fn run_server(config: &ServerConfig, session: ServerSession) -> Result<(), AppError> {
    let addr = config.bind_addr();
    let router = create_router(AppState::new(session), config);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::Io(format!("Bind failed: {}", e)))?;

    tracing::info!("Blendgraph HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::Server(e.to_string()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
