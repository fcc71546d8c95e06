//! Archivist acceptor
//!
//! HTTP front door: `POST /save` stages one article, `POST /compact` merges
//! everything staged, `GET /health` reports liveness.

pub mod handler;
pub mod middleware;

use anyhow::{Context, Result};
use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    middleware::from_fn_with_state,
    routing::{get, post},
};
use common::{Configuration, StagingContext};
use staging::{Compactor, PendingArea};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::middleware::{AUTH_TOKEN_HEADER, auth_middleware};

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub pending: PendingArea,
    pub compactor: Compactor,
}

impl From<&StagingContext> for AppState {
    fn from(context: &StagingContext) -> Self {
        Self {
            pending: context.pending.clone(),
            compactor: context.compactor.clone(),
        }
    }
}

/// Router options resolved from configuration.
#[derive(Debug, Clone, Default)]
pub struct AcceptorSettings {
    pub auth_token: Option<String>,
    /// `*` or a comma separated list of origins
    pub cors_allow_origin: String,
}

impl AcceptorSettings {
    pub fn from_config(config: &Configuration) -> Self {
        Self {
            auth_token: config.resolve_auth_token(),
            cors_allow_origin: config.acceptor.cors_allow_origin.clone(),
        }
    }
}

pub fn create_router(state: AppState, settings: &AcceptorSettings) -> Router {
    if settings.auth_token.is_none() {
        tracing::warn!("No auth token configured, submissions are accepted without a token");
    }

    let token = Arc::new(settings.auth_token.clone());

    let protected = Router::new()
        .route("/", post(handler::save_article))
        .route("/save", post(handler::save_article))
        .route("/compact", post(handler::compact))
        .route_layer(from_fn_with_state(token, auth_middleware));

    Router::new()
        .route("/health", get(handler::health))
        .merge(protected)
        .layer(build_cors_layer(&settings.cors_allow_origin))
        .with_state(state)
}

fn build_cors_layer(allow_origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(AUTH_TOKEN_HEADER),
        ]);

    let allow_origin = allow_origin.trim();
    if allow_origin.is_empty() {
        return cors;
    }
    if allow_origin == "*" {
        return cors.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allow_origin
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::error!(origin, "Invalid CORS origin, ignoring it");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        tracing::warn!("All configured CORS origins were invalid; disabling CORS");
        cors
    } else {
        cors.allow_origin(AllowOrigin::list(origins))
    }
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr().context("Listener has no local address")?;
    tracing::info!("Acceptor listening on http://{addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Acceptor server failed")?;

    tracing::info!("Acceptor stopped");
    Ok(())
}

/// Bind the configured address and serve.
pub async fn run<F>(config: &Configuration, context: &StagingContext, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(&config.acceptor.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.acceptor.listen_addr))?;

    let settings = AcceptorSettings::from_config(config);
    let router = create_router(AppState::from(context), &settings);
    serve(listener, router, shutdown).await
}
