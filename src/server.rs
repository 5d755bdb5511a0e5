use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::get,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::ai::TaskExtractor;
use crate::api::{self, ACTOR_HEADER, AppState, SharedState};
use crate::config::{BenConfig, RateLimitSection};
use crate::rate_limit::{ApiRateLimiter, rate_limit_middleware};
use crate::store::{BenDb, DbHandle};
use crate::ws;

/// Configuration for the HTTP server.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    /// Permissive CORS for a separately served frontend
    pub dev_mode: bool,
    pub cors_origins: Vec<String>,
    pub rate_limit: RateLimitSection,
    /// Open the browser once listening
    pub open_browser: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let defaults = BenConfig::default();
        Self {
            host: defaults.server.host,
            port: defaults.server.port,
            db_path: defaults.server.db_path,
            dev_mode: false,
            cors_origins: Vec::new(),
            rate_limit: defaults.rate_limit,
            open_browser: false,
        }
    }
}

/// Build the full application router: rate-limited `/api`, plus `/ws` and
/// `/health`.
pub fn build_router(state: SharedState, rate_limit: &RateLimitSection) -> Router {
    let mut api_routes = api::api_router();
    if rate_limit.enabled {
        let limiter = Arc::new(ApiRateLimiter::from_config(rate_limit));
        api_routes = api_routes.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
    }

    let ws_tx = state.ws_tx.clone();
    Router::new()
        .merge(api_routes)
        .route("/health", get(api::health_check))
        .route(
            "/ws",
            get(move |ws_upgrade| ws::ws_handler(ws_upgrade, ws_tx)),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(config: &ServerConfig) -> Option<CorsLayer> {
    if config.dev_mode {
        return Some(CorsLayer::permissive());
    }
    if config.cors_origins.is_empty() {
        return None;
    }
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
            .allow_headers([
                header::CONTENT_TYPE,
                header::HeaderName::from_static(ACTOR_HEADER),
            ]),
    )
}

/// Open the database, wire state and serve until Ctrl+C.
pub async fn start_server(config: ServerConfig, extractor: Arc<dyn TaskExtractor>) -> Result<()> {
    let db = BenDb::new(&config.db_path).context("Failed to initialize database")?;
    tracing::info!(db = %config.db_path.display(), "Database ready");
    let state = AppState::new(DbHandle::new(db), extractor);

    let mut app = build_router(state, &config.rate_limit);
    if let Some(cors) = cors_layer(&config) {
        app = app.layer(cors);
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    let url = format!("http://{}", local_addr);
    tracing::info!(%url, rate_limit = config.rate_limit.enabled, "Ben OS server listening");
    println!("Ben OS running at {}", url);

    if config.open_browser
        && let Err(e) = open::that(&url)
    {
        tracing::warn!(error = %e, "Failed to open browser");
    }

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down...");
}
