mod config;
mod models;
mod routes;
mod services;

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::services::{
    fetcher::SourceFetcher, source_cache::SourceCache, stream_forwarder::StreamForwarder,
};

/// Application state shared across handlers
pub struct AppState {
    pub config: Config,
    pub cache: SourceCache,
    pub fetcher: SourceFetcher,
    pub forwarder: StreamForwarder,
    pub start_time: Instant,
}

/// Build the HTTP router: JSON API, stream proxy and optional static frontend
pub fn build_router(state: Arc<AppState>) -> Router {
    let router = Router::new()
        // Channel list & guide
        .route("/api/channels", get(routes::playlist::get_channels))
        .route("/api/epg", get(routes::playlist::get_epg))
        .route("/api/refresh", post(routes::playlist::refresh))
        // Health endpoints
        .route("/api/health", get(routes::health::health_check))
        .route("/metrics", get(routes::health::metrics))
        .route("/live", get(routes::health::live));

    // Prebuilt frontend, with index.html for client-side routes
    let router = match state.config.static_dir.as_deref() {
        Some(dir) => {
            let index = Path::new(dir).join("index.html");
            router.fallback_service(ServeDir::new(dir).fallback(ServeFile::new(index)))
        }
        None => router.route("/", get(routes::health::root)),
    };

    // Stream proxy sets its own CORS headers and answers its own preflight,
    // so it stays outside the global CorsLayer
    let stream = Router::new().route(
        "/api/stream",
        get(routes::proxy::stream_proxy).options(routes::proxy::stream_preflight),
    );

    router
        // Middleware
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .merge(stream)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "iptv_relay=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Load configuration
    let config = Config::from_env();
    let port = config.port;

    tracing::info!("Starting IPTV Relay v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {}", config.app_env);
    tracing::info!("Playlist source: {}", config.m3u_url);
    tracing::info!("Guide source: {}", config.xmltv_url);

    // Initialize services
    let fetcher = SourceFetcher::new(&config.default_user_agent, config.max_redirects)?;
    let forwarder = StreamForwarder::new(&config)?;
    if let Some(dir) = &config.static_dir {
        tracing::info!("Serving static frontend from {}", dir);
    }

    // Build application state
    let state = Arc::new(AppState {
        config,
        cache: SourceCache::new(),
        fetcher,
        forwarder,
        start_time: Instant::now(),
    });

    let app = build_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
