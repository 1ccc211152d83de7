use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::handlers::{
    delete_file, download_file, explore_dir, explore_root, health_check, preview_file,
    resume_info, resume_info_root, upload_chunk, upload_chunk_root,
};
use crate::middleware::{add_security_headers, no_store};
use crate::state::AppState;
use crate::utils::shutdown_signal;

/// routes and per-route middleware, without the connection-level layers.
/// tests drive this directly since the rate limiter needs a peer address
pub fn build_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/upload", post(upload_chunk_root))
        .route("/upload/*path", post(upload_chunk))
        .route("/get_resume_info", get(resume_info_root))
        .route("/get_resume_info/*path", get(resume_info))
        .route("/delete/*path", delete(delete_file))
        .route("/download/*path", get(download_file))
        .route("/preview/*path", get(preview_file))
        .route("/explore", get(explore_root))
        .route("/explore/*path", get(explore_dir))
        .route("/health", get(health_check))
        .layer(axum::middleware::from_fn(no_store))
        .layer(axum::middleware::from_fn(add_security_headers))
        .with_state(state)
}

/// build the full router
pub fn build_router(state: Arc<AppState>, config: &Config) -> Router {
    tracing::debug!(
        "Building router with max request size: {} bytes",
        config.max_request_size
    );

    // configure rate limiting
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(config.rate_limit_replenish_ms)
            .burst_size(config.rate_limit_burst)
            .finish()
            .expect("rate limit settings are non-zero"),
    );

    // chunk uploads are body-heavy, let the explicit limit below decide
    build_routes(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_request_size))
        .layer(CompressionLayer::new().gzip(true).br(true).zstd(true))
        .layer(GovernorLayer {
            config: governor_conf,
        })
        .layer(cors_layer(config))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(config: &Config) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods([Method::GET, Method::POST, Method::DELETE]);

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    if origins.is_empty() {
        cors.allow_origin(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    } else {
        cors.allow_origin(origins)
            .allow_headers(tower_http::cors::Any)
    }
}

/// serve until a shutdown signal arrives
pub async fn start_server(app: Router, addr: SocketAddr) {
    tracing::info!("Starting server...");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            return;
        }
    };
    tracing::debug!("Listener bound to {}", addr);

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .tcp_nodelay(true);

    tracing::info!("Server running and ready to accept connections");
    if let Err(e) = server.await {
        tracing::error!("Server error: {}", e);
    }
}

/// print startup banner with server info
pub fn print_startup_banner(config: &Config, files_dir: &std::path::Path) {
    tracing::info!("chunkvault starting...");
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("📡 LISTENING ON: http://{}:{}", config.host, config.port);
    tracing::info!("📁 Upload root: {:?}", files_dir);
    tracing::info!(
        "📦 Chunk size: {} | Max file size: {}",
        crate::utils::format_size(config.chunk_size),
        crate::utils::format_size(config.max_file_size)
    );
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}
