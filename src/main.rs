use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use std::net::SocketAddr;
use std::sync::Arc;

use chunkvault::config::Config;
use chunkvault::paths::canonicalize_root;
use chunkvault::state::AppState;
use chunkvault::server::{build_router, print_startup_banner, start_server};

// use mimalloc as the global allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    // load .env file if it exists (fails silently if not found)
    let _ = dotenvy::dotenv();

    // load configuration from environment variables
    let config = Config::from_env();

    // build tokio runtime with configured worker threads
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime");

    runtime.block_on(async {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();

        // create the upload root if it doesn't exist
        if !config.upload_dir.exists() {
            std::fs::create_dir_all(&config.upload_dir).expect("Failed to create upload directory");
            tracing::info!("Created upload directory at: {:?}", config.upload_dir);
        }

        // every path check compares against this canonical form
        let files_dir = canonicalize_root(&config.upload_dir)
            .expect("Failed to resolve upload directory");

        // the upload store lives here and is handed to every handler
        let state = Arc::new(AppState::from_config(files_dir.clone(), &config));

        let app = build_router(state, &config);

        let addr = SocketAddr::from((
            config.host.parse::<std::net::IpAddr>()
                .expect("Invalid HOST"),
            config.port,
        ));

        print_startup_banner(&config, &files_dir);

        start_server(app, addr).await;
    });
}
