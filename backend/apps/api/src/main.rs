//! API Server Entry Point
//!
//! Application entry point and server initialization.
//! Uses `anyhow` for startup errors; request-level errors are rendered by
//! the admission crate.

mod settings;

use admission::{QueueMaintenanceScheduler, queue_router, store_virtual_queue};
use axum::{
    Router, http,
    http::{HeaderName, Method, header},
};
use platform::rate_limit::OrderRateLimiter;
use platform::store::{MemoryStore, RedisStore, SharedStore};
use settings::{Settings, StoreBackend};
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "api=info,admission=info,platform=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;

    match settings.store_backend {
        StoreBackend::Redis => {
            let store = RedisStore::connect(&settings.redis_url).await?;
            serve(store, settings).await
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; queue state is local to this process");
            serve(MemoryStore::new(), settings).await
        }
    }
}

async fn serve<S>(store: S, settings: Settings) -> anyhow::Result<()>
where
    S: SharedStore,
{
    let principal_header = HeaderName::from_bytes(settings.principal_header.as_bytes())?;

    let queue = store_virtual_queue(store.clone(), settings.lock.clone(), settings.queue.clone());
    let limiter = OrderRateLimiter::from_config(store, settings.rate_limit.clone());

    // Maintenance jobs
    let scheduler = QueueMaintenanceScheduler::start(queue.clone());

    // CORS configuration
    let allowed_origins: Vec<http::HeaderValue> = settings
        .frontend_origins
        .split(',')
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods(AllowMethods::list([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            principal_header.clone(),
        ]))
        .expose_headers([
            admission::presentation::middleware::HEADER_LIMIT,
            admission::presentation::middleware::HEADER_REMAINING,
            admission::presentation::middleware::HEADER_RESET,
        ])
        .allow_credentials(true);

    // Build router
    let app = Router::new()
        .nest("/api/queue", queue_router(queue, limiter, principal_header))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    tracing::info!("Listening on {}", settings.bind_addr);

    let listener = TcpListener::bind(settings.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
