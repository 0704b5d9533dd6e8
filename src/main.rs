mod config;
mod db;
mod metrics;
mod models;
mod routes;
mod services;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::{create_pool, run_migrations};
use crate::services::{
    catalog::CatalogService,
    engine::{AceEngine, Engine},
    fetcher::HttpFetcher,
    override_store::{MemoryOverrideStore, OverrideStore, PgOverrideStore},
    redis::RedisService,
    relay::StreamProxy,
};

/// Application state shared across handlers
pub struct AppState {
    pub config: Config,
    pub catalog: CatalogService,
    pub overrides: Arc<dyn OverrideStore>,
    pub engine: Arc<dyn Engine>,
    pub proxy: StreamProxy,
    pub redis: Option<RedisService>,
    pub start_time: Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "acestream_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Load configuration
    let config = Config::from_env();
    let port = config.port;

    tracing::info!("Starting AceStream Proxy v{}", env!("CARGO_PKG_VERSION"));
    if config.sources.is_empty() {
        tracing::warn!("SOURCES is empty, the catalog will have no channels");
    }
    for source in &config.sources {
        tracing::info!("Source #{} {}: {}", source.ordinal, source.label, source.url);
    }

    // Override store: PostgreSQL when configured, in-memory otherwise
    let overrides: Arc<dyn OverrideStore> = match &config.database_url {
        Some(database_url) => {
            let pool = create_pool(database_url, config.db_max_connections).await?;
            run_migrations(&pool).await?;
            tracing::info!("Override store: PostgreSQL");
            Arc::new(PgOverrideStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, overrides are kept in memory only");
            Arc::new(MemoryOverrideStore::new())
        }
    };

    // Redis is only a cache tier, the service runs without it
    let redis = match &config.redis_url {
        Some(redis_url) => match RedisService::new(redis_url).await {
            Ok(redis) => {
                tracing::info!("Redis connected: {}", redis_url);
                Some(redis)
            }
            Err(e) => {
                tracing::warn!("Redis unavailable ({}), using in-process fetch cache only", e);
                None
            }
        },
        None => None,
    };

    let fetcher = HttpFetcher::new(&config, redis.clone())?;
    let catalog = CatalogService::new(
        Arc::new(fetcher),
        overrides.clone(),
        config.sources.clone(),
        config.base_url.clone(),
        config.transcode_audio.clone(),
    );

    let engine: Arc<dyn Engine> = Arc::new(AceEngine::new(&config.engine_url, config.engine_timeouts)?);
    let proxy = StreamProxy::new(engine.clone(), config.relay_write_timeout);
    tracing::info!(
        "Engine at {} (start timeout {:?}, write timeout {:?})",
        config.engine_url,
        config.engine_timeouts.start,
        config.relay_write_timeout
    );

    // Build application state
    let state = Arc::new(AppState {
        config,
        catalog,
        overrides,
        engine,
        proxy,
        redis,
        start_time: Instant::now(),
    });

    let app = routes::router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
