use std::sync::Arc;

use anyhow::Context;
use pairchat::{
    AppState, app,
    config::Config,
    db,
    hub::Hub,
    logging,
    rooms::{LocalRouter, RoomRouter},
    store::SqliteStore,
};
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, cookie::SameSite};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    logging::init_logging(&config.log_level, config.log_format)?;

    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(config.session_expiry_minutes)));

    let db_pool = db::connect(&config.database_url, config.db_max_connections)
        .await
        .context("opening database")?;

    let hub = Hub::new(SqliteStore::new(db_pool), room_router(&config).await?)
        .with_clock(config.clock())
        .with_limits(config.limits());

    let app = app(AppState { hub }).layer(session_layer);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn room_router(config: &Config) -> anyhow::Result<Arc<dyn RoomRouter>> {
    match &config.redis_url {
        #[cfg(feature = "redis")]
        Some(url) => {
            let router = pairchat::rooms::RedisRouter::connect(url)
                .await
                .context("connecting to redis")?;
            Ok(Arc::new(router))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => {
            tracing::warn!("REDIS_URL is set but redis support is not compiled in, using the in-process router");
            Ok(Arc::new(LocalRouter::new()))
        }
        None => Ok(Arc::new(LocalRouter::new())),
    }
}
