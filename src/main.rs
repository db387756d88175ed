use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use opportunity_radar::{
    config::Config,
    db::{MemoryStore, PgStore, ProjectStore},
    flows::default_registry,
    llm::ConfiguredLlmFactory,
    queue::{spawn_workers, FlowTask, TaskQueue},
    routes::create_router,
    search::SerpApiClient,
    status::{MemoryStatusStore, RedisStatusStore, StatusStore},
    utils::init_logger,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;
    let _log_guard = init_logger(&config.logging);
    info!("Configuration loaded: {:?}", config.server);

    // Project store
    let store: Arc<dyn ProjectStore> = if config.database.url.is_empty() {
        warn!("DATABASE_URL not set, projects are kept in memory");
        Arc::new(MemoryStore::new())
    } else {
        let pool = opportunity_radar::db::create_pool(&config.database).await?;

        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
        info!("Database migrations completed");

        Arc::new(PgStore::new(pool))
    };

    // Task status store
    let status: Arc<dyn StatusStore> = if config.redis.enabled {
        info!(url = %config.redis.url, "Using Redis status store");
        Arc::new(RedisStatusStore::new(&config.redis.url, config.redis.status_ttl_secs).await?)
    } else {
        Arc::new(MemoryStatusStore::new())
    };

    let search = SerpApiClient::from_config(&config.search);
    if search.is_none() {
        warn!("SERPAPI_API_KEY not set, search-backed flows will fail");
    }
    let registry = Arc::new(default_registry(search, store.clone()));
    info!(flows = ?registry.names(), "Flows registered");

    // Workers
    let task = FlowTask::new(
        registry,
        Arc::new(ConfiguredLlmFactory::new(config.llm.clone())),
        store.clone(),
        status.clone(),
    );
    let (queue, receiver) = TaskQueue::new(config.worker.queue_capacity, status.clone());
    let workers = spawn_workers(config.worker.concurrency, task, receiver);
    info!(count = workers.len(), "Workers started");

    let state = AppState {
        config: config.clone(),
        store,
        status,
        queue,
    };
    let app = create_router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
