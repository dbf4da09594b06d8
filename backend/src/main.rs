//! Water Conditions Service - Backend Server
//!
//! Runs the refresh scheduler and the widget API in one process.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use water_conditions_backend::{
    clock::{Clock, SystemClock},
    config::{Config, LogFormat, StorageBackend},
    create_app,
    external::{WeatherClient, WeatherSource},
    services::{
        CacheStore, ConditionsService, LocationRegistry, MemoryStore, PgCacheStore,
        PgLocationRegistry, PgRefreshStateStore, RefreshCoordinator, RefreshScheduler,
        RefreshSettings, RefreshStateStore,
    },
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    // Initialize tracing
    init_tracing(config.logging.format);

    tracing::info!("Starting Water Conditions Server");
    tracing::info!("Environment: {}", config.environment);

    let (registry, cache, states) = connect_storage(&config).await?;

    if config.weather.api_key.is_empty() {
        tracing::warn!("weather.api_key is empty; provider calls will be rejected");
    }
    let source: Arc<dyn WeatherSource> = Arc::new(
        WeatherClient::with_base_url(
            config.weather.api_key.clone(),
            config.weather.api_endpoint.clone(),
            config.weather.timeout(),
        )
        .context("failed to build weather client")?,
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let coordinator = Arc::new(RefreshCoordinator::new(
        source,
        Arc::clone(&cache),
        Arc::clone(&states),
        Arc::clone(&clock),
        RefreshSettings::from_config(&config),
    ));

    let scheduler = RefreshScheduler::new(
        Arc::clone(&coordinator),
        states,
        clock,
        config.scheduler.clone(),
    );

    let conditions = Arc::new(ConditionsService::new(registry, cache, coordinator));

    // Create application state
    let state = AppState {
        conditions,
        config: Arc::new(config.clone()),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler_shutdown = shutdown_rx.clone();
    let scheduler_task = tokio::spawn(async move { scheduler.run(scheduler_shutdown).await });

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(err) => tracing::error!(error = %err, "Failed to listen for shutdown signal"),
        }
        let _ = shutdown_tx.send(true);
    });

    // Build application
    let app = create_app(state);

    // Start server
    let host: std::net::IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("invalid server.host '{}'", config.server.host))?;
    let addr = SocketAddr::from((host, config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let mut server_shutdown = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    if let Err(err) = scheduler_task.await {
        tracing::error!(error = %err, "Scheduler task ended abnormally");
    }

    tracing::info!("Server stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "conditions_server=debug,water_conditions_backend=debug,tower_http=debug,sqlx=warn".into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

type Stores = (
    Arc<dyn LocationRegistry>,
    Arc<dyn CacheStore>,
    Arc<dyn RefreshStateStore>,
);

async fn connect_storage(config: &Config) -> anyhow::Result<Stores> {
    match config.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; registry starts empty and nothing persists");
            let store = Arc::new(MemoryStore::new());
            let registry: Arc<dyn LocationRegistry> = store.clone();
            let cache: Arc<dyn CacheStore> = store.clone();
            let states: Arc<dyn RefreshStateStore> = store;
            Ok((registry, cache, states))
        }
        StorageBackend::Postgres => {
            // Create database connection pool
            tracing::info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .min_connections(config.database.min_connections)
                .acquire_timeout(Duration::from_secs(30))
                .connect(&config.database.url)
                .await?;

            tracing::info!("Database connection established");

            // Run migrations in development
            if config.environment == "development" {
                tracing::info!("Running database migrations...");
                sqlx::migrate!("./migrations").run(&db_pool).await?;
                tracing::info!("Migrations completed");
            }

            let registry: Arc<dyn LocationRegistry> =
                Arc::new(PgLocationRegistry::new(db_pool.clone()));
            let cache: Arc<dyn CacheStore> = Arc::new(PgCacheStore::new(db_pool.clone()));
            let states: Arc<dyn RefreshStateStore> = Arc::new(PgRefreshStateStore::new(db_pool));
            Ok((registry, cache, states))
        }
    }
}
