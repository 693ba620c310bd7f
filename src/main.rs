// src/main.rs

use std::process;
use std::sync::Arc;
use std::time::Duration;

use socialfeed::config::{Config, DataProvider};
use socialfeed::routes;
use socialfeed::scheduler::Scheduler;
use socialfeed::state::AppState;
use socialfeed::store::{Store, postgrest::PostgrestStore};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load configuration (.env, optional config file, environment)
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };

    let file_appender = tracing_appender::rolling::daily("logs", "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));
    let stdout_layer = fmt::layer().with_writer(std::io::stdout).with_target(false);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    // Initialize Tracing (Logging)
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    let store: Arc<dyn Store> = match config.data_provider {
        DataProvider::Supabase => match PostgrestStore::new(
            &config.store.url,
            &config.store.service_key,
            config.store.pool_size,
            Duration::from_secs(config.store.timeout_secs),
        ) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::error!("Failed to create store client: {}", e);
                process::exit(1);
            }
        },
    };
    tracing::info!(url = %config.store.url, pool_size = config.store.pool_size, "Store client ready");

    let state = match AppState::new(config.clone(), store.clone()) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Failed to initialize application state: {}", e);
            process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();

    let mut jobs = Vec::new();
    if config.scheduler.enabled {
        match config.scheduler.offset() {
            Ok(offset) => {
                jobs = Scheduler::standard(&config.scheduler, offset, store, state.scorer.clone())
                    .spawn(shutdown.clone());
                tracing::info!(jobs = jobs.len(), "Scheduler started");
            }
            Err(e) => tracing::error!("Scheduler disabled: {}", e),
        }
    }

    // Create the Axum application router
    let app = routes::create_router(state);

    let listener = match tokio::net::TcpListener::bind(&config.server.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", config.server.bind_addr, e);
            process::exit(1);
        }
    };
    tracing::info!("Listening on {}", config.server.bind_addr);

    let signal = shutdown.clone();
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutting down");
        signal.cancel();
    });
    if let Err(e) = serve.await {
        tracing::error!("Server error: {}", e);
    }

    shutdown.cancel();
    for job in jobs {
        let _ = job.await;
    }
}
