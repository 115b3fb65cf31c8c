use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use herald_common::config::AppConfig;
use herald_common::db::create_pool;
use herald_engine::dispatch::DispatchEngine;
use herald_engine::store::PgConnector;
use herald_notifier::{DeliveryConfig, ResendClient};
use herald_worker::consumer::Consumer;
use herald_worker::health;
use herald_worker::queue::RedisQueue;
use herald_worker::trigger::TriggerAdapter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("herald_worker=info,herald_engine=info,herald_notifier=info")
        }))
        .json()
        .init();

    tracing::info!("Herald worker starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect to database
    let pool = create_pool(&config.database_url, config.db_max_connections).await?;

    // Email provider
    let delivery = ResendClient::new(DeliveryConfig::from_app_config(&config)?)?;

    let engine = DispatchEngine::new(Arc::new(PgConnector::new(pool.clone())), Arc::new(delivery))
        .with_concurrency(config.dispatch_concurrency);
    let trigger = Arc::new(TriggerAdapter::new(Arc::new(engine)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut consumers = JoinSet::new();
    for id in 0..config.worker_concurrency {
        let queue = RedisQueue::connect(&config).await?;
        let consumer = Consumer::new(id, queue, Arc::clone(&trigger), shutdown_rx.clone());
        consumers.spawn(consumer.run());
    }

    // Health endpoint
    let addr = SocketAddr::from(([0, 0, 0, 0], config.health_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = health::router(pool).layer(TraceLayer::new_for_http());
    let mut health_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = health_shutdown.changed().await;
            })
            .await
    });
    tracing::info!(
        %addr,
        queue = %config.queue_name,
        consumers = config.worker_concurrency,
        "Worker ready"
    );

    // Run until Ctrl+C / SIGTERM or until a consumer exits
    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("Received shutdown signal, finishing in-flight messages...");
        }
        _ = consumers.join_next() => {
            tracing::error!("Consumer exited unexpectedly, shutting down");
        }
    }

    let _ = shutdown_tx.send(true);
    while consumers.join_next().await.is_some() {}
    server.await??;

    tracing::info!("Herald worker stopped.");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
