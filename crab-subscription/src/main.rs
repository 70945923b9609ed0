//! crab-subscription service entry point

use std::time::Duration;

use crab_subscription::api;
use crab_subscription::config::Config;
use crab_subscription::sinks::NotificationWorker;
use crab_subscription::state::AppState;
use tokio_util::sync::CancellationToken;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Upper bound on flushing queued notifications at shutdown
const NOTIFY_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crab_subscription=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;

    tracing::info!("Starting crab-subscription (env: {})", config.environment);

    let shutdown = CancellationToken::new();
    let (state, notify_rx) = AppState::new(&config, shutdown.clone()).await?;

    let notify_handle = tokio::spawn(NotificationWorker.run(notify_rx));
    let reconcile_handle = tokio::spawn(state.reconciler.clone().run());

    let app = api::create_router(state);

    let http_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&http_addr).await?;
    tracing::info!("crab-subscription HTTP listening on {http_addr}");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {e}");
            }
            tracing::info!("Shutdown signal received");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(e) = reconcile_handle.await {
        tracing::error!("Reconciler task failed: {e}");
    }
    // Router and reconciler are gone, so every sender is dropped and the
    // worker drains what is queued before it exits
    match tokio::time::timeout(NOTIFY_DRAIN_TIMEOUT, notify_handle).await {
        Ok(Err(e)) => tracing::error!("Notification worker failed: {e}"),
        Err(_) => tracing::warn!("Notification worker did not drain in time"),
        Ok(Ok(())) => {}
    }

    tracing::info!("crab-subscription stopped");
    Ok(())
}
