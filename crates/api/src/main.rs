use std::sync::Arc;

use anyhow::Context;

use refundsync_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    refundsync_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let services = Arc::new(refundsync_api::app::services::build_services(&config).await?);

    let worker = services.spawn_outbox_worker();
    let app = refundsync_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    worker.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
