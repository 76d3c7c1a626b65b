use anyhow::Context;

use einvoice_api::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    einvoice_observability::init();

    let config = Config::from_env().context("invalid configuration")?;
    let (app, worker) = einvoice_api::app::build_app(&config).await?;
    let worker = worker.start();

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    worker.shutdown().await;
    tracing::info!("poll worker stopped");
    served.context("server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
