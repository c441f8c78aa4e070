use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use pgws_api::app::{build_app, services::build_services};
use pgws_infra::RelayConfig;

#[tokio::main]
async fn main() {
    pgws_observability::init();

    if let Err(err) = run().await {
        tracing::error!(error = ?err, "pgws failed");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = RelayConfig::from_env().context("invalid configuration")?;
    let shutdown = CancellationToken::new();

    let services = Arc::new(
        build_services(&config, shutdown.clone())
            .await
            .context("failed to connect upstream")?,
    );
    let app = build_app(Arc::clone(&services), &config.ws_path);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        ws_path = %config.ws_path,
        channels = ?config.channels,
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("server error")?;

    services.shutdown().await;
    tracing::info!("stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
    shutdown.cancel();
}
