use anyhow::Context;

use gavel_api::app::{build_app, services::build_services};
use gavel_api::config::ApiConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gavel_observability::init();

    let config = ApiConfig::from_env().context("invalid configuration")?;
    let services = build_services(&config.store)
        .await
        .context("failed to initialise the auction store")?;
    tracing::info!(store = services.backend(), "services ready");

    let app = build_app(services, config.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
