use anyhow::Context;

const ENV_CONFIG_PATH: &str = "ORDERFLOW_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    orderflow_observability::init();

    let path = std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| "orderflow.toml".to_string());
    let config = orderflow_infra::OrderflowConfig::load(&path)
        .with_context(|| format!("loading configuration from {path}"))?;

    let app = orderflow_api::app::build_app(&config).context("wiring workflow services")?;

    let listener = tokio::net::TcpListener::bind(config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
