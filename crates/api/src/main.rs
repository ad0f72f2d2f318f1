use anyhow::Context;

use almoner_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    almoner_observability::init(config.log_format);

    let app = almoner_api::app::build_app_from_config(&config)
        .await
        .context("failed to wire services")?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %listener.local_addr()?, persistent = config.persistent, "listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
