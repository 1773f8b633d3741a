use anyhow::Context;

use compliance_api::{
    app,
    config::AppConfig,
    state::AppState,
    telemetry::{self, LogFormat},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing(LogFormat::from_env())?;

    let config = AppConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        backend = config.database.backend.as_str(),
        jwt_alg = ?config.jwt.algorithm,
        ttl_minutes = config.jwt.ttl_minutes,
        "configuration loaded"
    );

    let state = AppState::init(config).await?;
    let addr = state.config.bind_addr;

    app::serve(app::build_app(state.clone()), addr).await?;

    state.db.close().await;
    Ok(())
}
