// AKIG - Web Server
// REST API with Axum, configured from the environment

use akig::api::{serve, AppState};
use akig::{ensure_default_agency, logging::init_logger, open_database, Config};
use anyhow::{Context, Result};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    init_logger(config.log_format, "akig=info,tower_http=info");

    info!("🌐 AKIG API server v{}", akig::VERSION);

    // Refuse to start without a usable signing secret
    config.require_jwt_secret()?;

    let conn = open_database(&config.database_url)
        .with_context(|| format!("failed to open database {}", config.database_url))?;
    ensure_default_agency(&conn)?;
    info!(database = %config.database_url, "database ready");

    let state = AppState::new(conn, config)?;
    serve(state).await.context("server error")?;
    Ok(())
}
