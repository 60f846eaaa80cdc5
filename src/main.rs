use anyhow::{Context, Result};
use tracing::{info, Level};

use pail::{build_router, config::Config, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting pail object storage gateway...");

    let config = Config::from_env()?;
    tokio::fs::create_dir_all(&config.storage_root)
        .await
        .context("Failed to create storage root directory")?;
    info!(
        "storage root: {} | {} allowed access key(s) | max request size: {} bytes",
        config.storage_root.display(),
        config.allowed_access_keys.len(),
        config.max_request_size
    );

    let state = AppState::new(&config);
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind TCP listener")?;
    info!("Listening on http://{addr}");

    axum::serve(listener, app).await.context("Server failed")?;
    Ok(())
}
