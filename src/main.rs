use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use rentxpert::config::{Cli, Config};
use rentxpert::external::{
    FcmPushNotifier, HttpIdentityProvider, HttpMediaStore, PaymongoGateway, ServiceAccountKey,
};
use rentxpert::state::AppState;
use rentxpert::{db, routes, sweepers};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; real deployments set the environment directly.
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;
    config.validate()?;

    // Staging directory for multipart uploads
    std::fs::create_dir_all(config.uploads_path())?;

    // Initialize database
    let pool = db::create_pool(&config.db_path())?;
    db::run_migrations(&pool)?;
    tracing::info!("Database: {}", config.db_path().display());
    if let Some(tz) = &config.database.timezone {
        tracing::info!("DB_TIMEZONE={} noted; timestamps are stored in UTC", tz);
    }

    // Outbound collaborators
    let client = reqwest::Client::builder()
        .user_agent(concat!("rentxpert/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let identity_file = config
        .identity
        .credentials_file
        .as_ref()
        .context("IDENTITY_CREDENTIALS_FILE is not set")?;
    let identity_key = ServiceAccountKey::from_file(identity_file)
        .with_context(|| format!("loading {}", identity_file.display()))?;
    let push_key = match config.push_credentials_file() {
        Some(path) if path != identity_file => ServiceAccountKey::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        _ => identity_key.clone(),
    };

    let state = AppState {
        db: pool,
        config: config.clone(),
        identity: Arc::new(HttpIdentityProvider::new(
            client.clone(),
            identity_key,
            config.identity.jwks_url.clone(),
            config.identity.api_base_url.clone(),
        )),
        media: Arc::new(HttpMediaStore::new(
            client.clone(),
            config.media.cloud_name.clone(),
            config.media.api_key.clone(),
            config.media.api_secret.clone(),
            config.media.api_base_url.clone(),
        )),
        push: Arc::new(FcmPushNotifier::new(
            client.clone(),
            push_key,
            config.push.api_base_url.clone(),
        )),
        payments: Arc::new(PaymongoGateway::new(
            client,
            config.payments.secret_key.clone(),
            config.payments.api_base_url.clone(),
        )),
    };

    // Background sweepers stop when the watch flips
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweepers = sweepers::spawn(&state, shutdown_rx);

    let app = routes::app(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("{} listening on http://{}", config.project_name, addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutting down");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    for handle in sweepers {
        let _ = handle.await;
    }
    Ok(())
}
