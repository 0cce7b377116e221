use std::net::SocketAddr;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use energy_market_engine::config::{Config, LogFormat};
use energy_market_engine::{router, startup};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file first
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.log_format);
    info!("Loaded configuration for environment: {}", config.environment);

    let app_state = startup::initialize_app(&config).await?;
    startup::spawn_background_tasks(&app_state).await;

    let app = router::build_router(app_state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🌐 Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(startup::shutdown_signal())
        .await?;

    startup::shutdown(&app_state).await;
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "energy_market_engine=debug,tower_http=info".into());

    match format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}
