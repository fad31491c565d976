use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use vigil::config::{self, Config};
use vigil::health::new_health_checker;
use vigil::metrics::start_admin_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    // Load configuration
    let config = load_or_default_config();

    let shutdown = CancellationToken::new();
    let checker = new_health_checker(&config.health, shutdown.clone()).await?;

    info!(
        backend = checker.name(),
        local_host = %config.health.local_host,
        admin_addr = %config.server.admin_addr,
        "Vigil liveness service started"
    );

    let server = tokio::spawn({
        let checker = checker.clone();
        let shutdown = shutdown.clone();
        let addr = config.server.admin_addr.clone();
        async move { start_admin_server(&addr, checker, shutdown).await }
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutting down");
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Admin server failed"),
        Err(e) => error!(error = %e, "Admin server task panicked"),
    }
    Ok(())
}

fn load_or_default_config() -> Config {
    // Try to load from config file
    let config_paths = ["config/vigil.toml", "vigil.toml"];

    for path in config_paths {
        match config::load_config(path) {
            Ok(config) => {
                info!(path = path, "Loaded configuration");
                return config;
            }
            Err(e) => {
                warn!(path = path, error = %e, "Failed to load config");
            }
        }
    }

    info!("Using default configuration");
    Config::default()
}
