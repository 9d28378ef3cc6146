//! quantpilot - headless autonomous trading engine
//!
//! Runs the per-profile control loops, the supervision stack and the data
//! refreshers without any UI. State is pushed to subscribers of the event
//! bus; metrics render in Prometheus text format.
//!
//! Exit codes: 0 on clean shutdown, non-zero on configuration failure
//! (missing credentials) or a fatal venue failure at startup.

use anyhow::Result;
use quantpilot::application::system::Application;
use quantpilot::config::Config;
use tokio::sync::watch;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false).pretty();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("quantpilot {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: {} profile(s), autonomous={}, test_mode={}",
        config.profiles.len(),
        config.autonomous_trading,
        config.test_mode_enabled
    );

    let app = Application::build(config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    app.run(shutdown_rx).await?;
    info!("quantpilot stopped cleanly");
    Ok(())
}
