use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use failover_shell::api;
use failover_shell::config::Settings;
use failover_shell::probe::HttpProber;
use failover_shell::{ConfigStore, ControllerOptions, FailoverController};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::INFO.into()))
        .with_ansi(true)
        .init();

    let settings = Settings::parse();

    let store = ConfigStore::new(&settings.state_path, settings.alternate_path());
    let config = store.load();
    let prober = HttpProber::new(settings.probe_timeout())
        .context("Failed to build HTTP client")?;

    let controller = Arc::new(FailoverController::new(
        store,
        config,
        Arc::new(prober),
        ControllerOptions::default(),
    ));

    let crash_controller = Arc::clone(&controller);
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        error!("Panic: {}. Attempting to save config...", info);
        if crash_controller.try_save_now() {
            info!("Config saved after panic");
        }
    }));

    let api_controller = Arc::clone(&controller);
    let api_port = settings.api_port;
    tokio::spawn(async move {
        if let Err(e) = api::start_server(api_port, api_controller).await {
            error!("Command API failed: {:#}", e);
        }
    });

    controller.mark_ready();
    match controller.get_current_url().await {
        Some(url) => info!(%url, "Displaying admin page"),
        None => error!("No server to display"),
    }
    controller.auto_failover_tick().await;
    controller.start_periodic_check().await;

    let safety_controller = Arc::clone(&controller);
    let safety_interval = settings.safety_save_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(safety_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = safety_controller.save_now().await {
                error!(error = %e, "Periodic config save failed");
            }
        }
    });

    signal::ctrl_c().await?;
    info!("Shutdown signal received. Saving final state...");

    controller.stop_periodic_check().await;
    match controller.save_now().await {
        Ok(()) => info!("Final config saved"),
        Err(e) => error!(error = %e, "Final config save failed"),
    }

    Ok(())
}
