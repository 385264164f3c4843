mod api;
mod bootstrap;
mod catalog;
mod contracts;
mod crm;
mod dashboard;
mod finance;
mod health;
mod inventory;
mod marketing;
mod operations;
mod purchasing;
mod web;

use std::time::Duration;

use anyhow::Result;
use opsdesk_core::config::{AppConfig, LoadOptions};
use tracing::{info, warn};

fn init_logging(config: &AppConfig) {
    use opsdesk_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    // Now bootstrap using the same config we already loaded
    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
    )
    .await?;

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "opsdesk server listening"
    );

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs.max(1));
    let state = web::AppState {
        db_pool: app.db_pool.clone(),
        templates: web::init_templates(),
        config: app.config.clone(),
        mailer: app.mailer.clone(),
    };
    let (drain_tx, drain_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, web::router(state)).with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = drain_tx.send(());
    });

    tokio::select! {
        result = server => result?,
        _ = async {
            // Arms only after the shutdown signal has been seen.
            let _ = drain_rx.await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(
                event_name = "system.server.drain_timeout",
                correlation_id = "shutdown",
                "open connections did not drain within the grace period"
            );
        }
    }

    info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "opsdesk server stopping"
    );

    Ok(())
}
