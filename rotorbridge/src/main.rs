mod bus;
mod calibration;
mod cat_ft817;
mod cat_service;
mod config;
mod coordinator;
mod error;
mod event_receiver;
mod protocol_session;
mod rig_protocol_server;
mod rot_protocol_server;
mod rotator_client;
mod rotator_service;
mod worker;

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use config::Config;
use coordinator::Coordinator;

/// Path to the settings file, overridable via `ROTORBRIDGE_CONFIG` so the
/// binary isn't pinned to a hardcoded location (§10.3).
fn settings_path() -> PathBuf {
    std::env::var("ROTORBRIDGE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("rotorbridge.ini"))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "rotorbridge=info".into()),
        )
        .init();

    info!("rotorbridge v{} starting", env!("CARGO_PKG_VERSION"));

    let config_path = settings_path();
    let config = Config::load(&config_path);
    let calibration_path = PathBuf::from(&config.calibration_file);

    let coordinator = match Coordinator::new(config, calibration_path).await {
        Ok(coordinator) => coordinator,
        Err(e) => {
            error!("failed to start: {e:#}");
            std::process::exit(1);
        }
    };

    // The tracker and operator surfaces are the two hamlib servers, always
    // listening once the process is up; CAT keying and rotator polling are
    // gated behind their own enable calls so an operator surface (not yet
    // built here) can toggle them independently (§4.7, §7 point 4).
    coordinator.enable_rotator_tracking().await;
    coordinator.enable_rig_tracking().await;
    coordinator.enable_cat().await;

    let tick_token = CancellationToken::new();
    let tick_handle = tokio::spawn(coordinator.clone().run(tick_token.clone()));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!("failed to listen for shutdown signal: {e}"),
    }

    tick_token.cancel();
    let _ = tick_handle.await;
    coordinator.shutdown().await;
    info!("rotorbridge stopped");
}
