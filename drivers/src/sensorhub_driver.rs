use anyhow::{Result, bail};
use std::time::Duration;
use tokio::signal;

mod driver_logic;
use driver_logic::config::DriverKind;
use driver_logic::{config, logger, runner};
use lib_sensorhub::SensorDriver;
use lib_sensorhub::drivers::{MavlinkSetup, NexradSetup, PtzSetup};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let config = config::load_config();
    logger::setup_logging(&config.log_dir(), config.log_level())?;

    let Some(kind) = config.driver else {
        bail!("no driver selected; pass --driver ptz|nexrad|mavlink or set SENSORHUB_DRIVER");
    };
    let stats_interval = Duration::from_secs(config.stats_interval_seconds.unwrap_or(60).max(1));

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let shutdown_rx = shutdown_tx.subscribe();

    let mut driver_handle = tokio::spawn(async move {
        match kind {
            DriverKind::Ptz => {
                runner::run(SensorDriver::new(PtzSetup), config.ptz_config(), stats_interval, shutdown_rx).await
            }
            DriverKind::Nexrad => {
                runner::run(SensorDriver::new(NexradSetup::new()), config.nexrad_config(), stats_interval, shutdown_rx)
                    .await
            }
            DriverKind::Mavlink => {
                runner::run(SensorDriver::new(MavlinkSetup::tcp()), config.mavlink_config(), stats_interval, shutdown_rx)
                    .await
            }
        }
    });

    // Wait for shutdown signal, or for the driver to give up on its own
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Cannot listen for SIGTERM: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
        result = &mut driver_handle => {
            return result?;
        }
    }

    // Send shutdown signal to the driver task
    let _ = shutdown_tx.send(());
    driver_handle.await??;

    log::info!("Shutdown complete.");
    Ok(())
}
