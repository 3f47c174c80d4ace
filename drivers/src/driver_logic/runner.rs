use anyhow::{Context, Result};
use lib_sensorhub::{DriverSetup, DataEvent, SensorDriver, TextEncoding};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Runs one driver until `shutdown` fires: init, print every published
/// record as a text block, log loop statistics periodically, then stop.
pub async fn run<D: DriverSetup>(
    mut driver: SensorDriver<D>,
    driver_config: D::Config,
    stats_interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    driver.init(driver_config).await.context("driver initialization failed")?;

    let mut printers: Vec<JoinHandle<()>> = Vec::new();
    for output in driver.output_names() {
        if let Some(schema) = driver.get_record_schema(&output) {
            let fields: Vec<&str> = schema.fields().iter().map(|f| f.name.as_str()).collect();
            log::info!("Output {}: [{}]", output, fields.join(", "));
        }
        let Some(mut events) = driver.subscribe(&output) else {
            continue;
        };
        printers.push(tokio::spawn(async move {
            let encoding = TextEncoding::default();
            while let Some(event) = events.recv().await {
                print!("{}", format_event(&encoding, &event));
            }
        }));
    }

    driver.start().context("driver failed to start")?;

    let mut stats_timer = tokio::time::interval(stats_interval);
    stats_timer.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                log::info!("Shutdown requested, stopping driver.");
                break;
            }
            _ = stats_timer.tick() => {
                match serde_json::to_string(&driver.stats()) {
                    Ok(stats) => log::info!("Loop statistics: {}", stats),
                    Err(e) => log::warn!("Failed to serialize loop statistics: {}", e),
                }
            }
        }
    }

    driver.shutdown().await;
    for printer in printers {
        printer.abort();
    }
    log::info!("Driver stopped. Final statistics: {:?}", driver.stats());
    Ok(())
}

/// One printed line per record; the encoding already ends the block.
fn format_event(encoding: &TextEncoding, event: &DataEvent) -> String {
    format!("{} {} {}", event.output, event.time.to_rfc3339(), encoding.encode(&event.record))
}
