// SPDX-License-Identifier: GPL-3.0-only

use monitor_brightness::config::{JsonFileStore, SettingsStore};
use monitor_brightness::protocols::ddc_ci::DdcCiSource;
use monitor_brightness::service::BrightnessService;

#[macro_use]
extern crate tracing;

fn setup_logs() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    // ddc-hi reports through the `log` facade
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("failed to bridge log records: {}", e);
    }

    let fmt_layer = fmt::layer().with_target(false);
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new(format!(
        "warn,{}=warn",
        env!("CARGO_CRATE_NAME")
    )));

    if let Ok(journal_layer) = tracing_journald::layer() {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .with(journal_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logs();

    let store = JsonFileStore::default_location()?;
    info!("Using settings at {}", store.path().display());
    // Write defaults on first run so presets can be edited by hand
    if !store.path().exists() {
        if let Err(e) = store.save(&store.load()) {
            warn!("Failed to write default settings: {}", e);
        }
    }

    let (handle, task) = BrightnessService::new(Box::new(DdcCiSource::new()), store).spawn();

    #[cfg(feature = "hotplug")]
    if let Err(e) = monitor_brightness::hotplug::spawn_watcher(handle.clone()) {
        error!("Failed to start hotplug watcher: {}", e);
    }

    match handle.refresh(false).await {
        Ok(_) => {
            for monitor in handle.snapshot().await? {
                match &monitor.last_error {
                    None => info!(
                        "{} ({}): {}% [{}-{}]",
                        monitor.display_label,
                        monitor.device_id,
                        monitor.current_brightness,
                        monitor.min_brightness,
                        monitor.max_brightness
                    ),
                    Some(err) => warn!("{} ({}): {}", monitor.display_label, monitor.device_id, err),
                }
            }
        }
        Err(e) => warn!("No displays found: {}", e),
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    handle.shutdown()?;
    task.await?;
    Ok(())
}
