use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use btleplug::api::Manager as _;
use btleplug::platform::Manager;
use clap::Parser;
use log::{debug, error, info};

mod config;
mod console;
mod controller;
mod decoder;
mod error;
mod matcher;
mod messages;
mod mqtt;
mod radio;

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Scan for a named BLE device and report it over MQTT once it is close enough.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the target device name
    #[arg(long)]
    target_name: Option<String>,

    /// Override the RSSI threshold in dBm (matches must be strictly stronger)
    #[arg(long, allow_hyphen_values = true)]
    rssi_threshold: Option<i16>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    let config = config::AppConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let mut settings = config.scan_settings();
    if let Some(name) = args.target_name {
        settings.target_name = name;
    }
    if let Some(threshold) = args.rssi_threshold {
        settings.rssi_threshold = threshold;
    }
    debug!("Settings: {:?}", settings);

    let (mqtt_client, mut eventloop) = mqtt::MqttClient::new(&config.mqtt);
    let broker = mqtt_client.clone();
    let retry_delay = settings.reconnect_delay;
    let broker_task = tokio::task::spawn(async move {
        broker.event_loop(&mut eventloop, retry_delay).await;
    });

    let bt_manager = Manager::new().await.context("starting Bluetooth manager")?;

    // get the first bluetooth adapter
    let adapters = bt_manager.adapters().await?;
    let central = adapters
        .into_iter()
        .next()
        .ok_or(error::Error::NoAdapter)?;
    info!("BLE initialized");

    let radio = radio::BtleRadio::new(central, settings.scan_duration);
    let console = console::TableConsole::new(std::io::stdout());
    let mut core = controller::ScanController::new(
        radio,
        mqtt_client.clone(),
        mqtt_client.clone(),
        console,
        settings,
    );
    core.run().await;
    debug!("Controller finished in state {:?}", core.state());

    if let Err(err) = mqtt_client.disconnect().await {
        error!("Error disconnecting MQTT client: {}", err);
    }
    match tokio::time::timeout(DISCONNECT_TIMEOUT, broker_task).await {
        Ok(Err(err)) => error!("MQTT event loop task failed: {:?}", err),
        Err(_) => error!("Timed out waiting for MQTT disconnect"),
        Ok(Ok(())) => {}
    }

    Ok(())
}
