use anyhow::Context;
use meter_mqtt_bridge::{
    Bridge, BridgeConfig, MeterConfig, ModbusMeterReader, MqttConnector, TimeSeriesForwarder,
};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Starting meter MQTT bridge");
    let config = BridgeConfig::from_env().context("Loading bridge configuration")?;
    let meter = MeterConfig::from_env().context("Loading meter configuration")?;
    let connector = MqttConnector::new(&config.mqtt).context("Preparing MQTT client")?;

    let forwarder =
        TimeSeriesForwarder::new(config.sink).context("Preparing time-series client")?;
    if forwarder.is_enabled() {
        info!("Mirroring readings to the time-series sink");
    } else {
        info!("No time-series sink configured");
    }

    // Source events flow through a channel so the bridge handles them one at a time
    let (events_tx, events_rx) = mpsc::channel(128);
    ModbusMeterReader::new(meter, events_tx).spawn();

    let bridge = Bridge::new(connector, config.topics, forwarder);
    bridge.run(events_rx).await;

    Ok(())
}
