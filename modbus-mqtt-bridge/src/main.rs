//! Modbus TCP to MQTT bridge.
//!
//! Polls Modbus sensors and publishes their readings to an MQTT broker.

use anyhow::{Context, Result};
use tracing::{Instrument, info, info_span};

use fieldlink_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner, delivery};
use modbus_mqtt_bridge::acquisition::AcquisitionLoop;
use modbus_mqtt_bridge::config::ModbusBridgeConfig;
use modbus_mqtt_bridge::poller::{SensorPoller, TcpConnector};

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse_with_default("modbus-mqtt.json5");

    let config = ModbusBridgeConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    // Connects to the broker before anything is polled
    let mut runner = BridgeRunner::new_with_args("modbus-mqtt-bridge", config, Some(&args))
        .await
        .context("Failed to start bridge")?;

    let modbus = runner.config().modbus.clone();
    info!(
        sensors = modbus.sensors.len(),
        polling_interval_secs = modbus.polling_interval().as_secs(),
        timeout_secs = modbus.timeout().as_secs(),
        "Modbus config"
    );

    let poller = SensorPoller::new(
        TcpConnector,
        modbus.timeout(),
        modbus.failure_sentinel.as_str(),
        info_span!("poller"),
    );
    let interval = modbus.polling_interval();
    let acquisition =
        AcquisitionLoop::new(modbus.sensors, poller, interval, info_span!("acquisition"));

    let (tx, rx) = delivery::channel();

    let stop = runner.shutdown_signal();
    runner.spawn(async move {
        acquisition.run(tx, stop).await;
    });

    let publisher = runner.publisher();
    runner.spawn(
        async move {
            delivery::drain(rx, &publisher).await;
        }
        .instrument(info_span!("delivery")),
    );

    runner.run().await?;

    Ok(())
}
