//! Walk through a full session against the in-memory devices.
//!
//! Run with `RUST_LOG=icostate=debug` for more detail, or set
//! `ICOSTATE_LOG_JSON=true` for JSON output.

use std::time::Duration;

use icostate_devices::mock::MockDevices;
use icostate_devices::{
    names, AdcConfiguration, IcoSystem, MacAddress, StreamingConfiguration, StreamingFrame,
    SystemConfig, SystemEvent,
};

fn init_logging() {
    let json_logging = std::env::var("ICOSTATE_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("icostate_devices=info,icostate_core=info")
    });

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let address: MacAddress = "08-6B-D7-01-DE-81".parse()?;
    let devices = MockDevices::new()
        .with_sensor_node(address, "Test-STH")
        .with_reset_polls(Some(2));

    let config = SystemConfig::from_env()?.with_reset_poll_interval(Duration::from_millis(50));
    let mut system = IcoSystem::with_config(devices.connector(), config);

    system.on(names::SENSOR_NODE_NAME, |event: SystemEvent| async move {
        tracing::info!("Sensor node name: {}", event.as_name().unwrap_or_default());
        anyhow::Ok(())
    });
    system.on(names::SENSOR_NODE_ADC_CONFIGURATION, |event: SystemEvent| async move {
        if let Some(adc) = event.as_adc_configuration() {
            tracing::info!("ADC configuration: {}", adc);
        }
        anyhow::Ok(())
    });
    system.on(names::SENSOR_NODE_MEASUREMENT_DATA, |event: SystemEvent| async move {
        if let Some(data) = event.as_measurement_data() {
            tracing::debug!(
                "Frame {} ({} lost so far, dataloss {:.3})",
                data.counter,
                data.frames_lost,
                data.dataloss
            );
        }
        anyhow::Ok(())
    });

    tracing::info!("State: {}", system.state());
    system.connect_hub().await?;
    system.reset_hub().await?;
    tracing::info!("State: {}", system.state());

    system.rename("Demo-STH", address).await?;

    system.connect_sensor_node(address).await?;
    tracing::info!("State: {}", system.state());
    system
        .set_adc_configuration(AdcConfiguration::new(2, 8, 64))
        .await?;

    system
        .start_measurement(StreamingConfiguration::new(true, false, true), None)
        .await?;

    // Frames 40 to 44 never arrive
    for counter in (0..100u8).filter(|c| !(40..45).contains(c)) {
        let timestamp = counter as f64 * 1.4;
        devices.send_frame(StreamingFrame::new(
            counter,
            timestamp,
            vec![timestamp.sin(), timestamp.cos()],
        ));
    }
    devices.end_stream();
    system.stop_measurement().await?;

    if let Some(buffer) = system.measurement() {
        tracing::info!(
            "Received {} frames, dataloss {:.3}, expected {:.1} Hz per channel",
            buffer.length(),
            buffer.dataloss(),
            buffer.expected_sample_rate()
        );
        for channel in buffer.configuration().enabled_channels() {
            if let Some(stats) = buffer.statistics(channel)? {
                tracing::info!(
                    "Channel {}: {} samples, min {:.3}, max {:.3}, avg {:.3}",
                    channel,
                    stats.count,
                    stats.min,
                    stats.max,
                    stats.avg
                );
            }
        }
    }

    system.disconnect_hub().await?;
    tracing::info!("State: {}", system.state());
    Ok(())
}
