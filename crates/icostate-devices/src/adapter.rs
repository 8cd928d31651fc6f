//! Device library interface.
//!
//! The transport to the hardware is provided by an external library. This
//! module describes what the orchestration layer needs from it: a
//! [`Connector`] that opens the hub, the [`Hub`] itself, and the
//! [`SensorNode`] handle obtained through the hub. Implementations only
//! report failures; state bookkeeping happens in [`crate::IcoSystem`].

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

use crate::types::{
    AdcConfiguration, MacAddress, NodeState, StreamingConfiguration, StreamingFrame,
};

/// Result type for device library operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Failure reported by the device library.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Connection could not be established or was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// A request was sent but the response was missing or wrong
    #[error("Communication error: {0}")]
    Communication(String),

    /// No sensor node answered for the given address
    #[error("Sensor node not found: {0}")]
    NotFound(MacAddress),

    /// Operation timeout
    #[error("Operation timeout after {0}ms")]
    Timeout(u64),

    /// Malformed or unexpected protocol data
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Other error
    #[error("Device error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Raw inbound streaming frames.
pub type FrameStream = Pin<Box<dyn Stream<Item = DeviceResult<StreamingFrame>> + Send>>;

/// Opens the transport connection to the hub.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish the transport and return the hub handle.
    async fn connect(&self) -> DeviceResult<Box<dyn Hub>>;
}

/// Connected hub (STU).
#[async_trait]
pub trait Hub: Send + Sync {
    /// Close the transport connection.
    async fn disconnect(&mut self) -> DeviceResult<()>;

    /// Restart the hub; it becomes usable again once [`Hub::get_state`]
    /// reports [`NodeState::operating`].
    async fn reset(&mut self) -> DeviceResult<()>;

    /// Current operating status of the hub.
    async fn get_state(&mut self) -> DeviceResult<NodeState>;

    /// Connect to the sensor node with the given hardware address.
    async fn connect_sensor_node(
        &mut self,
        address: MacAddress,
    ) -> DeviceResult<Box<dyn SensorNode>>;
}

/// Sensor node (STH) connected through the hub.
#[async_trait]
pub trait SensorNode: Send + Sync {
    /// Close the connection to the sensor node.
    async fn disconnect(&mut self) -> DeviceResult<()>;

    async fn get_name(&mut self) -> DeviceResult<String>;

    async fn set_name(&mut self, name: &str) -> DeviceResult<()>;

    async fn get_mac_address(&mut self) -> DeviceResult<MacAddress>;

    async fn get_adc_configuration(&mut self) -> DeviceResult<AdcConfiguration>;

    async fn set_adc_configuration(&mut self, config: &AdcConfiguration) -> DeviceResult<()>;

    /// Start streaming the enabled channels.
    ///
    /// The returned stream yields frames until streaming is stopped or the
    /// connection fails.
    async fn start_streaming(
        &mut self,
        config: StreamingConfiguration,
    ) -> DeviceResult<FrameStream>;

    /// Stop streaming.
    async fn stop_streaming(&mut self) -> DeviceResult<()>;
}
