//! Stateful access to an ICOtronic hub (STU) and sensor node (STH).
//!
//! The [`IcoSystem`] guards every device operation by the current connection
//! [`State`](icostate_core::State), keeps the attributes read from the sensor
//! node and notifies registered listeners when they change. Streamed sensor
//! data is collected in a [`MeasurementBuffer`] that tracks dataloss.
//!
//! The transport itself is abstracted by the traits in [`adapter`]; the
//! [`mock`] module provides an in-memory implementation.
//!
//! ```no_run
//! use icostate_devices::mock::MockDevices;
//! use icostate_devices::{names, IcoSystem, MacAddress};
//!
//! # async fn run() -> icostate_devices::SystemResult<()> {
//! let address: MacAddress = "08-6B-D7-01-DE-81".parse().unwrap();
//! let devices = MockDevices::new().with_sensor_node(address, "Test-STH");
//! let mut system = IcoSystem::new(devices.connector());
//!
//! system.on(names::SENSOR_NODE_NAME, |event| async move {
//!     println!("Sensor node name: {:?}", event.as_name());
//!     anyhow::Ok(())
//! });
//!
//! system.connect_hub().await?;
//! system.connect_sensor_node(address).await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod error;
pub mod events;
pub mod measurement;
pub mod mock;
pub mod system;
pub mod types;

pub use adapter::{Connector, DeviceError, DeviceResult, FrameStream, Hub, SensorNode};
pub use error::{SystemError, SystemResult};
pub use events::{names, SystemEvent};
pub use measurement::{
    ChannelStatistics, ChannelValues, MeasurementBuffer, MeasurementData, MeasurementError,
    Sample,
};
pub use system::{IcoSystem, SystemEvents};
pub use types::{
    AdcConfiguration, Location, MacAddress, NodeState, OperatingState, StreamingConfiguration,
    StreamingFrame, MAX_NAME_LENGTH,
};

pub use icostate_core::{ListenerPolicy, State, SystemConfig};
