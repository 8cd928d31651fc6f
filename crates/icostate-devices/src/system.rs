//! Stateful access to an ICOtronic system.
//!
//! [`IcoSystem`] owns the connection state, the hub and sensor node handles
//! and the event registry. Every operation checks the current state first,
//! then delegates to the device library, commits the new state and cached
//! attributes, and finally notifies listeners.

use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use icostate_core::{ensure_state, Error, EventRegistry, Listener, State, SystemConfig};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::adapter::{Connector, FrameStream, Hub, SensorNode};
use crate::error::{SystemError, SystemResult};
use crate::events::{names, SystemEvent};
use crate::measurement::MeasurementBuffer;
use crate::types::{
    AdcConfiguration, MacAddress, NodeState, StreamingConfiguration, StreamingFrame,
    MAX_NAME_LENGTH,
};

/// Event registry of an [`IcoSystem`].
pub type SystemEvents = EventRegistry<SystemEvent>;

type SharedSensorNode = Arc<tokio::sync::Mutex<Box<dyn SensorNode>>>;
type SharedBuffer = Arc<Mutex<MeasurementBuffer>>;

const HUB_ONLY: &[State] = &[State::HubConnected];
const SENSOR_NODE_ONLY: &[State] = &[State::SensorNodeConnected];
const AT_LEAST_HUB: &[State] = &[State::HubConnected, State::SensorNodeConnected];

/// Attributes read from the connected sensor node.
#[derive(Debug, Clone, Default)]
struct SensorNodeAttributes {
    name: Option<String>,
    mac_address: Option<MacAddress>,
}

/// Background task forwarding frames into the measurement buffer.
struct StreamingTask {
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<SystemResult<()>>,
}

/// Stateful access to a hub and one sensor node.
pub struct IcoSystem {
    config: SystemConfig,
    state: State,
    connector: Box<dyn Connector>,
    hub: Option<Box<dyn Hub>>,
    sensor_node: Option<SharedSensorNode>,
    attributes: SensorNodeAttributes,
    events: SystemEvents,
    measurement: Option<SharedBuffer>,
    streaming: Option<StreamingTask>,
}

impl IcoSystem {
    /// Create a disconnected system using the default configuration.
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self::with_config(connector, SystemConfig::default())
    }

    /// Create a disconnected system after validating `config`.
    pub fn try_with_config(
        connector: impl Connector + 'static,
        config: SystemConfig,
    ) -> SystemResult<Self> {
        config.validate()?;
        Ok(Self::with_config(connector, config))
    }

    /// Create a disconnected system.
    ///
    /// An invalid `config` is reported by the operations that depend on it.
    pub fn with_config(connector: impl Connector + 'static, config: SystemConfig) -> Self {
        let events = EventRegistry::with_policy(config.listener_policy);
        Self {
            config,
            state: State::Disconnected,
            connector: Box::new(connector),
            hub: None,
            sensor_node: None,
            attributes: SensorNodeAttributes::default(),
            events,
            measurement: None,
            streaming: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn events(&self) -> &SystemEvents {
        &self.events
    }

    /// Register `listener` for the event called `event`.
    ///
    /// Returns the registered listener.
    pub fn on<F, Fut>(&self, event: &str, listener: F) -> Listener<SystemEvent>
    where
        F: Fn(SystemEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.events.register(event, listener)
    }

    /// Cached name of the connected sensor node.
    pub fn sensor_node_name(&self) -> Option<&str> {
        self.attributes.name.as_deref()
    }

    /// Cached hardware address of the connected sensor node.
    pub fn sensor_node_mac_address(&self) -> Option<MacAddress> {
        self.attributes.mac_address
    }

    /// Whether the handles match the current state.
    pub fn handles_consistent(&self) -> bool {
        self.hub.is_some() == self.state.hub_connected()
            && self.sensor_node.is_some() == self.state.sensor_node_connected()
    }

    /// Whether frames are currently being forwarded.
    pub fn is_measuring(&self) -> bool {
        self.streaming
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Snapshot of the current or last measurement.
    ///
    /// The buffer of a stopped measurement stays available until the next
    /// measurement starts.
    pub fn measurement(&self) -> Option<MeasurementBuffer> {
        self.measurement.as_ref().map(|buffer| buffer.lock().clone())
    }

    // ========== Hub ==========

    /// Connect to the hub.
    ///
    /// An existing hub connection is reused.
    pub async fn connect_hub(&mut self) -> SystemResult<()> {
        if self.hub.is_none() {
            tracing::info!("Connecting to STU");
            let hub = self.connector.connect().await?;
            self.hub = Some(hub);
        }
        if self.state < State::HubConnected {
            self.state = State::HubConnected;
        }
        tracing::debug!("State: {}", self.state);
        Ok(())
    }

    /// Disconnect from the hub, disconnecting the sensor node first.
    pub async fn disconnect_hub(&mut self) -> SystemResult<()> {
        if self.sensor_node.is_some() {
            self.disconnect_sensor_node().await?;
        }

        if let Some(hub) = self.hub.as_mut() {
            tracing::info!("Disconnecting from STU");
            hub.disconnect().await?;
            self.hub = None;
        }
        self.state = State::Disconnected;
        Ok(())
    }

    /// Reset the hub and wait until it reports that it is operating again.
    pub async fn reset_hub(&mut self) -> SystemResult<()> {
        const OPERATION: &str = "Resetting STU";
        ensure_state(OPERATION, self.state, HUB_ONLY)?;
        self.config.validate()?;

        let interval = self.config.reset_poll_interval();
        let timeout = self.config.reset_timeout();
        let warn_after = self.config.reset_warn_after_polls;
        let state = self.state;
        let hub = self
            .hub
            .as_mut()
            .ok_or_else(|| Error::incorrect_state(OPERATION, state, HUB_ONLY))?;

        tracing::info!("Resetting STU");
        hub.reset().await?;

        let operating = NodeState::operating();
        let started = Instant::now();
        let mut polls: u32 = 0;
        loop {
            let current = hub.get_state().await?;
            if current == operating {
                break;
            }

            polls += 1;
            if polls % warn_after == 0 {
                tracing::warn!(
                    "STU still not operating after reset ({} polls, state: {})",
                    polls,
                    current
                );
            }
            if let Some(timeout) = timeout {
                if started.elapsed() >= timeout {
                    return Err(SystemError::ResetTimeout {
                        timeout,
                        last_state: current,
                    });
                }
            }
            tokio::time::sleep(interval).await;
        }

        tracing::info!("STU operating again after reset");
        Ok(())
    }

    // ========== Sensor node ==========

    /// Connect to the sensor node with hardware address `address`.
    pub async fn connect_sensor_node(&mut self, address: MacAddress) -> SystemResult<()> {
        const OPERATION: &str = "Connecting to sensor node";
        ensure_state(OPERATION, self.state, HUB_ONLY)?;

        let state = self.state;
        let hub = self
            .hub
            .as_mut()
            .ok_or_else(|| Error::incorrect_state(OPERATION, state, HUB_ONLY))?;

        tracing::info!("Connecting to sensor node {}", address);
        let mut node = hub.connect_sensor_node(address).await?;

        let attributes = match read_attributes(node.as_mut()).await {
            Ok(attributes) => attributes,
            Err(e) => {
                if let Err(disconnect_error) = node.disconnect().await {
                    tracing::warn!(
                        "Failed to disconnect sensor node {} after error: {}",
                        address,
                        disconnect_error
                    );
                }
                return Err(e);
            }
        };

        let name = attributes.name.clone().unwrap_or_default();
        let mac_address = attributes.mac_address.unwrap_or(address);
        self.sensor_node = Some(Arc::new(tokio::sync::Mutex::new(node)));
        self.attributes = attributes;
        self.state = State::SensorNodeConnected;
        tracing::info!("Connected to sensor node '{}' ({})", name, mac_address);

        self.emit(SystemEvent::SensorNodeName(name)).await?;
        self.emit(SystemEvent::SensorNodeMacAddress(mac_address))
            .await?;
        Ok(())
    }

    /// Disconnect from the sensor node.
    ///
    /// Does nothing when no sensor node is connected. A running measurement
    /// is stopped first.
    pub async fn disconnect_sensor_node(&mut self) -> SystemResult<()> {
        if self.state < State::SensorNodeConnected {
            return Ok(());
        }

        if self.streaming.is_some() {
            if let Err(e) = self.finish_measurement().await {
                tracing::warn!("Measurement ended with error during disconnect: {}", e);
            }
        }

        if let Some(node) = self.sensor_node.as_ref() {
            tracing::info!("Disconnecting from sensor node");
            node.lock().await.disconnect().await?;
        }
        self.sensor_node = None;
        self.attributes = SensorNodeAttributes::default();
        self.state = State::HubConnected;
        Ok(())
    }

    /// Rename the sensor node with hardware address `address`.
    ///
    /// If no sensor node is connected, the node is connected for the rename
    /// and disconnected again afterwards. Returns the name read back from
    /// the node.
    pub async fn rename(&mut self, name: &str, address: MacAddress) -> SystemResult<String> {
        const OPERATION: &str = "Renaming sensor node";
        ensure_state(OPERATION, self.state, AT_LEAST_HUB)?;
        validate_name(name)?;

        let transient = self.state == State::HubConnected;
        // Listener failure of the implicit connect, reported after the rename
        let mut deferred = None;
        if !transient {
            if let Some(connected) = self.attributes.mac_address {
                if connected != address {
                    return Err(SystemError::SensorNodeMismatch {
                        connected,
                        requested: address,
                    });
                }
            }
        } else {
            match self.connect_sensor_node(address).await {
                Ok(()) => {}
                // Connection was committed before the listener failed
                Err(e) if self.state == State::SensorNodeConnected => deferred = Some(e),
                Err(e) => return Err(e),
            }
        }

        let renamed = self.rename_connected(name).await;

        let disconnected = if transient {
            self.disconnect_sensor_node().await
        } else {
            Ok(())
        };

        let first_error = match renamed {
            Ok(new_name) => match deferred {
                None => {
                    disconnected?;
                    return Ok(new_name);
                }
                Some(e) => e,
            },
            Err(e) => e,
        };
        if let Err(e) = disconnected {
            tracing::warn!("Failed to disconnect sensor node after rename: {}", e);
        }
        Err(first_error)
    }

    async fn rename_connected(&mut self, name: &str) -> SystemResult<String> {
        let node = self.sensor_node_handle("Renaming sensor node", AT_LEAST_HUB)?;
        let new_name = {
            let mut node = node.lock().await;
            tracing::info!("Renaming sensor node to '{}'", name);
            node.set_name(name).await?;
            node.get_name().await?
        };

        self.attributes.name = Some(new_name.clone());
        self.emit(SystemEvent::SensorNodeName(new_name.clone()))
            .await?;
        Ok(new_name)
    }

    /// Read the ADC configuration of the connected sensor node.
    pub async fn get_adc_configuration(&mut self) -> SystemResult<AdcConfiguration> {
        const OPERATION: &str = "Reading ADC configuration";
        ensure_state(OPERATION, self.state, SENSOR_NODE_ONLY)?;

        let node = self.sensor_node_handle(OPERATION, SENSOR_NODE_ONLY)?;
        let config = node.lock().await.get_adc_configuration().await?;
        tracing::debug!("ADC configuration: {}", config);

        self.emit(SystemEvent::SensorNodeAdcConfiguration(config))
            .await?;
        Ok(config)
    }

    /// Write the ADC configuration of the connected sensor node.
    pub async fn set_adc_configuration(&mut self, config: AdcConfiguration) -> SystemResult<()> {
        const OPERATION: &str = "Setting ADC configuration";
        ensure_state(OPERATION, self.state, SENSOR_NODE_ONLY)?;
        config
            .validate()
            .map_err(SystemError::InvalidAdcConfiguration)?;

        let node = self.sensor_node_handle(OPERATION, SENSOR_NODE_ONLY)?;
        node.lock().await.set_adc_configuration(&config).await?;
        tracing::info!("Set ADC configuration: {}", config);

        self.emit(SystemEvent::SensorNodeAdcConfiguration(config))
            .await?;
        Ok(())
    }

    // ========== Measurement ==========

    /// Start streaming the channels enabled in `config`.
    ///
    /// Every ingested frame is emitted as `sensor_node_measurement_data`.
    /// With a `runtime`, the measurement stops by itself after that duration.
    pub async fn start_measurement(
        &mut self,
        config: StreamingConfiguration,
        runtime: Option<Duration>,
    ) -> SystemResult<()> {
        const OPERATION: &str = "Starting measurement";
        ensure_state(OPERATION, self.state, SENSOR_NODE_ONLY)?;
        if self.is_measuring() {
            return Err(SystemError::MeasurementRunning);
        }
        if config.enabled_count() == 0 {
            return Err(SystemError::InvalidStreamingConfiguration(
                "at least one channel must be enabled".to_string(),
            ));
        }
        if self.streaming.is_some() {
            // Timed measurement that already ended on its own
            if let Err(e) = self.finish_measurement().await {
                tracing::warn!("Previous measurement ended with error: {}", e);
            }
        }

        let node = self.sensor_node_handle(OPERATION, SENSOR_NODE_ONLY)?;
        let (adc, stream) = {
            let mut node = node.lock().await;
            let adc = node.get_adc_configuration().await?;
            let stream = node.start_streaming(config).await?;
            (adc, stream)
        };

        let expected_sample_rate = adc.sample_rate() as f64 / config.enabled_count() as f64;
        let buffer: SharedBuffer =
            Arc::new(Mutex::new(MeasurementBuffer::new(config, expected_sample_rate)));
        let (stop_tx, stop_rx) = oneshot::channel();

        tracing::info!(
            "Starting measurement on channel(s) {:?} at {:.1} Hz per channel{}",
            config.enabled_channels(),
            expected_sample_rate,
            runtime
                .map(|r| format!(" for {:?}", r))
                .unwrap_or_default()
        );

        let handle = tokio::spawn(forward_frames(
            stream,
            Arc::clone(&buffer),
            self.events.clone(),
            node,
            stop_rx,
            runtime,
        ));

        self.measurement = Some(buffer);
        self.streaming = Some(StreamingTask {
            stop: Some(stop_tx),
            handle,
        });
        Ok(())
    }

    /// Stop the current measurement.
    ///
    /// Frames already received are still ingested. Returns the error that
    /// ended the measurement, if any.
    pub async fn stop_measurement(&mut self) -> SystemResult<()> {
        const OPERATION: &str = "Stopping measurement";
        ensure_state(OPERATION, self.state, SENSOR_NODE_ONLY)?;
        if self.streaming.is_none() {
            return Err(SystemError::NoActiveMeasurement);
        }
        self.finish_measurement().await
    }

    async fn finish_measurement(&mut self) -> SystemResult<()> {
        let Some(mut task) = self.streaming.take() else {
            return Ok(());
        };
        if let Some(stop) = task.stop.take() {
            // The task may already be gone after a timed measurement
            let _ = stop.send(());
        }

        let result = match task.handle.await {
            Ok(result) => result,
            Err(e) => Err(SystemError::Streaming(e.to_string())),
        };
        if let Some(buffer) = self.measurement.as_ref() {
            let buffer = buffer.lock();
            tracing::info!(
                "Measurement stopped: {} frame(s), dataloss {:.4}",
                buffer.length(),
                buffer.dataloss()
            );
        }
        result
    }

    // ========== Helpers ==========

    fn sensor_node_handle(
        &self,
        operation: &str,
        allowed: &[State],
    ) -> SystemResult<SharedSensorNode> {
        self.sensor_node
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| Error::incorrect_state(operation, self.state, allowed).into())
    }

    async fn emit(&self, event: SystemEvent) -> SystemResult<()> {
        self.events.emit(event.name(), event).await?;
        Ok(())
    }
}

impl Drop for IcoSystem {
    fn drop(&mut self) {
        if let Some(task) = self.streaming.as_ref() {
            task.handle.abort();
        }
    }
}

async fn read_attributes(node: &mut dyn SensorNode) -> SystemResult<SensorNodeAttributes> {
    let name = node.get_name().await?;
    let mac_address = node.get_mac_address().await?;
    Ok(SensorNodeAttributes {
        name: Some(name),
        mac_address: Some(mac_address),
    })
}

fn validate_name(name: &str) -> SystemResult<()> {
    let invalid = |reason: String| SystemError::InvalidName {
        name: name.to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("name must not be empty".to_string()));
    }
    let length = name.chars().count();
    if length > MAX_NAME_LENGTH {
        return Err(invalid(format!(
            "{length} characters, at most {MAX_NAME_LENGTH} allowed"
        )));
    }
    Ok(())
}

/// Forward frames from `stream` into `buffer` until stopped.
///
/// Ends when a stop is requested, the runtime elapses, the stream ends or
/// fails. Streaming on the sensor node is always stopped afterwards. After a
/// stop or an elapsed runtime, frames the stream already holds are still
/// ingested.
async fn forward_frames(
    mut stream: FrameStream,
    buffer: SharedBuffer,
    events: SystemEvents,
    node: SharedSensorNode,
    mut stop: oneshot::Receiver<()>,
    runtime: Option<Duration>,
) -> SystemResult<()> {
    let deadline = runtime.map(|runtime| Instant::now() + runtime);
    let timer = async move {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(timer);

    // Stop and runtime take precedence over a backlog of frames
    let (mut outcome, drain) = loop {
        let next = tokio::select! {
            biased;
            _ = &mut stop => break (Ok(()), true),
            _ = &mut timer => {
                tracing::info!("Measurement runtime elapsed");
                break (Ok(()), true);
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(frame)) => {
                if let Err(e) = forward_frame(&buffer, &events, &frame).await {
                    break (Err(e), false);
                }
            }
            Some(Err(e)) => break (Err(SystemError::from(e)), false),
            None => {
                tracing::debug!("Frame stream ended");
                break (Ok(()), false);
            }
        }
    };

    let stopped = node.lock().await.stop_streaming().await;

    if drain {
        let mut drained = 0usize;
        while let Some(Some(item)) = stream.next().now_or_never() {
            let forwarded = match item {
                Ok(frame) => forward_frame(&buffer, &events, &frame).await,
                Err(e) => Err(SystemError::from(e)),
            };
            if let Err(e) = forwarded {
                outcome = Err(e);
                break;
            }
            drained += 1;
        }
        if drained > 0 {
            tracing::debug!("Ingested {} queued frame(s) after stop", drained);
        }
    }
    drop(stream);

    outcome?;
    stopped?;
    Ok(())
}

/// Ingest `frame` and notify listeners; malformed or duplicate frames are
/// dropped.
async fn forward_frame(
    buffer: &SharedBuffer,
    events: &SystemEvents,
    frame: &StreamingFrame,
) -> SystemResult<()> {
    let ingested = buffer.lock().ingest(frame);
    match ingested {
        Ok(data) => {
            let event = SystemEvent::SensorNodeMeasurementData(data);
            events
                .emit(names::SENSOR_NODE_MEASUREMENT_DATA, event)
                .await?;
        }
        Err(e) => tracing::warn!("Dropping frame: {}", e),
    }
    Ok(())
}
