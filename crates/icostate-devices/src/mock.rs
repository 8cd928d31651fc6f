//! In-memory device library.
//!
//! [`MockDevices`] simulates a hub with any number of sensor nodes and
//! implements the traits from [`crate::adapter`]. Tests drive the streaming
//! side by pushing frames with [`MockDevices::send_frame`], inject failures
//! with [`MockDevices::fail_next`] and inspect what the system asked the
//! devices to do through [`MockDevices::calls`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::adapter::{Connector, DeviceError, DeviceResult, FrameStream, Hub, SensorNode};
use crate::types::{
    AdcConfiguration, Location, MacAddress, NodeState, OperatingState, StreamingConfiguration,
    StreamingFrame,
};

/// Device operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    ConnectHub,
    DisconnectHub,
    Reset,
    GetState,
    ConnectSensorNode,
    DisconnectSensorNode,
    GetName,
    SetName,
    GetMacAddress,
    GetAdcConfiguration,
    SetAdcConfiguration,
    StartStreaming,
    StopStreaming,
}

/// Number of calls the mock received, per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCalls {
    pub hub_connects: usize,
    pub hub_disconnects: usize,
    pub resets: usize,
    pub state_polls: usize,
    pub sensor_node_connects: usize,
    pub sensor_node_disconnects: usize,
    pub streaming_starts: usize,
    pub streaming_stops: usize,
}

#[derive(Debug, Clone)]
struct MockSensorNodeData {
    name: String,
    adc: AdcConfiguration,
}

#[derive(Default)]
struct MockState {
    nodes: HashMap<MacAddress, MockSensorNodeData>,
    failures: HashMap<MockOperation, usize>,
    /// Polls after a reset before the hub reports operating, `None` for never
    reset_polls: Option<usize>,
    polls_since_reset: Option<usize>,
    frames: Option<mpsc::UnboundedSender<DeviceResult<StreamingFrame>>>,
    streaming: Option<StreamingConfiguration>,
    calls: MockCalls,
}

impl MockState {
    fn check(&mut self, operation: MockOperation) -> DeviceResult<()> {
        match self.failures.get_mut(&operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(DeviceError::Communication(format!(
                    "injected failure for {operation:?}"
                )))
            }
            _ => Ok(()),
        }
    }

    fn node(&mut self, address: MacAddress) -> DeviceResult<&mut MockSensorNodeData> {
        self.nodes
            .get_mut(&address)
            .ok_or(DeviceError::NotFound(address))
    }
}

/// Shared handle to the simulated devices.
#[derive(Clone)]
pub struct MockDevices {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevices {
    /// Create a hub without sensor nodes that is operating right after reset.
    pub fn new() -> Self {
        let state = MockState {
            reset_polls: Some(0),
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Add a sensor node with the default ADC configuration.
    pub fn with_sensor_node(self, address: MacAddress, name: &str) -> Self {
        self.state.lock().nodes.insert(
            address,
            MockSensorNodeData {
                name: name.to_string(),
                adc: AdcConfiguration::default(),
            },
        );
        self
    }

    /// Number of state polls after a reset before the hub is operating.
    ///
    /// `None` keeps the hub in its startup state forever.
    pub fn with_reset_polls(self, polls: Option<usize>) -> Self {
        self.state.lock().reset_polls = polls;
        self
    }

    /// Make the next call of `operation` fail.
    pub fn fail_next(&self, operation: MockOperation) {
        *self.state.lock().failures.entry(operation).or_default() += 1;
    }

    pub fn calls(&self) -> MockCalls {
        self.state.lock().calls
    }

    /// Current name of the sensor node at `address`.
    pub fn sensor_node_name(&self, address: MacAddress) -> Option<String> {
        self.state
            .lock()
            .nodes
            .get(&address)
            .map(|node| node.name.clone())
    }

    pub fn sensor_node_adc_configuration(&self, address: MacAddress) -> Option<AdcConfiguration> {
        self.state.lock().nodes.get(&address).map(|node| node.adc)
    }

    /// Configuration of the running stream, if any.
    pub fn streaming(&self) -> Option<StreamingConfiguration> {
        self.state.lock().streaming
    }

    /// Deliver `frame` to the running stream.
    ///
    /// Returns `false` if no stream is running.
    pub fn send_frame(&self, frame: StreamingFrame) -> bool {
        self.send(Ok(frame))
    }

    /// Make the running stream fail with `error`.
    pub fn send_error(&self, error: DeviceError) -> bool {
        self.send(Err(error))
    }

    /// End the running stream after the frames already sent.
    pub fn end_stream(&self) {
        self.state.lock().frames = None;
    }

    fn send(&self, item: DeviceResult<StreamingFrame>) -> bool {
        match self.state.lock().frames.as_ref() {
            Some(frames) => frames.send(item).is_ok(),
            None => false,
        }
    }

    /// Connector handing out hubs backed by these devices.
    pub fn connector(&self) -> MockConnector {
        MockConnector {
            devices: self.clone(),
        }
    }
}

/// [`Connector`] for [`MockDevices`].
#[derive(Clone)]
pub struct MockConnector {
    devices: MockDevices,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> DeviceResult<Box<dyn Hub>> {
        let mut state = self.devices.state.lock();
        state.check(MockOperation::ConnectHub)?;
        state.calls.hub_connects += 1;
        Ok(Box::new(MockHub {
            devices: self.devices.clone(),
        }))
    }
}

/// [`Hub`] for [`MockDevices`].
pub struct MockHub {
    devices: MockDevices,
}

#[async_trait]
impl Hub for MockHub {
    async fn disconnect(&mut self) -> DeviceResult<()> {
        let mut state = self.devices.state.lock();
        state.check(MockOperation::DisconnectHub)?;
        state.calls.hub_disconnects += 1;
        Ok(())
    }

    async fn reset(&mut self) -> DeviceResult<()> {
        let mut state = self.devices.state.lock();
        state.check(MockOperation::Reset)?;
        state.calls.resets += 1;
        state.polls_since_reset = Some(0);
        Ok(())
    }

    async fn get_state(&mut self) -> DeviceResult<NodeState> {
        let mut state = self.devices.state.lock();
        state.check(MockOperation::GetState)?;
        state.calls.state_polls += 1;

        let Some(polls) = state.polls_since_reset else {
            return Ok(NodeState::operating());
        };
        let ready = state.reset_polls.is_some_and(|needed| polls >= needed);
        if ready {
            state.polls_since_reset = None;
            Ok(NodeState::operating())
        } else {
            state.polls_since_reset = Some(polls + 1);
            Ok(NodeState::new(Location::Bootloader, OperatingState::Startup))
        }
    }

    async fn connect_sensor_node(
        &mut self,
        address: MacAddress,
    ) -> DeviceResult<Box<dyn SensorNode>> {
        let mut state = self.devices.state.lock();
        state.check(MockOperation::ConnectSensorNode)?;
        state.node(address)?;
        state.calls.sensor_node_connects += 1;
        Ok(Box::new(MockSensorNode {
            devices: self.devices.clone(),
            address,
        }))
    }
}

/// [`SensorNode`] for [`MockDevices`].
pub struct MockSensorNode {
    devices: MockDevices,
    address: MacAddress,
}

#[async_trait]
impl SensorNode for MockSensorNode {
    async fn disconnect(&mut self) -> DeviceResult<()> {
        let mut state = self.devices.state.lock();
        state.check(MockOperation::DisconnectSensorNode)?;
        state.calls.sensor_node_disconnects += 1;
        Ok(())
    }

    async fn get_name(&mut self) -> DeviceResult<String> {
        let mut state = self.devices.state.lock();
        state.check(MockOperation::GetName)?;
        Ok(state.node(self.address)?.name.clone())
    }

    async fn set_name(&mut self, name: &str) -> DeviceResult<()> {
        let mut state = self.devices.state.lock();
        state.check(MockOperation::SetName)?;
        state.node(self.address)?.name = name.to_string();
        Ok(())
    }

    async fn get_mac_address(&mut self) -> DeviceResult<MacAddress> {
        let mut state = self.devices.state.lock();
        state.check(MockOperation::GetMacAddress)?;
        state.node(self.address)?;
        Ok(self.address)
    }

    async fn get_adc_configuration(&mut self) -> DeviceResult<AdcConfiguration> {
        let mut state = self.devices.state.lock();
        state.check(MockOperation::GetAdcConfiguration)?;
        Ok(state.node(self.address)?.adc)
    }

    async fn set_adc_configuration(&mut self, config: &AdcConfiguration) -> DeviceResult<()> {
        let mut state = self.devices.state.lock();
        state.check(MockOperation::SetAdcConfiguration)?;
        state.node(self.address)?.adc = *config;
        Ok(())
    }

    async fn start_streaming(
        &mut self,
        config: StreamingConfiguration,
    ) -> DeviceResult<FrameStream> {
        let mut receiver = {
            let mut state = self.devices.state.lock();
            state.check(MockOperation::StartStreaming)?;
            if state.streaming.is_some() {
                return Err(DeviceError::Protocol("streaming already active".to_string()));
            }
            let (sender, receiver) = mpsc::unbounded_channel();
            state.frames = Some(sender);
            state.streaming = Some(config);
            state.calls.streaming_starts += 1;
            receiver
        };

        let stream = async_stream::stream! {
            while let Some(item) = receiver.recv().await {
                yield item;
            }
        };
        Ok(Box::pin(stream))
    }

    async fn stop_streaming(&mut self) -> DeviceResult<()> {
        let mut state = self.devices.state.lock();
        state.check(MockOperation::StopStreaming)?;
        state.frames = None;
        state.streaming = None;
        state.calls.streaming_stops += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    const NODE: MacAddress = MacAddress([0x08, 0x6B, 0xD7, 0x01, 0xDE, 0x81]);

    #[tokio::test]
    async fn test_unknown_sensor_node() {
        let devices = MockDevices::new();
        let mut hub = devices.connector().connect().await.unwrap();
        let result = hub.connect_sensor_node(NODE).await;
        assert!(matches!(result, Err(DeviceError::NotFound(address)) if address == NODE));
    }

    #[tokio::test]
    async fn test_injected_failure_applies_once() {
        let devices = MockDevices::new();
        devices.fail_next(MockOperation::ConnectHub);

        assert!(devices.connector().connect().await.is_err());
        assert!(devices.connector().connect().await.is_ok());
        assert_eq!(devices.calls().hub_connects, 1);
    }

    #[tokio::test]
    async fn test_reset_needs_polls() {
        let devices = MockDevices::new().with_reset_polls(Some(2));
        let mut hub = devices.connector().connect().await.unwrap();

        assert_eq!(hub.get_state().await.unwrap(), NodeState::operating());
        hub.reset().await.unwrap();
        assert_ne!(hub.get_state().await.unwrap(), NodeState::operating());
        assert_ne!(hub.get_state().await.unwrap(), NodeState::operating());
        assert_eq!(hub.get_state().await.unwrap(), NodeState::operating());
    }

    #[tokio::test]
    async fn test_stream_delivers_frames_until_ended() {
        let devices = MockDevices::new().with_sensor_node(NODE, "Test-STH");
        let mut hub = devices.connector().connect().await.unwrap();
        let mut node = hub.connect_sensor_node(NODE).await.unwrap();

        let mut stream = node
            .start_streaming(StreamingConfiguration::default())
            .await
            .unwrap();
        assert!(devices.send_frame(StreamingFrame::new(0, 0.0, vec![1.0])));
        assert!(devices.send_frame(StreamingFrame::new(1, 1.0, vec![2.0])));
        devices.end_stream();

        let frames: Vec<_> = stream.by_ref().collect().await;
        assert_eq!(frames.len(), 2);
        assert!(!devices.send_frame(StreamingFrame::new(2, 2.0, vec![3.0])));

        node.stop_streaming().await.unwrap();
        assert!(devices.streaming().is_none());
    }
}
