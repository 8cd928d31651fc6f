//! Connection lifecycle state of an ICOtronic system.

use serde::{Deserialize, Serialize};

/// The states the ICOtronic system can be in.
///
/// Variants are ordered by connection depth, so `State::HubConnected <
/// State::SensorNodeConnected` holds and "at least hub connected" checks can
/// be written as comparisons.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum State {
    /// No transport connection exists
    #[default]
    Disconnected,
    /// Connected to the hub (STU)
    HubConnected,
    /// Connected to the hub and to one sensor node through it
    SensorNodeConnected,
}

impl State {
    /// All states, in connection order.
    pub const ALL: [State; 3] = [
        State::Disconnected,
        State::HubConnected,
        State::SensorNodeConnected,
    ];

    /// Whether a hub handle is expected to exist in this state.
    pub fn hub_connected(&self) -> bool {
        *self >= State::HubConnected
    }

    /// Whether a sensor node handle is expected to exist in this state.
    pub fn sensor_node_connected(&self) -> bool {
        *self == State::SensorNodeConnected
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::HubConnected => write!(f, "STU Connected"),
            Self::SensorNodeConnected => write!(f, "Sensor Node Connected"),
        }
    }
}

/// Render a set of states as a comma separated list.
pub fn describe_states(states: &[State]) -> String {
    states
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
