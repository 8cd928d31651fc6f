//! Events emitted by the system when sensor node attributes change.

use serde::{Deserialize, Serialize};

use crate::measurement::MeasurementData;
use crate::types::{AdcConfiguration, MacAddress};

/// Event names listeners can register for.
pub mod names {
    pub const SENSOR_NODE_NAME: &str = "sensor_node_name";
    pub const SENSOR_NODE_MAC_ADDRESS: &str = "sensor_node_mac_address";
    pub const SENSOR_NODE_ADC_CONFIGURATION: &str = "sensor_node_adc_configuration";
    pub const SENSOR_NODE_MEASUREMENT_DATA: &str = "sensor_node_measurement_data";

    pub const ALL: [&str; 4] = [
        SENSOR_NODE_NAME,
        SENSOR_NODE_MAC_ADDRESS,
        SENSOR_NODE_ADC_CONFIGURATION,
        SENSOR_NODE_MEASUREMENT_DATA,
    ];
}

/// Payload of an emitted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum SystemEvent {
    /// Name read from the sensor node after connect or rename
    SensorNodeName(String),
    /// Hardware address read from the sensor node after connect
    SensorNodeMacAddress(MacAddress),
    /// ADC configuration read or written
    SensorNodeAdcConfiguration(AdcConfiguration),
    /// One ingested streaming frame
    SensorNodeMeasurementData(MeasurementData),
}

impl SystemEvent {
    /// Name the event is emitted under.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SensorNodeName(_) => names::SENSOR_NODE_NAME,
            Self::SensorNodeMacAddress(_) => names::SENSOR_NODE_MAC_ADDRESS,
            Self::SensorNodeAdcConfiguration(_) => names::SENSOR_NODE_ADC_CONFIGURATION,
            Self::SensorNodeMeasurementData(_) => names::SENSOR_NODE_MEASUREMENT_DATA,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::SensorNodeName(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_mac_address(&self) -> Option<MacAddress> {
        match self {
            Self::SensorNodeMacAddress(mac) => Some(*mac),
            _ => None,
        }
    }

    pub fn as_adc_configuration(&self) -> Option<AdcConfiguration> {
        match self {
            Self::SensorNodeAdcConfiguration(config) => Some(*config),
            _ => None,
        }
    }

    pub fn as_measurement_data(&self) -> Option<&MeasurementData> {
        match self {
            Self::SensorNodeMeasurementData(data) => Some(data),
            _ => None,
        }
    }
}
