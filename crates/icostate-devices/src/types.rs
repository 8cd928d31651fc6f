//! Device data types exchanged with the hub and sensor node.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Maximum length of a sensor node name.
pub const MAX_NAME_LENGTH: usize = 8;

/// Clock frequency of the sensor node ADC in Hz.
pub const ADC_CLOCK_FREQUENCY: f64 = 38_400_000.0;

/// Hardware (MAC) address of a sensor node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}-{b:02X}-{c:02X}-{d:02X}-{e:02X}-{g:02X}")
    }
}

/// Error returned when parsing a [`MacAddress`] fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid MAC address: '{0}'")]
pub struct ParseMacAddressError(pub String);

impl FromStr for MacAddress {
    type Err = ParseMacAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseMacAddressError(s.to_string());
        let parts: Vec<&str> = s.trim().split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(invalid());
        }

        let mut bytes = [0u8; 6];
        for (byte, part) in bytes.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        Ok(Self(bytes))
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Location part of a node status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Location {
    Bootloader,
    Application,
}

/// Operating part of a node status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatingState {
    Startup,
    Operating,
    Error,
    NoChange,
}

/// Status reported by a node (hub or sensor node).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    pub location: Location,
    pub state: OperatingState,
}

impl NodeState {
    pub fn new(location: Location, state: OperatingState) -> Self {
        Self { location, state }
    }

    /// The status of a node that finished booting into its application.
    pub fn operating() -> Self {
        Self::new(Location::Application, OperatingState::Operating)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({:?})", self.state, self.location)
    }
}

/// ADC settings of a sensor node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdcConfiguration {
    pub prescaler: u32,
    pub acquisition_time: u32,
    pub oversampling_rate: u32,
}

impl AdcConfiguration {
    /// Allowed prescaler values
    pub const PRESCALER_RANGE: std::ops::RangeInclusive<u32> = 2..=127;
    /// Allowed acquisition times
    pub const ACQUISITION_TIMES: [u32; 10] = [1, 2, 3, 4, 8, 16, 32, 64, 128, 256];
    /// Largest oversampling rate; every power of two up to it is allowed
    pub const MAX_OVERSAMPLING_RATE: u32 = 4096;

    pub fn new(prescaler: u32, acquisition_time: u32, oversampling_rate: u32) -> Self {
        Self {
            prescaler,
            acquisition_time,
            oversampling_rate,
        }
    }

    /// Sample rate in Hz resulting from this configuration.
    pub fn sample_rate(&self) -> u32 {
        let divisor = (self.prescaler as f64 + 1.0)
            * (self.acquisition_time as f64 + 13.0)
            * self.oversampling_rate as f64;
        (ADC_CLOCK_FREQUENCY / divisor).round() as u32
    }

    /// Describe the first invalid field, if any.
    pub fn validate(&self) -> Result<(), String> {
        if !Self::PRESCALER_RANGE.contains(&self.prescaler) {
            return Err(format!(
                "prescaler {} outside {}..={}",
                self.prescaler,
                Self::PRESCALER_RANGE.start(),
                Self::PRESCALER_RANGE.end()
            ));
        }
        if !Self::ACQUISITION_TIMES.contains(&self.acquisition_time) {
            return Err(format!(
                "acquisition time {} not one of {:?}",
                self.acquisition_time,
                Self::ACQUISITION_TIMES
            ));
        }
        if !self.oversampling_rate.is_power_of_two()
            || self.oversampling_rate > Self::MAX_OVERSAMPLING_RATE
        {
            return Err(format!(
                "oversampling rate {} is not a power of two up to {}",
                self.oversampling_rate,
                Self::MAX_OVERSAMPLING_RATE
            ));
        }
        Ok(())
    }
}

impl Default for AdcConfiguration {
    fn default() -> Self {
        Self::new(2, 8, 64)
    }
}

impl fmt::Display for AdcConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Prescaler: {}, Acquisition Time: {}, Oversampling Rate: {} ({} Hz)",
            self.prescaler,
            self.acquisition_time,
            self.oversampling_rate,
            self.sample_rate()
        )
    }
}

/// Selection of the measurement channels streamed by the sensor node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamingConfiguration {
    pub first: bool,
    pub second: bool,
    pub third: bool,
}

impl StreamingConfiguration {
    pub fn new(first: bool, second: bool, third: bool) -> Self {
        Self {
            first,
            second,
            third,
        }
    }

    /// Whether channel `channel` (1, 2 or 3) is enabled.
    pub fn is_enabled(&self, channel: u8) -> bool {
        match channel {
            1 => self.first,
            2 => self.second,
            3 => self.third,
            _ => false,
        }
    }

    /// Enabled channel numbers in ascending order.
    pub fn enabled_channels(&self) -> Vec<u8> {
        (1..=3).filter(|&c| self.is_enabled(c)).collect()
    }

    pub fn enabled_count(&self) -> usize {
        self.enabled_channels().len()
    }
}

impl Default for StreamingConfiguration {
    fn default() -> Self {
        Self::new(true, false, false)
    }
}

/// One inbound batch of streamed samples.
///
/// `values` are interleaved across the enabled channels in channel order:
/// with channels 1 and 3 enabled, `[a, b, c, d]` means channel 1 got `a, c`
/// and channel 3 got `b, d`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingFrame {
    /// 8-bit message counter, wraps from 255 to 0
    pub counter: u8,
    /// Reception time in milliseconds
    pub timestamp: f64,
    pub values: Vec<f64>,
}

impl StreamingFrame {
    pub fn new(counter: u8, timestamp: f64, values: Vec<f64>) -> Self {
        Self {
            counter,
            timestamp,
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_address_roundtrip_display() {
        let mac: MacAddress = "08:6b:d7:01:de:81".parse().unwrap();
        assert_eq!(mac.octets(), [0x08, 0x6B, 0xD7, 0x01, 0xDE, 0x81]);
        assert_eq!(mac.to_string(), "08-6B-D7-01-DE-81");
        assert_eq!("08-6B-D7-01-DE-81".parse::<MacAddress>().unwrap(), mac);
    }

    #[test]
    fn test_mac_address_rejects_garbage() {
        assert!("08:6b:d7:01:de".parse::<MacAddress>().is_err());
        assert!("08:6b:d7:01:de:8".parse::<MacAddress>().is_err());
        assert!("zz:6b:d7:01:de:81".parse::<MacAddress>().is_err());
        assert!("".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_mac_address_serde() {
        let mac = MacAddress::new([1, 2, 3, 4, 5, 6]);
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"01-02-03-04-05-06\"");
        let back: MacAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mac);
    }

    #[test]
    fn test_default_adc_sample_rate() {
        let config = AdcConfiguration::default();
        assert_eq!(config, AdcConfiguration::new(2, 8, 64));
        assert_eq!(config.sample_rate(), 9524);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_adc_validation() {
        assert!(AdcConfiguration::new(1, 8, 64).validate().is_err());
        assert!(AdcConfiguration::new(128, 8, 64).validate().is_err());
        assert!(AdcConfiguration::new(2, 5, 64).validate().is_err());
        assert!(AdcConfiguration::new(2, 8, 48).validate().is_err());
        assert!(AdcConfiguration::new(2, 8, 8192).validate().is_err());
        assert!(AdcConfiguration::new(2, 8, 0).validate().is_err());
        assert!(AdcConfiguration::new(127, 256, 4096).validate().is_ok());
    }

    #[test]
    fn test_streaming_configuration_channels() {
        let config = StreamingConfiguration::new(true, false, true);
        assert_eq!(config.enabled_channels(), vec![1, 3]);
        assert_eq!(config.enabled_count(), 2);
        assert!(!config.is_enabled(2));
        assert!(!config.is_enabled(4));

        assert_eq!(StreamingConfiguration::default().enabled_channels(), vec![1]);
    }

    #[test]
    fn test_node_state_operating() {
        let state = NodeState::operating();
        assert_eq!(state.location, Location::Application);
        assert_eq!(state.state, OperatingState::Operating);
        assert_ne!(
            state,
            NodeState::new(Location::Bootloader, OperatingState::Operating)
        );
    }
}
