//! Measurement buffer for streamed sensor data.
//!
//! A [`MeasurementBuffer`] lives for one streaming session. It splits each
//! inbound frame into per-channel sample sequences and tracks gaps in the
//! frame counter so consumers can judge both throughput and integrity of a
//! measurement without looking at raw frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{StreamingConfiguration, StreamingFrame};

/// Number of measurement channels a sensor node provides.
pub const CHANNEL_COUNT: usize = 3;

/// Errors raised by the measurement buffer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MeasurementError {
    #[error("Invalid channel {0}: channels are numbered 1 to 3")]
    InvalidChannel(u8),

    #[error("Channel {0} is not enabled in the streaming configuration")]
    DisabledChannel(u8),

    #[error("Malformed frame {counter}: {reason}")]
    MalformedFrame { counter: u8, reason: String },

    #[error("Duplicate frame {0}")]
    DuplicateFrame(u8),
}

/// Single sample of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Counter of the frame the sample arrived in
    pub counter: u8,
    /// Timestamp of that frame in milliseconds
    pub timestamp: f64,
    pub value: f64,
}

/// Values one frame contributed to one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelValues {
    pub channel: u8,
    pub values: Vec<f64>,
}

/// Incremental view of the buffer after ingesting a frame.
///
/// This is the payload of the `sensor_node_measurement_data` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementData {
    pub counter: u8,
    pub timestamp: f64,
    pub channels: Vec<ChannelValues>,
    /// Frames ingested so far in this session
    pub frames_received: usize,
    /// Frames detected as missing so far in this session
    pub frames_lost: usize,
    pub dataloss: f64,
}

impl MeasurementData {
    /// Values of `channel` contained in this frame.
    pub fn values(&self, channel: u8) -> Option<&[f64]> {
        self.channels
            .iter()
            .find(|c| c.channel == channel)
            .map(|c| c.values.as_slice())
    }
}

/// Aggregated values of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelStatistics {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

/// Accumulated data of one streaming session.
#[derive(Debug, Clone)]
pub struct MeasurementBuffer {
    configuration: StreamingConfiguration,
    expected_sample_rate: f64,
    channels: [Vec<Sample>; CHANNEL_COUNT],
    frames_received: usize,
    frames_lost: usize,
    last_counter: Option<u8>,
    first_timestamp: Option<f64>,
    last_timestamp: Option<f64>,
    started_at: DateTime<Utc>,
}

impl MeasurementBuffer {
    /// Create a buffer for a session with the given configuration.
    ///
    /// `expected_sample_rate` is the per-channel rate in Hz the sensor node
    /// was configured for.
    pub fn new(configuration: StreamingConfiguration, expected_sample_rate: f64) -> Self {
        Self {
            configuration,
            expected_sample_rate,
            channels: Default::default(),
            frames_received: 0,
            frames_lost: 0,
            last_counter: None,
            first_timestamp: None,
            last_timestamp: None,
            started_at: Utc::now(),
        }
    }

    /// Reset all samples and counters and start over with a new configuration.
    pub fn start(&mut self, configuration: StreamingConfiguration, expected_sample_rate: f64) {
        *self = Self::new(configuration, expected_sample_rate);
    }

    /// Append the samples of `frame` and update the loss accounting.
    ///
    /// A malformed frame, or one repeating the previous counter, is rejected
    /// without changing the buffer.
    pub fn ingest(&mut self, frame: &StreamingFrame) -> Result<MeasurementData, MeasurementError> {
        let enabled = self.configuration.enabled_channels();
        if enabled.is_empty() {
            return Err(MeasurementError::MalformedFrame {
                counter: frame.counter,
                reason: "no channel enabled".to_string(),
            });
        }
        if frame.values.is_empty() || frame.values.len() % enabled.len() != 0 {
            return Err(MeasurementError::MalformedFrame {
                counter: frame.counter,
                reason: format!(
                    "{} value(s) cannot be split across {} channel(s)",
                    frame.values.len(),
                    enabled.len()
                ),
            });
        }

        if self.last_counter == Some(frame.counter) {
            return Err(MeasurementError::DuplicateFrame(frame.counter));
        }
        if let Some(previous) = self.last_counter {
            let gap = frame.counter.wrapping_sub(previous.wrapping_add(1)) as usize;
            if gap > 0 {
                tracing::debug!(
                    "Detected {} missing frame(s) between {} and {}",
                    gap,
                    previous,
                    frame.counter
                );
            }
            self.frames_lost += gap;
        }
        self.last_counter = Some(frame.counter);
        self.frames_received += 1;
        self.first_timestamp.get_or_insert(frame.timestamp);
        self.last_timestamp = Some(frame.timestamp);

        let mut channels: Vec<ChannelValues> = enabled
            .iter()
            .map(|&channel| ChannelValues {
                channel,
                values: Vec::with_capacity(frame.values.len() / enabled.len()),
            })
            .collect();

        for (i, &value) in frame.values.iter().enumerate() {
            let slot = i % enabled.len();
            let channel = enabled[slot];
            self.channels[channel as usize - 1].push(Sample {
                counter: frame.counter,
                timestamp: frame.timestamp,
                value,
            });
            channels[slot].values.push(value);
        }

        Ok(MeasurementData {
            counter: frame.counter,
            timestamp: frame.timestamp,
            channels,
            frames_received: self.frames_received,
            frames_lost: self.frames_lost,
            dataloss: self.dataloss(),
        })
    }

    /// Fraction of frames lost: `lost / (received + lost)`, `0` without frames.
    pub fn dataloss(&self) -> f64 {
        if self.frames_received == 0 {
            return 0.0;
        }
        self.frames_lost as f64 / (self.frames_received + self.frames_lost) as f64
    }

    /// Number of ingested frames.
    pub fn length(&self) -> usize {
        self.frames_received
    }

    pub fn is_empty(&self) -> bool {
        self.frames_received == 0
    }

    /// Number of frames detected as missing.
    pub fn frames_lost(&self) -> usize {
        self.frames_lost
    }

    /// Samples of `channel` (1, 2 or 3) in arrival order.
    pub fn channel(&self, channel: u8) -> Result<&[Sample], MeasurementError> {
        if !(1..=CHANNEL_COUNT as u8).contains(&channel) {
            return Err(MeasurementError::InvalidChannel(channel));
        }
        if !self.configuration.is_enabled(channel) {
            return Err(MeasurementError::DisabledChannel(channel));
        }
        Ok(&self.channels[channel as usize - 1])
    }

    /// Only the values of `channel`, in arrival order.
    pub fn channel_values(&self, channel: u8) -> Result<Vec<f64>, MeasurementError> {
        Ok(self.channel(channel)?.iter().map(|s| s.value).collect())
    }

    /// Count, minimum, maximum and average of `channel`; `None` without samples.
    pub fn statistics(&self, channel: u8) -> Result<Option<ChannelStatistics>, MeasurementError> {
        let samples = self.channel(channel)?;
        if samples.is_empty() {
            return Ok(None);
        }

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for sample in samples {
            min = min.min(sample.value);
            max = max.max(sample.value);
            sum += sample.value;
        }

        Ok(Some(ChannelStatistics {
            count: samples.len(),
            min,
            max,
            avg: sum / samples.len() as f64,
        }))
    }

    /// Per-channel sample rate observed from frame timestamps.
    ///
    /// Needs at least two frames with distinct timestamps.
    pub fn measured_sample_rate(&self) -> Option<f64> {
        let (first, last) = (self.first_timestamp?, self.last_timestamp?);
        let seconds = (last - first) / 1000.0;
        if seconds <= 0.0 {
            return None;
        }
        let channel = *self.configuration.enabled_channels().first()?;
        let samples = self.channels[channel as usize - 1].len();
        // Samples of the first frame were taken before `first`
        let frames = self.frames_received as f64;
        Some(samples as f64 * (frames - 1.0) / frames / seconds)
    }

    pub fn configuration(&self) -> StreamingConfiguration {
        self.configuration
    }

    pub fn expected_sample_rate(&self) -> f64 {
        self.expected_sample_rate
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}
