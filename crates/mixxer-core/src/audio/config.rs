//! Audio session configuration
//!
//! Defines stream parameters (rate, channels, block size), device selection
//! and the bridge capacity for one start→stop session.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::Direction;

/// Largest block size accepted (frames per callback)
/// Covers all common driver configurations (64 .. 4096)
pub const MAX_BLOCK_SIZE: u32 = 8192;

/// Default block size (frames per callback)
/// 512 frames @ 44.1kHz = ~11.6ms, a safe default for most systems
pub const DEFAULT_BLOCK_SIZE: u32 = 512;

/// Default sample rate, matching the original driver clock default
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Default interleaved channel count
pub const DEFAULT_CHANNELS: u16 = 2;

/// Default number of frames queued per bridge direction
pub const DEFAULT_BRIDGE_CAPACITY: usize = 4;

/// Upper bound for the bridge capacity (keeps worst-case latency bounded)
pub const MAX_BRIDGE_CAPACITY: usize = 64;

/// Audio device identifier
///
/// Includes both the device name and the host backend (JACK, ALSA, etc.)
/// so devices with the same name on different hosts stay distinguishable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId {
    /// Device name as reported by the system
    pub name: String,
    /// Audio host identifier (e.g., "ALSA", "JACK", "CoreAudio")
    /// If None, any host may match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
        }
    }

    pub fn with_host(name: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            host: Some(host.to_string()),
        }
    }

    /// Whether `other` names the same device (a missing host matches any host)
    pub fn matches(&self, other: &DeviceId) -> bool {
        self.name == other.name
            && match (&self.host, &other.host) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
    }

    /// Get a display label that includes the host if available
    pub fn display_label(&self) -> String {
        match &self.host {
            Some(host) => format!("[{}] {}", host, self.name),
            None => self.name.clone(),
        }
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display_label())
    }
}

/// Stream parameters, fixed for the lifetime of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Driver clock rate in Hz
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Frames per driver callback
    pub block_size: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl StreamConfig {
    /// Interleaved samples per block
    #[inline]
    pub fn frame_len(&self) -> usize {
        self.block_size as usize * self.channels as usize
    }

    /// Wall-clock duration of one block
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.block_size as f64 / self.sample_rate.max(1) as f64)
    }

    /// Block latency in milliseconds
    pub fn latency_ms(&self) -> f32 {
        (self.block_size as f32 / self.sample_rate.max(1) as f32) * 1000.0
    }

    /// Check that every field is usable
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("sample rate must be positive".to_string());
        }
        if self.channels == 0 {
            return Err("channel count must be positive".to_string());
        }
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(format!(
                "block size must be within 1..={} frames, got {}",
                MAX_BLOCK_SIZE, self.block_size
            ));
        }
        Ok(())
    }
}

/// Configuration for one engine session (start → stop)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Driver clock rate in Hz
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Frames per driver callback
    pub block_size: u32,
    /// Max queued frames per bridge direction
    pub bridge_capacity: usize,
    /// Input device (None = backend default input)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_device: Option<DeviceId>,
    /// Output device (None = backend default output)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_device: Option<DeviceId>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let stream = StreamConfig::default();
        Self {
            sample_rate: stream.sample_rate,
            channels: stream.channels,
            block_size: stream.block_size,
            bridge_capacity: DEFAULT_BRIDGE_CAPACITY,
            input_device: None,
            output_device: None,
        }
    }
}

impl SessionConfig {
    /// Stream parameters of this session
    pub fn stream(&self) -> StreamConfig {
        StreamConfig {
            sample_rate: self.sample_rate,
            channels: self.channels,
            block_size: self.block_size,
        }
    }

    /// Bridge capacity clamped to the supported range
    pub fn effective_capacity(&self) -> usize {
        self.bridge_capacity.clamp(1, MAX_BRIDGE_CAPACITY)
    }

    /// Device selected for a direction
    pub fn device(&self, direction: Direction) -> Option<&DeviceId> {
        match direction {
            Direction::Input => self.input_device.as_ref(),
            Direction::Output => self.output_device.as_ref(),
        }
    }

    /// Set the input device
    pub fn with_input_device(mut self, device: DeviceId) -> Self {
        self.input_device = Some(device);
        self
    }

    /// Set the output device
    pub fn with_output_device(mut self, device: DeviceId) -> Self {
        self.output_device = Some(device);
        self
    }

    /// Set the sample rate
    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Set the channel count
    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    /// Set the block size in frames
    pub fn with_block_size(mut self, frames: u32) -> Self {
        self.block_size = frames;
        self
    }

    /// Set the bridge capacity in frames
    pub fn with_bridge_capacity(mut self, capacity: usize) -> Self {
        self.bridge_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.channels, 2);
        assert_eq!(config.block_size, 512);
        assert_eq!(config.bridge_capacity, 4);
        assert_eq!(config.stream().frame_len(), 1024);
    }

    #[test]
    fn test_capacity_is_clamped() {
        assert_eq!(SessionConfig::default().with_bridge_capacity(0).effective_capacity(), 1);
        assert_eq!(
            SessionConfig::default().with_bridge_capacity(1000).effective_capacity(),
            MAX_BRIDGE_CAPACITY
        );
    }

    #[test]
    fn test_validate_rejects_zero_fields() {
        let mut stream = StreamConfig::default();
        assert!(stream.validate().is_ok());

        stream.block_size = 0;
        assert!(stream.validate().is_err());

        stream.block_size = MAX_BLOCK_SIZE + 1;
        assert!(stream.validate().is_err());

        let stream = StreamConfig { channels: 0, ..Default::default() };
        assert!(stream.validate().is_err());
    }

    #[test]
    fn test_device_id_matching() {
        let alsa = DeviceId::with_host("hw:0,0", "ALSA");
        let bare = DeviceId::new("hw:0,0");
        let jack = DeviceId::with_host("hw:0,0", "JACK");

        assert!(bare.matches(&alsa));
        assert!(alsa.matches(&bare));
        assert!(!alsa.matches(&jack));
        assert_eq!(alsa.display_label(), "[ALSA] hw:0,0");
    }

    #[test]
    fn test_yaml_uses_defaults_for_missing_fields() {
        let config: SessionConfig = serde_yaml::from_str("block_size: 256\n").unwrap();
        assert_eq!(config.block_size, 256);
        assert_eq!(config.sample_rate, DEFAULT_SAMPLE_RATE);
        assert!(config.input_device.is_none());
    }
}
