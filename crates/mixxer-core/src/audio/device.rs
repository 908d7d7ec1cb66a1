//! Audio device enumeration
//!
//! The registry asks the backend for a fresh device list on every call. A
//! [`DeviceDescriptor`] is a snapshot: hardware can disappear at any time, so
//! identifiers are re-validated with [`DeviceRegistry::resolve`] right before
//! a stream is opened instead of trusting an earlier list.

use std::sync::Arc;

use super::backend::AudioBackend;
use super::config::DeviceId;
use super::error::{AudioResult, DeviceOpenError};
use crate::types::Direction;

/// Information about an audio endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    /// Device identifier for configuration (includes host info)
    pub id: DeviceId,
    /// Human-readable device name
    pub name: String,
    /// Host backend name (e.g., "ALSA", "JACK")
    pub host: String,
    /// Maximum input channels (0 = not an input)
    pub max_input_channels: u16,
    /// Maximum output channels (0 = not an output)
    pub max_output_channels: u16,
    /// Whether this is the host's default input device
    pub is_default_input: bool,
    /// Whether this is the host's default output device
    pub is_default_output: bool,
}

impl DeviceDescriptor {
    /// Maximum channels for a direction
    pub fn max_channels(&self, direction: Direction) -> u16 {
        match direction {
            Direction::Input => self.max_input_channels,
            Direction::Output => self.max_output_channels,
        }
    }

    /// Whether the device can be opened in a direction at all
    pub fn supports(&self, direction: Direction) -> bool {
        self.max_channels(direction) > 0
    }

    /// Whether this is the default device for a direction
    pub fn is_default(&self, direction: Direction) -> bool {
        match direction {
            Direction::Input => self.is_default_input,
            Direction::Output => self.is_default_output,
        }
    }

    /// Label for a device picker, e.g. `"USB Mic (Inputs: 2)"`
    pub fn display_label(&self, direction: Direction) -> String {
        let kind = match direction {
            Direction::Input => "Inputs",
            Direction::Output => "Outputs",
        };
        format!("{} ({}: {})", self.name, kind, self.max_channels(direction))
    }
}

/// Enumerates available audio endpoints through a backend
#[derive(Clone)]
pub struct DeviceRegistry {
    backend: Arc<dyn AudioBackend>,
}

impl DeviceRegistry {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self { backend }
    }

    /// Devices with at least one input channel
    pub fn list_input_devices(&self) -> AudioResult<Vec<DeviceDescriptor>> {
        self.list(Direction::Input)
    }

    /// Devices with at least one output channel
    pub fn list_output_devices(&self) -> AudioResult<Vec<DeviceDescriptor>> {
        self.list(Direction::Output)
    }

    /// Devices usable in a direction, defaults first then by host and name
    pub fn list(&self, direction: Direction) -> AudioResult<Vec<DeviceDescriptor>> {
        let mut devices: Vec<DeviceDescriptor> = self
            .backend
            .devices()?
            .into_iter()
            .filter(|d| d.supports(direction))
            .collect();

        devices.sort_by(|a, b| {
            b.is_default(direction)
                .cmp(&a.is_default(direction))
                .then_with(|| a.host.cmp(&b.host))
                .then_with(|| a.name.cmp(&b.name))
        });

        log::debug!(
            "Enumerated {} {} devices via {}",
            devices.len(),
            direction,
            self.backend.name()
        );

        Ok(devices)
    }

    /// Validate a device choice against a fresh enumeration
    ///
    /// `None` selects the backend's default device for the direction. The
    /// device must be present and offer at least `channels` channels.
    pub fn resolve(
        &self,
        direction: Direction,
        requested: Option<&DeviceId>,
        channels: u16,
    ) -> AudioResult<DeviceDescriptor> {
        let id = match requested {
            Some(id) => id.clone(),
            None => self
                .backend
                .default_device(direction)
                .ok_or(DeviceOpenError::NoDefault(direction))?,
        };

        let descriptor = self
            .list(direction)?
            .into_iter()
            .find(|d| d.id.matches(&id))
            .ok_or_else(|| DeviceOpenError::NotFound {
                direction,
                device: id.clone(),
            })?;

        let available = descriptor.max_channels(direction);
        if available < channels {
            return Err(DeviceOpenError::Unsupported {
                direction,
                device: descriptor.id.clone(),
                reason: format!("{} channels requested, device has {}", channels, available),
            }
            .into());
        }

        Ok(descriptor)
    }
}
