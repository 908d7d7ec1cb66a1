//! Audio backend error types

use thiserror::Error;

use super::config::DeviceId;
use crate::types::Direction;

/// Reasons a device stream could not be opened
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceOpenError {
    /// Identifier does not name a device that is currently present
    #[error("Audio {direction} device not found: {device}")]
    NotFound { direction: Direction, device: DeviceId },

    /// No default device exists for the direction
    #[error("No default audio {0} device available")]
    NoDefault(Direction),

    /// Device exists but cannot run the requested configuration
    #[error("Audio device {device} does not support the requested {direction} config: {reason}")]
    Unsupported {
        direction: Direction,
        device: DeviceId,
        reason: String,
    },

    /// Device or direction is already claimed by another stream
    #[error("Audio device {device} is busy ({direction})")]
    Busy { direction: Direction, device: DeviceId },

    /// Backend failed to build or start the stream
    #[error("Failed to open {direction} stream on {device}: {message}")]
    Backend {
        direction: Direction,
        device: DeviceId,
        message: String,
    },
}

/// Errors that can occur during audio operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    /// The driver layer could not be queried
    #[error("Failed to enumerate audio devices: {0}")]
    DeviceEnumeration(String),

    /// A device stream could not be opened
    #[error(transparent)]
    DeviceOpen(#[from] DeviceOpenError),

    /// Failed to start or pause an open stream
    #[error("Audio stream control failed: {0}")]
    StreamControl(String),

    /// Session configuration is not usable
    #[error("Invalid audio configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_error_converts_into_audio_error() {
        let err: AudioError = DeviceOpenError::Busy {
            direction: Direction::Input,
            device: DeviceId::new("Mic"),
        }
        .into();
        assert!(matches!(err, AudioError::DeviceOpen(DeviceOpenError::Busy { .. })));
        assert_eq!(err.to_string(), "Audio device Mic is busy (input)");
    }
}
