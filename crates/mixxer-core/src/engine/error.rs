//! Engine error types

use thiserror::Error;

use super::state::EngineState;
use crate::audio::{AudioError, DeviceOpenError, SwapError};
use crate::effect::EffectError;

/// Errors returned by [`AudioEngine`](super::AudioEngine) operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The session could not be brought up; the engine is in `Error`
    #[error("Failed to start audio session: {0}")]
    StartFailed(AudioError),

    #[error(transparent)]
    DeviceOpen(#[from] DeviceOpenError),

    /// A device swap failed (see the variant for whether it was rolled back)
    #[error("Device swap failed: {0}")]
    Swap(#[from] SwapError),

    #[error("Failed to enumerate audio devices: {0}")]
    Enumeration(String),

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: EngineState,
    },

    #[error(transparent)]
    Effect(#[from] EffectError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    /// The processing worker has not drained earlier commands yet
    #[error("Effect command queue is full")]
    CommandQueueFull,

    #[error("Failed to spawn engine thread: {0}")]
    WorkerSpawn(String),
}

impl From<AudioError> for EngineError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::DeviceEnumeration(msg) => EngineError::Enumeration(msg),
            AudioError::DeviceOpen(e) => EngineError::DeviceOpen(e),
            AudioError::StreamControl(msg) => EngineError::Stream(msg),
            AudioError::InvalidConfig(msg) => EngineError::InvalidConfig(msg),
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::StageId;

    #[test]
    fn test_audio_errors_map_to_engine_errors() {
        assert_eq!(
            EngineError::from(AudioError::DeviceEnumeration("no driver".into())),
            EngineError::Enumeration("no driver".into())
        );
        assert!(matches!(
            EngineError::from(AudioError::DeviceOpen(DeviceOpenError::NoDefault(
                crate::types::Direction::Output
            ))),
            EngineError::DeviceOpen(DeviceOpenError::NoDefault(_))
        ));
    }

    #[test]
    fn test_messages() {
        let err = EngineError::InvalidState {
            operation: "swap devices",
            state: EngineState::Idle,
        };
        assert_eq!(err.to_string(), "Cannot swap devices while idle");

        let err: EngineError = EffectError::UnknownStage(StageId::from("eq")).into();
        assert_eq!(err.to_string(), "Unknown effect stage: eq");
    }
}
