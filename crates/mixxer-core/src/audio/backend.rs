//! Audio backend trait for driver-layer implementations
//!
//! Defines the common interface the engine uses to talk to audio drivers:
//! - **CpalBackend**: real hardware through CPAL (ALSA/JACK/WASAPI/CoreAudio)
//! - **VirtualBackend**: in-process devices driven by the caller (tests, loopback)
//!
//! Both backends invoke the same fixed callback interface. Handlers run on the
//! driver's time-critical thread: they must not block, allocate or log.

use super::config::{DeviceId, StreamConfig};
use super::device::DeviceDescriptor;
use super::error::{AudioResult, DeviceOpenError};
use crate::types::{Direction, Sample};

/// Receives captured blocks from an input stream
pub trait InputHandler: Send + 'static {
    /// Called once per driver callback with interleaved samples
    fn on_input(&mut self, samples: &[Sample]);
}

/// Fills blocks for an output stream
pub trait OutputHandler: Send + 'static {
    /// Called once per driver callback; must write every sample of `output`
    fn on_output(&mut self, output: &mut [Sample]);
}

/// Callback installed on a stream at open time
pub enum StreamCallback {
    Input(Box<dyn InputHandler>),
    Output(Box<dyn OutputHandler>),
}

impl StreamCallback {
    /// Direction this callback serves
    pub fn direction(&self) -> Direction {
        match self {
            StreamCallback::Input(_) => Direction::Input,
            StreamCallback::Output(_) => Direction::Output,
        }
    }
}

/// Called from the driver when a running stream reports an error
pub type ErrorCallback = Box<dyn FnMut(String) + Send + 'static>;

/// An open device stream
///
/// Dropping the stream stops callback delivery and releases the device.
pub trait BackendStream {
    /// Start (or resume) callback delivery
    fn play(&mut self) -> AudioResult<()>;

    /// Pause callback delivery without releasing the device
    fn pause(&mut self) -> AudioResult<()>;
}

/// Driver layer used by the device registry and the stream controller
pub trait AudioBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Enumerate all devices (fresh query on every call)
    fn devices(&self) -> AudioResult<Vec<DeviceDescriptor>>;

    /// The system default device for a direction, if any
    fn default_device(&self, direction: Direction) -> Option<DeviceId>;

    /// Open a stream on `device`
    ///
    /// The callback's direction selects an input or output stream. The stream
    /// is returned paused; call [`BackendStream::play`] to start delivery.
    fn open_stream(
        &self,
        device: &DeviceId,
        config: &StreamConfig,
        callback: StreamCallback,
        on_error: ErrorCallback,
    ) -> Result<Box<dyn BackendStream>, DeviceOpenError>;
}
