//! Driver layer for mixxer
//!
//! Everything that touches audio devices lives here:
//! - **Backends**: [`CpalBackend`] for hardware, [`VirtualBackend`] for
//!   in-process devices driven by the caller
//! - **Registry**: fresh device enumeration and open-time validation
//! - **Streams**: the lifecycle controller that opens, closes and swaps the
//!   input and output streams behind a callback gate
//!
//! # Example Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use mixxer_core::audio::{CpalBackend, DeviceRegistry};
//!
//! let registry = DeviceRegistry::new(Arc::new(CpalBackend::new()));
//! for device in registry.list_input_devices()? {
//!     println!("{}", device.display_label(Direction::Input));
//! }
//! ```

mod backend;
mod config;
mod cpal_backend;
mod device;
mod error;
mod stream;
mod virtual_backend;

pub use backend::{
    AudioBackend, BackendStream, ErrorCallback, InputHandler, OutputHandler, StreamCallback,
};
pub use config::{
    DeviceId, SessionConfig, StreamConfig, DEFAULT_BLOCK_SIZE, DEFAULT_BRIDGE_CAPACITY,
    DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE, MAX_BLOCK_SIZE, MAX_BRIDGE_CAPACITY,
};
pub use cpal_backend::CpalBackend;
pub use device::{DeviceDescriptor, DeviceRegistry};
pub use error::{AudioError, AudioResult, DeviceOpenError};
pub use stream::{StreamErrorSink, StreamHandle, StreamLifecycleController, SwapError};
pub use virtual_backend::{VirtualBackend, VirtualDevice, VIRTUAL_HOST};
