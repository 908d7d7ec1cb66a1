//! Audio engine - session lifecycle, processing worker and observation
//!
//! - AudioEngine: the state machine the control layer talks to
//! - Worker: pulls frames from the bridge and runs the effect chain
//! - Atomics/Monitor: lock-free state and metrics for other threads
//! - Events: non-blocking notifications (state changes, faults, stream errors)

mod command;
mod engine;
mod error;
mod events;
mod gc;
mod state;
mod worker;

pub use command::{command_channel, ChainCommand, COMMAND_QUEUE_CAPACITY};
pub use engine::AudioEngine;
pub use error::{EngineError, EngineResult};
pub use events::{EngineEvent, EVENT_QUEUE_CAPACITY};
pub use state::{EngineAtomics, EngineMetrics, EngineMonitor, EngineState};
pub use worker::INGRESS_WAIT;
