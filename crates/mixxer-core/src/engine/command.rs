//! Lock-free command queue from the engine to the processing worker
//!
//! Chain changes made while a session runs are queued here and applied by
//! the worker between two frames, so every frame sees one consistent chain.

use crate::effect::{EffectChain, ParamChange};

/// Commands consumed by the processing worker
pub enum ChainCommand {
    /// Swap in a new chain
    ///
    /// Boxed so the command stays small in the ringbuffer. `generation`
    /// tags fault reports so stale ones can be told apart.
    Replace {
        chain: Box<EffectChain>,
        generation: u64,
    },
    /// Set a validated, clamped parameter value
    SetParam(ParamChange),
    /// Enable or disable the stage at `slot`
    SetEnabled { slot: usize, enabled: bool },
}

/// Capacity of the command queue
pub const COMMAND_QUEUE_CAPACITY: usize = 256;

/// Create a new command channel (producer/consumer pair)
///
/// The producer stays with the engine, the consumer moves to the worker.
pub fn command_channel() -> (rtrb::Producer<ChainCommand>, rtrb::Consumer<ChainCommand>) {
    rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY)
}
