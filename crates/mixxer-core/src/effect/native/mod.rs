//! Native Rust effects
//!
//! These effects are implemented directly in Rust and run inline on the
//! processing worker.

mod gain;

pub use gain::GainEffect;
