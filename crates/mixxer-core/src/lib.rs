//! Mixxer Core - live audio routing from an input device through an effect
//! chain to an output device

pub mod audio;
pub mod bridge;
pub mod config;
pub mod effect;
pub mod engine;
pub mod types;

pub use types::*;
