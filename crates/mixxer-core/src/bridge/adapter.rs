//! Driver callback adapters
//!
//! The only code that runs on the driver threads. Each adapter holds the
//! session's bridge and nothing else.

use std::sync::Arc;

use super::FrameBridge;
use crate::audio::{InputHandler, OutputHandler};
use crate::types::Sample;

/// Input callback: copies captured blocks into the bridge
pub struct InputAdapter {
    bridge: Arc<FrameBridge>,
}

impl InputAdapter {
    pub fn new(bridge: Arc<FrameBridge>) -> Self {
        Self { bridge }
    }
}

impl InputHandler for InputAdapter {
    #[inline]
    fn on_input(&mut self, samples: &[Sample]) {
        self.bridge.capture(samples);
    }
}

/// Output callback: drains processed frames or renders silence
pub struct OutputAdapter {
    bridge: Arc<FrameBridge>,
}

impl OutputAdapter {
    pub fn new(bridge: Arc<FrameBridge>) -> Self {
        Self { bridge }
    }
}

impl OutputHandler for OutputAdapter {
    #[inline]
    fn on_output(&mut self, output: &mut [Sample]) {
        self.bridge.fill_output(output);
    }
}
