//! Common types for mixxer
//!
//! The fundamental audio types shared by the bridge, the effect chain and the
//! engine: stream direction and the interleaved audio frame.

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Audio sample type (32-bit float for all processing)
pub type Sample = f32;

/// Direction of a device stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    /// Both directions, input first
    pub const ALL: [Direction; 2] = [Direction::Input, Direction::Output];

    /// Get the name of this direction
    pub fn name(&self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One block of interleaved audio for all channels
///
/// Frames are allocated once per session by the [`FrameBridge`](crate::bridge::FrameBridge)
/// pool and then moved between stages; the sample buffer is never resized on
/// the real-time path. Whoever holds the frame owns it exclusively.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<Sample>,
    channels: u16,
    sequence: u64,
    captured_at: Instant,
}

impl AudioFrame {
    /// Create a silent frame holding `frame_len` interleaved samples
    pub fn silence(frame_len: usize, channels: u16) -> Self {
        Self {
            samples: vec![0.0; frame_len],
            channels: channels.max(1),
            sequence: 0,
            captured_at: Instant::now(),
        }
    }

    /// Create a frame from interleaved samples
    pub fn from_samples(samples: Vec<Sample>, channels: u16, sequence: u64) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Frame with no samples (placeholder before anything was processed)
    pub fn empty() -> Self {
        Self::from_samples(Vec::new(), 1, 0)
    }

    /// Interleaved samples
    #[inline]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Mutable interleaved samples
    #[inline]
    pub fn samples_mut(&mut self) -> &mut [Sample] {
        &mut self.samples
    }

    /// Number of interleaved channels
    #[inline]
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of sample frames (samples per channel)
    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Total interleaved sample count
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sequence number assigned at capture
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Time the input callback captured this block
    #[inline]
    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Refill this frame from driver samples (real-time safe, never allocates)
    ///
    /// Copies up to `len()` samples and zero-pads the remainder when the
    /// driver delivered a short block.
    pub fn fill_from(&mut self, input: &[Sample], sequence: u64, captured_at: Instant) {
        let n = input.len().min(self.samples.len());
        self.samples[..n].copy_from_slice(&input[..n]);
        self.samples[n..].fill(0.0);
        self.sequence = sequence;
        self.captured_at = captured_at;
    }

    /// Copy this frame into a driver output buffer, zero-filling any excess
    pub fn copy_to(&self, output: &mut [Sample]) {
        let n = output.len().min(self.samples.len());
        output[..n].copy_from_slice(&self.samples[..n]);
        output[n..].fill(0.0);
    }

    /// Fill with silence
    pub fn fill_silence(&mut self) {
        self.samples.fill(0.0);
    }

    /// Whether every sample is exactly zero
    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|s| *s == 0.0)
    }

    /// Peak absolute amplitude across all channels
    pub fn peak(&self) -> Sample {
        self.samples.iter().fold(0.0, |acc, s| acc.max(s.abs()))
    }

    /// Peak absolute amplitude of one channel
    pub fn channel_peak(&self, channel: usize) -> Sample {
        self.samples
            .iter()
            .skip(channel)
            .step_by(self.channels as usize)
            .fold(0.0, |acc, s| acc.max(s.abs()))
    }

    /// Root-mean-square level across all channels
    pub fn rms(&self) -> Sample {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum / self.samples.len() as f32).sqrt()
    }
}
