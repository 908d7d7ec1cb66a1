//! Frame bridge between the driver callbacks and the processing worker
//!
//! ```text
//! input callback ──capture()──► [ingress] ──► worker ──► [egress] ──fill_output()──► output callback
//!        ▲                                                                │
//!        └────────────────────────── [pool] ◄─────────────────────────────┘
//! ```
//!
//! Both queues are bounded `ArrayQueue`s sized once per session. A full queue
//! drops its oldest frame, an empty egress queue renders silence. Neither
//! case blocks or allocates: frames come from a preallocated pool and go back
//! to it after the output side copied them out.

mod adapter;

pub use adapter::{InputAdapter, OutputAdapter};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::queue::ArrayQueue;
use crossbeam::sync::{Parker, Unparker};

use crate::types::{AudioFrame, Sample};

/// Result of pushing a frame into a full-or-not queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Frame queued without displacing anything
    Queued,
    /// Queue was full: the oldest frame was dropped to make room
    Overflowed,
}

/// Result of filling an output block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopOutcome {
    /// Block filled from a processed frame
    Frame { sequence: u64 },
    /// Nothing was queued: the block was filled with silence
    Underflow,
}

/// Frame counters shared by the bridge, the worker and the engine monitor
///
/// Lives as long as the engine so counts remain readable after a session
/// ends; reset at the start of each session.
#[derive(Debug, Default)]
pub struct BridgeCounters {
    captured: AtomicU64,
    dropped_input: AtomicU64,
    processed: AtomicU64,
    dropped_output: AtomicU64,
    delivered: AtomicU64,
    underflow: AtomicU64,
}

impl BridgeCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero every counter
    pub fn reset(&self) {
        self.captured.store(0, Ordering::Relaxed);
        self.dropped_input.store(0, Ordering::Relaxed);
        self.processed.store(0, Ordering::Relaxed);
        self.dropped_output.store(0, Ordering::Relaxed);
        self.delivered.store(0, Ordering::Relaxed);
        self.underflow.store(0, Ordering::Relaxed);
    }

    /// Frames taken from the input driver
    pub fn captured(&self) -> u64 {
        self.captured.load(Ordering::Relaxed)
    }

    /// Input frames lost to a full ingress queue or an empty pool
    pub fn dropped_input(&self) -> u64 {
        self.dropped_input.load(Ordering::Relaxed)
    }

    /// Frames run through the effect chain
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Processed frames lost to a full egress queue
    pub fn dropped_output(&self) -> u64 {
        self.dropped_output.load(Ordering::Relaxed)
    }

    /// Frames copied into the output driver
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Output blocks rendered as silence
    pub fn underflow(&self) -> u64 {
        self.underflow.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Bounded queue pair with a preallocated frame pool
pub struct FrameBridge {
    ingress: ArrayQueue<AudioFrame>,
    egress: ArrayQueue<AudioFrame>,
    pool: ArrayQueue<AudioFrame>,
    capacity: usize,
    frame_len: usize,
    channels: u16,
    next_sequence: AtomicU64,
    counters: Arc<BridgeCounters>,
    worker: Unparker,
}

impl FrameBridge {
    /// Allocate a bridge for one session
    ///
    /// `capacity` is the per-direction queue depth (at least 1) and
    /// `frame_len` the interleaved sample count of one block. Returns the
    /// bridge plus the waiter the processing worker parks on.
    pub fn new(
        capacity: usize,
        frame_len: usize,
        channels: u16,
        counters: Arc<BridgeCounters>,
    ) -> (Arc<Self>, IngressWaiter) {
        let capacity = capacity.max(1);
        let frame_len = frame_len.max(1);
        let pool_size = capacity * 2 + 4;

        let pool = ArrayQueue::new(pool_size);
        for _ in 0..pool_size {
            let _ = pool.push(AudioFrame::silence(frame_len, channels));
        }

        let parker = Parker::new();
        let bridge = Arc::new(Self {
            ingress: ArrayQueue::new(capacity),
            egress: ArrayQueue::new(capacity),
            pool,
            capacity,
            frame_len,
            channels,
            next_sequence: AtomicU64::new(0),
            counters,
            worker: parker.unparker().clone(),
        });

        let waiter = IngressWaiter {
            bridge: bridge.clone(),
            parker,
        };
        (bridge, waiter)
    }

    /// Queue depth per direction
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Interleaved samples per frame
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn counters(&self) -> &Arc<BridgeCounters> {
        &self.counters
    }

    /// Frames waiting for the worker
    pub fn ingress_len(&self) -> usize {
        self.ingress.len()
    }

    /// Frames waiting for the output callback
    pub fn egress_len(&self) -> usize {
        self.egress.len()
    }

    /// Free frames in the pool
    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Input side (driver thread)
    // ─────────────────────────────────────────────────────────────────────

    /// Queue a captured frame, dropping the oldest one if the queue is full
    pub fn push_ingress(&self, frame: AudioFrame) -> PushOutcome {
        let outcome = match self.ingress.force_push(frame) {
            Some(oldest) => {
                self.counters.dropped_input.fetch_add(1, Ordering::Relaxed);
                self.recycle(oldest);
                PushOutcome::Overflowed
            }
            None => PushOutcome::Queued,
        };
        self.worker.unpark();
        outcome
    }

    /// Copy a driver block into pooled frames and queue them
    ///
    /// A block longer than one frame is split; a short one is zero-padded.
    pub fn capture(&self, samples: &[Sample]) -> PushOutcome {
        let mut outcome = PushOutcome::Queued;
        let now = Instant::now();

        for chunk in samples.chunks(self.frame_len) {
            let Some(mut frame) = self.pool.pop() else {
                self.counters.dropped_input.fetch_add(1, Ordering::Relaxed);
                outcome = PushOutcome::Overflowed;
                continue;
            };
            let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
            frame.fill_from(chunk, sequence, now);
            self.counters.captured.fetch_add(1, Ordering::Relaxed);

            if self.push_ingress(frame) == PushOutcome::Overflowed {
                outcome = PushOutcome::Overflowed;
            }
        }
        outcome
    }

    // ─────────────────────────────────────────────────────────────────────
    // Worker side
    // ─────────────────────────────────────────────────────────────────────

    /// Take the oldest captured frame, if any
    pub fn pop_ingress(&self) -> Option<AudioFrame> {
        self.ingress.pop()
    }

    /// Queue a processed frame, dropping the oldest one if the queue is full
    pub fn push_egress(&self, frame: AudioFrame) -> PushOutcome {
        match self.egress.force_push(frame) {
            Some(oldest) => {
                self.counters.dropped_output.fetch_add(1, Ordering::Relaxed);
                self.recycle(oldest);
                PushOutcome::Overflowed
            }
            None => PushOutcome::Queued,
        }
    }

    /// Wake the worker if it is parked on ingress
    pub fn wake_worker(&self) {
        self.worker.unpark();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Output side (driver thread)
    // ─────────────────────────────────────────────────────────────────────

    /// Take the oldest processed frame, if any
    pub fn pop_egress(&self) -> Option<AudioFrame> {
        self.egress.pop()
    }

    /// Fill a driver output block from processed frames
    ///
    /// Every sample of `output` is written. Blocks with nothing queued are
    /// silence and count as underflow.
    pub fn fill_output(&self, output: &mut [Sample]) -> PopOutcome {
        let mut outcome = PopOutcome::Underflow;
        let mut underflowed = false;

        for chunk in output.chunks_mut(self.frame_len) {
            match self.egress.pop() {
                Some(frame) => {
                    frame.copy_to(chunk);
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                    outcome = PopOutcome::Frame {
                        sequence: frame.sequence(),
                    };
                    self.recycle(frame);
                }
                None => {
                    chunk.fill(0.0);
                    self.counters.underflow.fetch_add(1, Ordering::Relaxed);
                    underflowed = true;
                }
            }
        }

        if underflowed {
            PopOutcome::Underflow
        } else {
            outcome
        }
    }

    /// Return a frame to the free pool
    ///
    /// Frames that did not come from the pool are dropped once it is full.
    pub fn recycle(&self, frame: AudioFrame) {
        let _ = self.pool.push(frame);
    }
}

/// The worker's end of the ingress queue
///
/// Parks the calling thread until a frame is captured or the timeout
/// elapses. Owned by exactly one thread.
pub struct IngressWaiter {
    bridge: Arc<FrameBridge>,
    parker: Parker,
}

impl IngressWaiter {
    pub fn bridge(&self) -> &Arc<FrameBridge> {
        &self.bridge
    }

    /// Pop a captured frame, waiting up to `timeout` for one to arrive
    pub fn pop_ingress_timeout(&self, timeout: Duration) -> Option<AudioFrame> {
        if let Some(frame) = self.bridge.pop_ingress() {
            return Some(frame);
        }
        self.parker.park_timeout(timeout);
        self.bridge.pop_ingress()
    }
}
