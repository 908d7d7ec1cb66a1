//! Engine state and lock-free metrics
//!
//! The engine owns the session; other threads observe it through an
//! [`EngineMonitor`], which only reads atomics.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::bridge::BridgeCounters;

/// Lifecycle state of an [`AudioEngine`](super::AudioEngine)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EngineState {
    Idle = 0,
    Starting = 1,
    Running = 2,
    Reconfiguring = 3,
    Stopping = 4,
    Error = 5,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => EngineState::Starting,
            2 => EngineState::Running,
            3 => EngineState::Reconfiguring,
            4 => EngineState::Stopping,
            5 => EngineState::Error,
            _ => EngineState::Idle,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EngineState::Idle => "idle",
            EngineState::Starting => "starting",
            EngineState::Running => "running",
            EngineState::Reconfiguring => "reconfiguring",
            EngineState::Stopping => "stopping",
            EngineState::Error => "error",
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Snapshot of the frame counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineMetrics {
    /// Input frames dropped (ingress overflow or empty pool)
    pub dropped_input: u64,
    /// Processed frames dropped (egress overflow)
    pub dropped_output: u64,
    /// Output blocks rendered as silence
    pub underflow: u64,
    pub captured: u64,
    pub processed: u64,
    pub delivered: u64,
}

impl EngineMetrics {
    /// Whether every counter is zero
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl std::fmt::Display for EngineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "captured={} processed={} delivered={} dropped_in={} dropped_out={} underflow={}",
            self.captured,
            self.processed,
            self.delivered,
            self.dropped_input,
            self.dropped_output,
            self.underflow
        )
    }
}

/// Atomic engine state shared with observers
pub struct EngineAtomics {
    state: AtomicU8,
    counters: Arc<BridgeCounters>,
}

impl EngineAtomics {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(EngineState::Idle as u8),
            counters: Arc::new(BridgeCounters::new()),
        }
    }

    /// Current state (lock-free)
    #[inline]
    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Store a new state, returning the previous one
    pub(crate) fn swap_state(&self, state: EngineState) -> EngineState {
        EngineState::from_u8(self.state.swap(state as u8, Ordering::AcqRel))
    }

    /// Counters handed to each session's bridge
    pub fn counters(&self) -> &Arc<BridgeCounters> {
        &self.counters
    }

    /// Snapshot of all counters (lock-free)
    pub fn metrics(&self) -> EngineMetrics {
        let c = &self.counters;
        EngineMetrics {
            dropped_input: c.dropped_input(),
            dropped_output: c.dropped_output(),
            underflow: c.underflow(),
            captured: c.captured(),
            processed: c.processed(),
            delivered: c.delivered(),
        }
    }
}

impl Default for EngineAtomics {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of an engine, usable from any thread
#[derive(Clone)]
pub struct EngineMonitor {
    atomics: Arc<EngineAtomics>,
}

impl EngineMonitor {
    pub(crate) fn new(atomics: Arc<EngineAtomics>) -> Self {
        Self { atomics }
    }

    pub fn state(&self) -> EngineState {
        self.atomics.state()
    }

    pub fn metrics(&self) -> EngineMetrics {
        self.atomics.metrics()
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips_through_atomic() {
        let atomics = EngineAtomics::new();
        assert_eq!(atomics.state(), EngineState::Idle);

        for state in [
            EngineState::Starting,
            EngineState::Running,
            EngineState::Reconfiguring,
            EngineState::Stopping,
            EngineState::Error,
        ] {
            atomics.swap_state(state);
            assert_eq!(atomics.state(), state);
        }
        assert_eq!(atomics.swap_state(EngineState::Idle), EngineState::Error);
    }

    #[test]
    fn test_monitor_sees_counters() {
        let atomics = Arc::new(EngineAtomics::new());
        let monitor = EngineMonitor::new(atomics.clone());
        assert!(monitor.metrics().is_zero());

        atomics.counters().record_processed();
        assert_eq!(monitor.metrics().processed, 1);
        assert!(!monitor.is_running());
    }
}
