//! Deferred reclamation for frame snapshots
//!
//! The worker publishes a copy of every processed frame through a
//! `basedrop::SharedCell`. Replacing a snapshot only enqueues the old one;
//! the collector thread owned by the engine frees it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use basedrop::{Collector, Handle};

use super::error::EngineError;

const COLLECT_INTERVAL: Duration = Duration::from_millis(50);

/// Collector thread (`mixxer-gc`) owned by one engine
pub struct GarbageCollector {
    handle: Handle,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl GarbageCollector {
    /// Spawn the collector thread
    pub fn spawn() -> Result<Self, EngineError> {
        let (tx, rx) = crossbeam::channel::bounded(1);
        let running = Arc::new(AtomicBool::new(true));

        let thread = thread::Builder::new()
            .name("mixxer-gc".to_string())
            .spawn({
                let running = running.clone();
                move || {
                    // Collector is !Sync: create it on this thread
                    let mut collector = Collector::new();
                    if tx.send(collector.handle()).is_err() {
                        return;
                    }

                    while running.load(Ordering::Acquire) {
                        collector.collect();
                        thread::park_timeout(COLLECT_INTERVAL);
                    }

                    collector.collect();
                    if let Err(collector) = collector.try_cleanup() {
                        // Snapshots still held by callers outlive the engine
                        log::debug!("Frame snapshots still referenced at shutdown, leaking them");
                        std::mem::forget(collector);
                    }
                }
            })
            .map_err(|e| EngineError::WorkerSpawn(e.to_string()))?;

        let handle = rx
            .recv()
            .map_err(|_| EngineError::WorkerSpawn("collector thread exited early".to_string()))?;

        Ok(Self {
            handle,
            running,
            thread: Some(thread),
        })
    }

    /// Handle for creating `Shared<T>` allocations
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Drop for GarbageCollector {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                log::error!("mixxer-gc thread panicked");
            }
        }
    }
}
