//! Stream lifecycle: open, close and swap device streams
//!
//! Every callback installed on a backend stream is wrapped in a gate. The
//! callback only runs while it can `try_lock` the gate and the gate is open;
//! closing takes the lock (waiting out an in-flight callback) and shuts the
//! gate before the stream is paused and dropped. A closed stream can therefore
//! never touch the bridge again, whatever the driver does afterwards.

use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

use super::backend::{AudioBackend, BackendStream, InputHandler, OutputHandler, StreamCallback};
use super::config::{DeviceId, StreamConfig};
use super::error::DeviceOpenError;
use crate::bridge::{FrameBridge, InputAdapter, OutputAdapter};
use crate::types::{Direction, Sample};

/// Receives driver errors reported on open streams
pub type StreamErrorSink = Arc<dyn Fn(Direction, String) + Send + Sync>;

/// Identifies one open stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHandle {
    direction: Direction,
    device: DeviceId,
    id: u64,
}

impl StreamHandle {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }
}

/// Failure while swapping a stream to another device
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SwapError {
    /// Nothing is open in the direction
    #[error("No {0} stream is open")]
    NotOpen(Direction),

    /// The new device failed; the previous device was reopened
    #[error("{error} (kept {restored})")]
    RolledBack {
        error: DeviceOpenError,
        restored: DeviceId,
    },

    /// The new device failed and the previous one could not be reopened
    #[error("{error}; reopening the previous device also failed: {reopen_error}")]
    Closed {
        error: DeviceOpenError,
        reopen_error: DeviceOpenError,
    },
}

impl SwapError {
    /// The error that caused the swap to fail
    pub fn cause(&self) -> Option<&DeviceOpenError> {
        match self {
            SwapError::NotOpen(_) => None,
            SwapError::RolledBack { error, .. } | SwapError::Closed { error, .. } => Some(error),
        }
    }
}

struct StreamGate {
    open: Mutex<bool>,
}

impl StreamGate {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            open: Mutex::new(true),
        })
    }

    /// Run a callback body if the gate is open
    ///
    /// Never blocks: a callback racing with `shut` is skipped.
    fn run<R>(&self, body: impl FnOnce() -> R) -> Option<R> {
        match self.open.try_lock() {
            Ok(open) if *open => Some(body()),
            _ => None,
        }
    }

    /// Block until no callback holds the gate, then close it
    fn shut(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }
}

struct GatedInput<H> {
    gate: Arc<StreamGate>,
    inner: H,
}

impl<H: InputHandler> InputHandler for GatedInput<H> {
    fn on_input(&mut self, samples: &[Sample]) {
        let inner = &mut self.inner;
        self.gate.run(|| inner.on_input(samples));
    }
}

struct GatedOutput {
    gate: Arc<StreamGate>,
    inner: OutputAdapter,
}

impl OutputHandler for GatedOutput {
    fn on_output(&mut self, output: &mut [Sample]) {
        let inner = &mut self.inner;
        if self.gate.run(|| inner.on_output(output)).is_none() {
            output.fill(0.0);
        }
    }
}

struct OpenStream {
    handle: StreamHandle,
    config: StreamConfig,
    bridge: Arc<FrameBridge>,
    gate: Arc<StreamGate>,
    stream: Box<dyn BackendStream>,
}

/// Owns the open input and output streams of a session
pub struct StreamLifecycleController {
    backend: Arc<dyn AudioBackend>,
    on_error: StreamErrorSink,
    input: Option<OpenStream>,
    output: Option<OpenStream>,
    next_id: u64,
}

impl StreamLifecycleController {
    pub fn new(backend: Arc<dyn AudioBackend>, on_error: StreamErrorSink) -> Self {
        Self {
            backend,
            on_error,
            input: None,
            output: None,
            next_id: 1,
        }
    }

    /// Open and start a stream wired to `bridge`
    ///
    /// Fails with `Busy` if the direction already has an open stream.
    pub fn open(
        &mut self,
        direction: Direction,
        device: &DeviceId,
        config: &StreamConfig,
        bridge: &Arc<FrameBridge>,
    ) -> Result<StreamHandle, DeviceOpenError> {
        if let Some(current) = self.slot(direction) {
            return Err(DeviceOpenError::Busy {
                direction,
                device: current.handle.device.clone(),
            });
        }

        let gate = StreamGate::new();
        let callback = match direction {
            Direction::Input => StreamCallback::Input(Box::new(GatedInput {
                gate: gate.clone(),
                inner: InputAdapter::new(bridge.clone()),
            })),
            Direction::Output => StreamCallback::Output(Box::new(GatedOutput {
                gate: gate.clone(),
                inner: OutputAdapter::new(bridge.clone()),
            })),
        };
        let sink = self.on_error.clone();
        let on_error = Box::new(move |message: String| sink(direction, message));

        let mut stream = self
            .backend
            .open_stream(device, config, callback, on_error)?;
        stream.play().map_err(|e| DeviceOpenError::Backend {
            direction,
            device: device.clone(),
            message: e.to_string(),
        })?;

        let handle = StreamHandle {
            direction,
            device: device.clone(),
            id: self.next_id,
        };
        self.next_id += 1;
        log::info!("{} stream open on {}", direction, device);

        *self.slot_mut(direction) = Some(OpenStream {
            handle: handle.clone(),
            config: *config,
            bridge: bridge.clone(),
            gate,
            stream,
        });
        Ok(handle)
    }

    /// Close the stream behind `handle`
    ///
    /// Returns once no callback is running. Returns false if the handle no
    /// longer names the open stream.
    pub fn close(&mut self, handle: &StreamHandle) -> bool {
        let slot = self.slot_mut(handle.direction);
        if slot.as_ref().map(|s| &s.handle) != Some(handle) {
            return false;
        }
        match slot.take() {
            Some(open) => {
                Self::shutdown(open);
                true
            }
            None => false,
        }
    }

    /// Close both streams
    pub fn close_all(&mut self) {
        for direction in Direction::ALL {
            if let Some(open) = self.slot_mut(direction).take() {
                Self::shutdown(open);
            }
        }
    }

    /// Move one direction to another device, leaving the other untouched
    ///
    /// The old stream is closed before the new one opens. If the new device
    /// fails, the old device is reopened with the same config and bridge.
    pub fn swap(
        &mut self,
        direction: Direction,
        device: &DeviceId,
    ) -> Result<StreamHandle, SwapError> {
        let current = self
            .slot_mut(direction)
            .take()
            .ok_or(SwapError::NotOpen(direction))?;
        let previous = current.handle.device.clone();
        let config = current.config;
        let bridge = current.bridge.clone();
        Self::shutdown(current);

        match self.open(direction, device, &config, &bridge) {
            Ok(handle) => {
                log::info!("Swapped {} from {} to {}", direction, previous, device);
                Ok(handle)
            }
            Err(error) => {
                log::warn!("Swapping {} to {} failed: {}", direction, device, error);
                match self.open(direction, &previous, &config, &bridge) {
                    Ok(_) => Err(SwapError::RolledBack {
                        error,
                        restored: previous,
                    }),
                    Err(reopen_error) => {
                        log::error!(
                            "Could not reopen {} on {}: {}",
                            direction,
                            previous,
                            reopen_error
                        );
                        Err(SwapError::Closed {
                            error,
                            reopen_error,
                        })
                    }
                }
            }
        }
    }

    pub fn is_open(&self, direction: Direction) -> bool {
        self.slot(direction).is_some()
    }

    /// Device of the open stream in a direction
    pub fn device(&self, direction: Direction) -> Option<&DeviceId> {
        self.slot(direction).map(|s| &s.handle.device)
    }

    /// Handle of the open stream in a direction
    pub fn handle(&self, direction: Direction) -> Option<&StreamHandle> {
        self.slot(direction).map(|s| &s.handle)
    }

    fn shutdown(mut open: OpenStream) {
        open.gate.shut();
        if let Err(e) = open.stream.pause() {
            log::warn!(
                "Pausing {} stream on {} failed: {}",
                open.handle.direction,
                open.handle.device,
                e
            );
        }
        log::info!("{} stream closed on {}", open.handle.direction, open.handle.device);
    }

    fn slot(&self, direction: Direction) -> Option<&OpenStream> {
        match direction {
            Direction::Input => self.input.as_ref(),
            Direction::Output => self.output.as_ref(),
        }
    }

    fn slot_mut(&mut self, direction: Direction) -> &mut Option<OpenStream> {
        match direction {
            Direction::Input => &mut self.input,
            Direction::Output => &mut self.output,
        }
    }
}

impl Drop for StreamLifecycleController {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::virtual_backend::{VirtualBackend, VirtualDevice};
    use crate::bridge::BridgeCounters;
    use crossbeam::channel::{self, Receiver, Sender};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    struct Fixture {
        backend: Arc<VirtualBackend>,
        controller: StreamLifecycleController,
        bridge: Arc<FrameBridge>,
        errors: Arc<Mutex<Vec<(Direction, String)>>>,
        config: StreamConfig,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(
            VirtualBackend::new()
                .with_device(VirtualDevice::new("Mic A", 2, 0))
                .with_device(VirtualDevice::new("Mic B", 2, 0))
                .with_device(VirtualDevice::new("Speakers", 0, 2)),
        );
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink: StreamErrorSink = {
            let errors = errors.clone();
            Arc::new(move |direction: Direction, message: String| {
                errors.lock().unwrap().push((direction, message))
            })
        };
        let config = StreamConfig {
            sample_rate: 48000,
            channels: 2,
            block_size: 2,
        };
        let (bridge, _waiter) =
            FrameBridge::new(4, config.frame_len(), 2, Arc::new(BridgeCounters::new()));
        Fixture {
            controller: StreamLifecycleController::new(backend.clone(), sink),
            backend,
            bridge,
            errors,
            config,
        }
    }

    /// Input handler that stays inside the callback until released
    struct HeldInput {
        entered: Sender<()>,
        release: Receiver<()>,
        inner: InputAdapter,
    }

    impl InputHandler for HeldInput {
        fn on_input(&mut self, samples: &[Sample]) {
            let _ = self.entered.send(());
            let _ = self.release.recv();
            self.inner.on_input(samples);
        }
    }

    struct InFlight {
        gate: Arc<StreamGate>,
        released: Arc<AtomicBool>,
        threads: Vec<JoinHandle<()>>,
    }

    /// Start an input callback on a driver thread and leave it blocked
    /// inside the gate; it is released after a delay
    fn hold_input_callback(f: &Fixture) -> InFlight {
        let gate = f.controller.input.as_ref().unwrap().gate.clone();
        let (entered_tx, entered_rx) = channel::bounded(1);
        let (release_tx, release_rx) = channel::bounded(1);
        let released = Arc::new(AtomicBool::new(false));

        let mut callback = GatedInput {
            gate: gate.clone(),
            inner: HeldInput {
                entered: entered_tx,
                release: release_rx,
                inner: InputAdapter::new(f.bridge.clone()),
            },
        };
        let driver = thread::spawn(move || callback.on_input(&[0.5; 4]));
        entered_rx.recv().unwrap();

        let releaser = thread::spawn({
            let released = released.clone();
            move || {
                thread::sleep(Duration::from_millis(50));
                released.store(true, Ordering::SeqCst);
                release_tx.send(()).unwrap();
            }
        });

        InFlight {
            gate,
            released,
            threads: vec![driver, releaser],
        }
    }

    #[test]
    fn test_close_waits_for_in_flight_callback() {
        let mut f = fixture();
        let mic = DeviceId::new("Mic A");
        let handle = f
            .controller
            .open(Direction::Input, &mic, &f.config, &f.bridge)
            .unwrap();
        let in_flight = hold_input_callback(&f);

        assert!(f.controller.close(&handle));
        assert!(in_flight.released.load(Ordering::SeqCst));
        assert_eq!(f.bridge.ingress_len(), 1);
        for t in in_flight.threads {
            t.join().unwrap();
        }

        // Nothing reaches the bridge once close has returned
        let mut late = GatedInput {
            gate: in_flight.gate,
            inner: InputAdapter::new(f.bridge.clone()),
        };
        late.on_input(&[0.25; 4]);
        assert!(!f.backend.feed_input(&mic, &[0.25; 4]));
        assert_eq!(f.bridge.ingress_len(), 1);
        assert_eq!(f.bridge.counters().captured(), 1);
    }

    #[test]
    fn test_swap_waits_for_in_flight_callback() {
        let mut f = fixture();
        f.controller
            .open(Direction::Input, &DeviceId::new("Mic A"), &f.config, &f.bridge)
            .unwrap();
        let in_flight = hold_input_callback(&f);

        f.controller
            .swap(Direction::Input, &DeviceId::new("Mic B"))
            .unwrap();
        assert!(in_flight.released.load(Ordering::SeqCst));
        for t in in_flight.threads {
            t.join().unwrap();
        }

        // The old gate stays shut; only the new stream delivers
        assert!(in_flight.gate.run(|| ()).is_none());
        assert!(f.backend.feed_input(&DeviceId::new("Mic B"), &[0.1; 4]));
        assert_eq!(f.bridge.ingress_len(), 2);
    }

    #[test]
    fn test_open_wires_callbacks_to_bridge() {
        let mut f = fixture();
        let mic = DeviceId::new("Mic A");
        f.controller
            .open(Direction::Input, &mic, &f.config, &f.bridge)
            .unwrap();

        assert!(f.backend.is_playing(&mic, Direction::Input));
        assert!(f.backend.feed_input(&mic, &[0.1, 0.2, 0.3, 0.4]));
        assert_eq!(f.bridge.ingress_len(), 1);
    }

    #[test]
    fn test_second_stream_in_direction_is_busy() {
        let mut f = fixture();
        f.controller
            .open(Direction::Input, &DeviceId::new("Mic A"), &f.config, &f.bridge)
            .unwrap();

        let err = f
            .controller
            .open(Direction::Input, &DeviceId::new("Mic B"), &f.config, &f.bridge)
            .unwrap_err();
        assert!(matches!(err, DeviceOpenError::Busy { .. }));
        assert_eq!(f.backend.open_stream_count(), 1);
    }

    #[test]
    fn test_close_stops_delivery() {
        let mut f = fixture();
        let speakers = DeviceId::new("Speakers");
        let handle = f
            .controller
            .open(Direction::Output, &speakers, &f.config, &f.bridge)
            .unwrap();

        assert!(f.controller.close(&handle));
        assert!(!f.controller.is_open(Direction::Output));
        assert!(!f.backend.is_open(&speakers, Direction::Output));

        let mut out = [1.0; 4];
        assert!(!f.backend.pull_output(&speakers, &mut out));
        assert_eq!(f.bridge.counters().underflow(), 0);

        // Stale handle
        assert!(!f.controller.close(&handle));
    }

    #[test]
    fn test_swap_keeps_other_direction_running() {
        let mut f = fixture();
        let speakers = DeviceId::new("Speakers");
        f.controller
            .open(Direction::Input, &DeviceId::new("Mic A"), &f.config, &f.bridge)
            .unwrap();
        let out_handle = f
            .controller
            .open(Direction::Output, &speakers, &f.config, &f.bridge)
            .unwrap();

        let handle = f
            .controller
            .swap(Direction::Input, &DeviceId::new("Mic B"))
            .unwrap();
        assert_eq!(handle.device(), &DeviceId::new("Mic B"));
        assert!(!f.backend.is_open(&DeviceId::new("Mic A"), Direction::Input));
        assert!(f.backend.feed_input(&DeviceId::new("Mic B"), &[0.0; 4]));

        assert_eq!(f.controller.handle(Direction::Output), Some(&out_handle));
        assert!(f.backend.is_playing(&speakers, Direction::Output));
    }

    #[test]
    fn test_failed_swap_restores_previous_device() {
        let mut f = fixture();
        let mic = DeviceId::new("Mic A");
        f.controller
            .open(Direction::Input, &mic, &f.config, &f.bridge)
            .unwrap();

        let err = f
            .controller
            .swap(Direction::Input, &DeviceId::new("Missing"))
            .unwrap_err();
        assert!(matches!(err, SwapError::RolledBack { ref restored, .. } if restored == &mic));
        assert_eq!(f.controller.device(Direction::Input), Some(&mic));
        assert!(f.backend.is_playing(&mic, Direction::Input));
    }

    #[test]
    fn test_failed_swap_without_previous_device_closes_direction() {
        let mut f = fixture();
        let mic = DeviceId::new("Mic A");
        f.controller
            .open(Direction::Input, &mic, &f.config, &f.bridge)
            .unwrap();
        f.backend.remove_device(&mic);

        let err = f
            .controller
            .swap(Direction::Input, &DeviceId::new("Missing"))
            .unwrap_err();
        assert!(matches!(err, SwapError::Closed { .. }));
        assert!(!f.controller.is_open(Direction::Input));
    }

    #[test]
    fn test_swap_requires_open_stream() {
        let mut f = fixture();
        assert_eq!(
            f.controller.swap(Direction::Output, &DeviceId::new("Speakers")),
            Err(SwapError::NotOpen(Direction::Output))
        );
    }

    #[test]
    fn test_stream_errors_reach_sink() {
        let mut f = fixture();
        let speakers = DeviceId::new("Speakers");
        f.controller
            .open(Direction::Output, &speakers, &f.config, &f.bridge)
            .unwrap();

        assert!(f
            .backend
            .raise_stream_error(&speakers, Direction::Output, "device unplugged"));
        let errors = f.errors.lock().unwrap();
        assert_eq!(errors.as_slice(), &[(Direction::Output, "device unplugged".to_string())]);
    }

    #[test]
    fn test_drop_closes_everything() {
        let f = fixture();
        let Fixture {
            backend,
            mut controller,
            bridge,
            config,
            ..
        } = f;
        controller
            .open(Direction::Input, &DeviceId::new("Mic A"), &config, &bridge)
            .unwrap();
        controller
            .open(Direction::Output, &DeviceId::new("Speakers"), &config, &bridge)
            .unwrap();
        assert_eq!(backend.open_stream_count(), 2);

        drop(controller);
        assert_eq!(backend.open_stream_count(), 0);
    }
}
