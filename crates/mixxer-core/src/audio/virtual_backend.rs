//! In-process audio backend
//!
//! Software devices whose callbacks are driven by the caller instead of a
//! hardware clock. `feed_input` and `pull_output` invoke the installed stream
//! callback exactly as a driver thread would, which makes the whole engine
//! testable without audio hardware and usable for headless loopback.
//!
//! The backend can also simulate the awkward cases: busy devices, hot-unplug,
//! stream errors and a driver layer that cannot be enumerated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::backend::{AudioBackend, BackendStream, ErrorCallback, StreamCallback};
use super::config::{DeviceId, StreamConfig};
use super::device::DeviceDescriptor;
use super::error::{AudioError, AudioResult, DeviceOpenError};
use crate::types::{Direction, Sample};

/// Host name reported for virtual devices
pub const VIRTUAL_HOST: &str = "Virtual";

/// A software device definition
#[derive(Debug, Clone)]
pub struct VirtualDevice {
    id: DeviceId,
    max_input_channels: u16,
    max_output_channels: u16,
    default_input: bool,
    default_output: bool,
    busy: bool,
    sample_rates: Vec<u32>,
}

impl VirtualDevice {
    /// Create a device with the given channel capabilities
    pub fn new(name: &str, max_input_channels: u16, max_output_channels: u16) -> Self {
        Self {
            id: DeviceId::with_host(name, VIRTUAL_HOST),
            max_input_channels,
            max_output_channels,
            default_input: false,
            default_output: false,
            busy: false,
            sample_rates: Vec::new(),
        }
    }

    /// Mark as the default input device
    pub fn default_input(mut self) -> Self {
        self.default_input = true;
        self
    }

    /// Mark as the default output device
    pub fn default_output(mut self) -> Self {
        self.default_output = true;
        self
    }

    /// Mark as claimed by another application
    pub fn busy(mut self) -> Self {
        self.busy = true;
        self
    }

    /// Restrict the accepted sample rates (empty = any rate)
    pub fn with_sample_rates(mut self, rates: &[u32]) -> Self {
        self.sample_rates = rates.to_vec();
        self
    }

    /// Device identifier
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    fn descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor {
            id: self.id.clone(),
            name: self.id.name.clone(),
            host: VIRTUAL_HOST.to_string(),
            max_input_channels: self.max_input_channels,
            max_output_channels: self.max_output_channels,
            is_default_input: self.default_input,
            is_default_output: self.default_output,
        }
    }
}

/// Installed callback of one open virtual stream
struct StreamSlot {
    callback: Mutex<Option<StreamCallback>>,
    on_error: Mutex<ErrorCallback>,
    playing: AtomicBool,
}

type StreamKey = (String, Direction);

#[derive(Default)]
struct BackendState {
    devices: Vec<VirtualDevice>,
    streams: HashMap<StreamKey, Arc<StreamSlot>>,
    enumeration_fails: bool,
}

/// Backend of caller-driven software devices
#[derive(Default)]
pub struct VirtualBackend {
    state: Arc<Mutex<BackendState>>,
}

impl VirtualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device (builder style)
    pub fn with_device(self, device: VirtualDevice) -> Self {
        self.add_device(device);
        self
    }

    /// Plug in a device
    pub fn add_device(&self, device: VirtualDevice) {
        let mut state = self.lock();
        state.devices.retain(|d| !d.id.matches(&device.id));
        state.devices.push(device);
    }

    /// Unplug a device; open streams keep their callback until closed
    pub fn remove_device(&self, id: &DeviceId) {
        self.lock().devices.retain(|d| !d.id.matches(id));
    }

    /// Mark a device as claimed (or released) by another application
    pub fn set_busy(&self, id: &DeviceId, busy: bool) {
        for device in self.lock().devices.iter_mut().filter(|d| d.id.matches(id)) {
            device.busy = busy;
        }
    }

    /// Make `devices()` fail as if the driver layer were unavailable
    pub fn set_enumeration_failure(&self, fails: bool) {
        self.lock().enumeration_fails = fails;
    }

    /// Deliver a captured block to the input stream on `device`
    ///
    /// Returns false when no playing input stream is open on the device.
    pub fn feed_input(&self, device: &DeviceId, samples: &[Sample]) -> bool {
        let Some(slot) = self.slot(device, Direction::Input) else {
            return false;
        };
        if !slot.playing.load(Ordering::Acquire) {
            return false;
        }
        let mut callback = slot.callback.lock().unwrap_or_else(PoisonError::into_inner);
        match callback.as_mut() {
            Some(StreamCallback::Input(handler)) => {
                handler.on_input(samples);
                true
            }
            _ => false,
        }
    }

    /// Request one block from the output stream on `device`
    ///
    /// Returns false (and writes silence) when no playing output stream is open.
    pub fn pull_output(&self, device: &DeviceId, output: &mut [Sample]) -> bool {
        let delivered = self.slot(device, Direction::Output).is_some_and(|slot| {
            if !slot.playing.load(Ordering::Acquire) {
                return false;
            }
            let mut callback = slot.callback.lock().unwrap_or_else(PoisonError::into_inner);
            match callback.as_mut() {
                Some(StreamCallback::Output(handler)) => {
                    handler.on_output(output);
                    true
                }
                _ => false,
            }
        });
        if !delivered {
            output.fill(0.0);
        }
        delivered
    }

    /// Report a driver error on an open stream
    pub fn raise_stream_error(
        &self,
        device: &DeviceId,
        direction: Direction,
        message: &str,
    ) -> bool {
        match self.slot(device, direction) {
            Some(slot) => {
                let mut on_error = slot.on_error.lock().unwrap_or_else(PoisonError::into_inner);
                (on_error)(message.to_string());
                true
            }
            None => false,
        }
    }

    /// Whether a stream is open (playing or paused) on a device
    pub fn is_open(&self, device: &DeviceId, direction: Direction) -> bool {
        self.slot(device, direction).is_some()
    }

    /// Whether a stream is open and delivering callbacks
    pub fn is_playing(&self, device: &DeviceId, direction: Direction) -> bool {
        self.slot(device, direction)
            .is_some_and(|slot| slot.playing.load(Ordering::Acquire))
    }

    /// Number of open streams across all devices
    pub fn open_stream_count(&self) -> usize {
        self.lock().streams.len()
    }

    fn slot(&self, device: &DeviceId, direction: Direction) -> Option<Arc<StreamSlot>> {
        self.lock()
            .streams
            .get(&(device.name.clone(), direction))
            .cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AudioBackend for VirtualBackend {
    fn name(&self) -> &str {
        VIRTUAL_HOST
    }

    fn devices(&self) -> AudioResult<Vec<DeviceDescriptor>> {
        let state = self.lock();
        if state.enumeration_fails {
            return Err(AudioError::DeviceEnumeration(
                "virtual driver layer unavailable".to_string(),
            ));
        }
        Ok(state.devices.iter().map(VirtualDevice::descriptor).collect())
    }

    fn default_device(&self, direction: Direction) -> Option<DeviceId> {
        self.lock()
            .devices
            .iter()
            .find(|d| match direction {
                Direction::Input => d.default_input,
                Direction::Output => d.default_output,
            })
            .map(|d| d.id.clone())
    }

    fn open_stream(
        &self,
        device: &DeviceId,
        config: &StreamConfig,
        callback: StreamCallback,
        on_error: ErrorCallback,
    ) -> Result<Box<dyn BackendStream>, DeviceOpenError> {
        let direction = callback.direction();
        let mut state = self.lock();

        let found = state
            .devices
            .iter()
            .find(|d| d.id.matches(device))
            .ok_or_else(|| DeviceOpenError::NotFound {
                direction,
                device: device.clone(),
            })?;

        let available = found.descriptor().max_channels(direction);
        if available < config.channels {
            return Err(DeviceOpenError::Unsupported {
                direction,
                device: found.id.clone(),
                reason: format!("{} channels requested, device has {}", config.channels, available),
            });
        }
        if !found.sample_rates.is_empty() && !found.sample_rates.contains(&config.sample_rate) {
            return Err(DeviceOpenError::Unsupported {
                direction,
                device: found.id.clone(),
                reason: format!("{}Hz not supported", config.sample_rate),
            });
        }

        let key = (found.id.name.clone(), direction);
        if found.busy || state.streams.contains_key(&key) {
            return Err(DeviceOpenError::Busy {
                direction,
                device: found.id.clone(),
            });
        }

        let slot = Arc::new(StreamSlot {
            callback: Mutex::new(Some(callback)),
            on_error: Mutex::new(on_error),
            playing: AtomicBool::new(false),
        });
        state.streams.insert(key.clone(), slot.clone());

        Ok(Box::new(VirtualStream {
            key,
            slot,
            state: Arc::clone(&self.state),
        }))
    }
}

/// Handle to an open virtual stream
struct VirtualStream {
    key: StreamKey,
    slot: Arc<StreamSlot>,
    state: Arc<Mutex<BackendState>>,
}

impl BackendStream for VirtualStream {
    fn play(&mut self) -> AudioResult<()> {
        self.slot.playing.store(true, Ordering::Release);
        Ok(())
    }

    fn pause(&mut self) -> AudioResult<()> {
        self.slot.playing.store(false, Ordering::Release);
        // Wait for an in-flight callback, like a driver's stop call
        drop(self.slot.callback.lock().unwrap_or_else(PoisonError::into_inner));
        Ok(())
    }
}

impl Drop for VirtualStream {
    fn drop(&mut self) {
        self.slot.playing.store(false, Ordering::Release);
        self.slot
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .streams
            .remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::{InputHandler, OutputHandler};
    use std::sync::atomic::AtomicUsize;

    struct CountingInput(Arc<AtomicUsize>);

    impl InputHandler for CountingInput {
        fn on_input(&mut self, samples: &[Sample]) {
            self.0.fetch_add(samples.len(), Ordering::Relaxed);
        }
    }

    struct ConstantOutput(Sample);

    impl OutputHandler for ConstantOutput {
        fn on_output(&mut self, output: &mut [Sample]) {
            output.fill(self.0);
        }
    }

    fn no_errors() -> ErrorCallback {
        Box::new(|_| {})
    }

    #[test]
    fn test_feed_input_reaches_handler_only_while_playing() {
        let backend = VirtualBackend::new().with_device(VirtualDevice::new("Mic", 2, 0));
        let id = DeviceId::new("Mic");
        let count = Arc::new(AtomicUsize::new(0));

        let mut stream = backend
            .open_stream(
                &id,
                &StreamConfig::default(),
                StreamCallback::Input(Box::new(CountingInput(count.clone()))),
                no_errors(),
            )
            .unwrap();

        assert!(!backend.feed_input(&id, &[0.0; 4]));
        stream.play().unwrap();
        assert!(backend.feed_input(&id, &[0.0; 4]));
        assert_eq!(count.load(Ordering::Relaxed), 4);

        stream.pause().unwrap();
        assert!(!backend.feed_input(&id, &[0.0; 4]));

        drop(stream);
        assert!(!backend.is_open(&id, Direction::Input));
        assert_eq!(backend.open_stream_count(), 0);
    }

    #[test]
    fn test_pull_output_writes_silence_without_stream() {
        let backend = VirtualBackend::new().with_device(VirtualDevice::new("Out", 0, 2));
        let id = DeviceId::new("Out");
        let mut out = [1.0; 4];
        assert!(!backend.pull_output(&id, &mut out));
        assert_eq!(out, [0.0; 4]);

        let mut stream = backend
            .open_stream(
                &id,
                &StreamConfig::default(),
                StreamCallback::Output(Box::new(ConstantOutput(0.25))),
                no_errors(),
            )
            .unwrap();
        stream.play().unwrap();
        assert!(backend.pull_output(&id, &mut out));
        assert_eq!(out, [0.25; 4]);
    }

    #[test]
    fn test_open_rejects_busy_and_duplicate_streams() {
        let backend = VirtualBackend::new()
            .with_device(VirtualDevice::new("Mic", 2, 0))
            .with_device(VirtualDevice::new("Taken", 2, 0).busy());

        let err = backend
            .open_stream(
                &DeviceId::new("Taken"),
                &StreamConfig::default(),
                StreamCallback::Input(Box::new(CountingInput(Arc::default()))),
                no_errors(),
            )
            .err()
            .unwrap();
        assert!(matches!(err, DeviceOpenError::Busy { .. }));

        let _first = backend
            .open_stream(
                &DeviceId::new("Mic"),
                &StreamConfig::default(),
                StreamCallback::Input(Box::new(CountingInput(Arc::default()))),
                no_errors(),
            )
            .unwrap();
        let second = backend.open_stream(
            &DeviceId::new("Mic"),
            &StreamConfig::default(),
            StreamCallback::Input(Box::new(CountingInput(Arc::default()))),
            no_errors(),
        );
        assert!(matches!(second.err(), Some(DeviceOpenError::Busy { .. })));
    }

    #[test]
    fn test_open_rejects_unsupported_config() {
        let backend = VirtualBackend::new()
            .with_device(VirtualDevice::new("Mono", 1, 0).with_sample_rates(&[48000]));
        let id = DeviceId::new("Mono");

        let stereo = backend.open_stream(
            &id,
            &StreamConfig { sample_rate: 48000, channels: 2, block_size: 64 },
            StreamCallback::Input(Box::new(CountingInput(Arc::default()))),
            no_errors(),
        );
        assert!(matches!(stereo.err(), Some(DeviceOpenError::Unsupported { .. })));

        let wrong_rate = backend.open_stream(
            &id,
            &StreamConfig { sample_rate: 44100, channels: 1, block_size: 64 },
            StreamCallback::Input(Box::new(CountingInput(Arc::default()))),
            no_errors(),
        );
        assert!(matches!(wrong_rate.err(), Some(DeviceOpenError::Unsupported { .. })));
    }

    #[test]
    fn test_stream_error_reaches_callback() {
        let backend = VirtualBackend::new().with_device(VirtualDevice::new("Out", 0, 2));
        let id = DeviceId::new("Out");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let _stream = backend
            .open_stream(
                &id,
                &StreamConfig::default(),
                StreamCallback::Output(Box::new(ConstantOutput(0.0))),
                Box::new(move |msg| sink.lock().unwrap().push(msg)),
            )
            .unwrap();

        assert!(backend.raise_stream_error(&id, Direction::Output, "device unplugged"));
        assert_eq!(seen.lock().unwrap().as_slice(), ["device unplugged".to_string()]);
    }
}
