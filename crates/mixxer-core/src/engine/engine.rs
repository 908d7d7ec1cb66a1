//! Audio engine - the session state machine
//!
//! ```text
//! Idle ── start() ──► Starting ── ok ──► Running ── stop() ──► Stopping ──► Idle
//!                        │                 │  ▲
//!                        │ fail   swap()   ▼  │ ok / rolled back
//!                        │           Reconfiguring
//!                        ▼                 │ unrecoverable
//!                      Error ◄─────────────┘
//!                        └── stop() ──► Idle
//! ```
//!
//! The engine is owned by the control thread. Driver callbacks and the
//! processing worker never call back into it; they only touch the bridge,
//! the atomics and the event channel.

use std::sync::Arc;

use basedrop::{Shared, SharedCell};
use crossbeam::channel::{self, Receiver, Sender};

use super::command::{command_channel, ChainCommand};
use super::error::{EngineError, EngineResult};
use super::events::{event_channel, EngineEvent, EventSender, EVENT_QUEUE_CAPACITY};
use super::gc::GarbageCollector;
use super::state::{EngineAtomics, EngineMetrics, EngineMonitor, EngineState};
use super::worker::{FaultNotice, SpawnFailure, WorkerContext, WorkerHandle};
use crate::audio::{
    AudioBackend, AudioError, DeviceDescriptor, DeviceId, DeviceRegistry, SessionConfig,
    StreamErrorSink, StreamLifecycleController,
};
use crate::bridge::FrameBridge;
use crate::effect::{ChainLayout, EffectChain, EffectStage, StageId};
use crate::types::{AudioFrame, Direction};

/// Resources of one start → stop session
struct Session {
    config: SessionConfig,
    bridge: Arc<FrameBridge>,
    streams: StreamLifecycleController,
    worker: WorkerHandle,
    commands: rtrb::Producer<ChainCommand>,
}

/// Routes audio from an input device through an effect chain to an output device
pub struct AudioEngine {
    registry: DeviceRegistry,
    backend: Arc<dyn AudioBackend>,
    atomics: Arc<EngineAtomics>,
    events: EventSender,
    events_rx: Receiver<EngineEvent>,
    /// Chain owned by the engine while no worker runs
    chain: EffectChain,
    /// Control-side mirror of the chain, current in every state
    layout: ChainLayout,
    /// Bumped on every `set_stages`
    generation: u64,
    faults_tx: Sender<FaultNotice>,
    faults_rx: Receiver<FaultNotice>,
    session: Option<Session>,
    latest: Arc<SharedCell<AudioFrame>>,
    gc: GarbageCollector,
}

impl AudioEngine {
    /// Create an idle engine on top of a driver backend
    pub fn new(backend: Arc<dyn AudioBackend>) -> EngineResult<Self> {
        let gc = GarbageCollector::spawn()?;
        let latest = Arc::new(SharedCell::new(Shared::new(gc.handle(), AudioFrame::empty())));
        let (events, events_rx) = event_channel();
        let (faults_tx, faults_rx) = channel::bounded(EVENT_QUEUE_CAPACITY);

        log::info!("Audio engine created on {} backend", backend.name());

        Ok(Self {
            registry: DeviceRegistry::new(backend.clone()),
            backend,
            atomics: Arc::new(EngineAtomics::new()),
            events,
            events_rx,
            chain: EffectChain::empty(),
            layout: ChainLayout::default(),
            generation: 0,
            faults_tx,
            faults_rx,
            session: None,
            latest,
            gc,
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Devices
    // ─────────────────────────────────────────────────────────────────────

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Fresh list of devices with input channels
    pub fn list_input_devices(&self) -> EngineResult<Vec<DeviceDescriptor>> {
        Ok(self.registry.list_input_devices()?)
    }

    /// Fresh list of devices with output channels
    pub fn list_output_devices(&self) -> EngineResult<Vec<DeviceDescriptor>> {
        Ok(self.registry.list_output_devices()?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Start a session (Idle → Starting → Running, or → Error)
    ///
    /// On failure every partially opened stream is closed, the metrics are
    /// zero and the engine stays in `Error` until [`stop`](Self::stop).
    pub fn start(&mut self, config: SessionConfig) -> EngineResult<()> {
        let state = self.state();
        if state != EngineState::Idle {
            return Err(EngineError::InvalidState {
                operation: "start",
                state,
            });
        }

        self.set_state(EngineState::Starting);
        self.atomics.counters().reset();
        self.latest.set(Shared::new(self.gc.handle(), AudioFrame::empty()));
        self.discard_faults();

        match self.open_session(config) {
            Ok(session) => {
                let stream = session.config.stream();
                let label = |direction: Direction| {
                    session
                        .streams
                        .device(direction)
                        .map(|d| d.to_string())
                        .unwrap_or_default()
                };
                log::info!(
                    "Audio session running: {} → {} ({}Hz, {} ch, {} frames, ~{:.1}ms/block)",
                    label(Direction::Input),
                    label(Direction::Output),
                    stream.sample_rate,
                    stream.channels,
                    stream.block_size,
                    stream.latency_ms()
                );
                log::debug!("Bridge capacity {} frames per direction", session.bridge.capacity());
                self.session = Some(session);
                self.set_state(EngineState::Running);
                Ok(())
            }
            Err(err) => {
                log::error!("Audio session failed to start: {}", err);
                self.atomics.counters().reset();
                self.set_state(EngineState::Error);
                Err(err)
            }
        }
    }

    fn open_session(&mut self, mut config: SessionConfig) -> EngineResult<Session> {
        let stream = config.stream();
        stream
            .validate()
            .map_err(|msg| EngineError::StartFailed(AudioError::InvalidConfig(msg)))?;

        let input = self
            .registry
            .resolve(Direction::Input, config.input_device.as_ref(), stream.channels)
            .map_err(EngineError::StartFailed)?;
        let output = self
            .registry
            .resolve(Direction::Output, config.output_device.as_ref(), stream.channels)
            .map_err(EngineError::StartFailed)?;
        config.input_device = Some(input.id.clone());
        config.output_device = Some(output.id.clone());

        let (bridge, waiter) = FrameBridge::new(
            config.effective_capacity(),
            stream.frame_len(),
            stream.channels,
            self.atomics.counters().clone(),
        );

        let (commands, consumer) = command_channel();
        let mut chain = std::mem::take(&mut self.chain);
        chain.prepare(stream.frame_len());
        let spawned = WorkerHandle::spawn(WorkerContext {
            waiter,
            commands: consumer,
            chain,
            generation: self.generation,
            events: self.events.clone(),
            faults: self.faults_tx.clone(),
            latest: self.latest.clone(),
            gc: self.gc.handle().clone(),
        });
        let worker = match spawned {
            Ok(worker) => worker,
            Err(SpawnFailure { error, chain }) => {
                self.chain = chain;
                return Err(error);
            }
        };

        let mut streams =
            StreamLifecycleController::new(self.backend.clone(), self.stream_error_sink());
        let opened = streams
            .open(Direction::Input, &input.id, &stream, &bridge)
            .and_then(|_| streams.open(Direction::Output, &output.id, &stream, &bridge));

        if let Err(err) = opened {
            streams.close_all();
            self.chain = worker.stop();
            return Err(EngineError::StartFailed(err.into()));
        }

        Ok(Session {
            config,
            bridge,
            streams,
            worker,
            commands,
        })
    }

    /// Stop the session (→ Stopping → Idle); a no-op when already Idle
    pub fn stop(&mut self) {
        let state = self.state();
        if state == EngineState::Idle {
            return;
        }
        if state != EngineState::Error {
            self.set_state(EngineState::Stopping);
        }

        if let Some(session) = self.session.take() {
            let Session {
                mut streams,
                worker,
                ..
            } = session;
            streams.close_all();
            self.chain = worker.stop();
            self.layout = self.chain.layout();
            self.discard_faults();
            log::info!("Audio session stopped ({})", self.metrics());
        }

        self.set_state(EngineState::Idle);
    }

    /// Move the input and/or output to other devices while running
    ///
    /// Only the named directions are reopened; queued output is kept. Every
    /// requested device is resolved before any stream is touched. A device
    /// that fails to open is replaced by the previous one, and a direction
    /// already swapped in the same call is moved back, so a failed call
    /// leaves the session on its old devices and Running. If a previous
    /// device cannot be reopened the engine enters `Error`.
    pub fn swap_devices(
        &mut self,
        input: Option<DeviceId>,
        output: Option<DeviceId>,
    ) -> EngineResult<()> {
        let state = self.state();
        if state != EngineState::Running {
            return Err(EngineError::InvalidState {
                operation: "swap devices",
                state,
            });
        }
        let Some(mut session) = self.session.take() else {
            return Err(EngineError::InvalidState {
                operation: "swap devices",
                state,
            });
        };

        self.set_state(EngineState::Reconfiguring);
        let result = self.reconfigure(&mut session, input, output);
        let intact = Direction::ALL.iter().all(|d| session.streams.is_open(*d));
        self.session = Some(session);

        self.set_state(if intact {
            EngineState::Running
        } else {
            EngineState::Error
        });
        result
    }

    fn reconfigure(
        &self,
        session: &mut Session,
        input: Option<DeviceId>,
        output: Option<DeviceId>,
    ) -> EngineResult<()> {
        let channels = session.config.channels;

        let mut targets = Vec::with_capacity(Direction::ALL.len());
        for (direction, requested) in [(Direction::Input, input), (Direction::Output, output)] {
            if let Some(requested) = requested {
                let descriptor = self.registry.resolve(direction, Some(&requested), channels)?;
                targets.push((direction, descriptor.id));
            }
        }

        let mut swapped: Vec<(Direction, DeviceId)> = Vec::with_capacity(targets.len());
        let mut result: EngineResult<()> = Ok(());
        for (direction, device) in &targets {
            let previous = session.streams.device(*direction).cloned();
            match session.streams.swap(*direction, device) {
                Ok(_) => swapped.extend(previous.map(|previous| (*direction, previous))),
                Err(err) => {
                    result = Err(err.into());
                    break;
                }
            }
        }

        if result.is_err() {
            for (direction, previous) in swapped.iter().rev() {
                match session.streams.swap(*direction, previous) {
                    Ok(_) => log::info!("Moved {} back to {}", direction, previous),
                    Err(e) => {
                        log::error!("Could not move {} back to {}: {}", direction, previous, e)
                    }
                }
            }
        }

        session.config.input_device = session.streams.device(Direction::Input).cloned();
        session.config.output_device = session.streams.device(Direction::Output).cloned();
        result
    }

    // ─────────────────────────────────────────────────────────────────────
    // Effect chain
    // ─────────────────────────────────────────────────────────────────────

    /// Replace the whole chain
    ///
    /// While running, the new chain is handed to the worker and swapped in
    /// between two frames.
    pub fn set_stages(&mut self, stages: Vec<EffectStage>) -> EngineResult<()> {
        let mut chain = EffectChain::new(stages)?;
        let layout = chain.layout();
        let generation = self.generation + 1;

        match self.session.as_mut() {
            Some(session) => {
                chain.prepare(session.bridge.frame_len());
                session
                    .commands
                    .push(ChainCommand::Replace {
                        chain: Box::new(chain),
                        generation,
                    })
                    .map_err(|_| EngineError::CommandQueueFull)?;
            }
            None => self.chain = chain,
        }
        self.generation = generation;

        log::info!("Effect chain replaced ({} stages)", layout.stages().len());
        self.layout = layout;
        Ok(())
    }

    /// Set a stage parameter, effective from the next frame
    ///
    /// Out-of-range values are clamped and applied; the clamp is reported as
    /// `EffectError::ParameterOutOfRange`.
    pub fn set_effect_parameter(
        &mut self,
        stage: &StageId,
        name: &str,
        value: f32,
    ) -> EngineResult<()> {
        self.sync_faults();
        let (change, clamped) = self.layout.resolve_param(stage, name, value)?;

        match self.session.as_mut() {
            Some(session) => session
                .commands
                .push(ChainCommand::SetParam(change))
                .map_err(|_| EngineError::CommandQueueFull)?,
            None => self.chain.set_param_at(change.slot, change.param, change.value),
        }
        self.layout.record_param(change);

        match clamped {
            Some(err) => {
                log::warn!("{}", err);
                Err(err.into())
            }
            None => Ok(()),
        }
    }

    /// Enable or disable a stage without removing it
    ///
    /// Re-enabling a stage that faulted resets it and gives it another try.
    pub fn set_stage_enabled(&mut self, stage: &StageId, enabled: bool) -> EngineResult<()> {
        self.sync_faults();
        let slot = self.layout.slot_of(stage)?;

        match self.session.as_mut() {
            Some(session) => session
                .commands
                .push(ChainCommand::SetEnabled { slot, enabled })
                .map_err(|_| EngineError::CommandQueueFull)?,
            None => self.chain.set_enabled_at(slot, enabled),
        }
        self.layout.set_enabled(slot, enabled);
        Ok(())
    }

    /// Stage layout, including stages the worker disabled after a fault
    pub fn stages(&mut self) -> &ChainLayout {
        self.sync_faults();
        &self.layout
    }

    fn sync_faults(&mut self) {
        for notice in self.faults_rx.try_iter() {
            if notice.generation == self.generation {
                self.layout.mark_faulted(&notice.stage);
            }
        }
    }

    fn discard_faults(&self) {
        for _ in self.faults_rx.try_iter() {}
    }

    // ─────────────────────────────────────────────────────────────────────
    // Observation
    // ─────────────────────────────────────────────────────────────────────

    pub fn state(&self) -> EngineState {
        self.atomics.state()
    }

    /// Counters of the current (or last) session
    pub fn metrics(&self) -> EngineMetrics {
        self.atomics.metrics()
    }

    /// Most recently processed frame, if the session produced one
    pub fn latest_frame(&self) -> Option<Shared<AudioFrame>> {
        let frame = self.latest.get();
        if frame.is_empty() {
            None
        } else {
            Some(frame)
        }
    }

    /// Receiver for engine events
    pub fn events(&self) -> Receiver<EngineEvent> {
        self.events_rx.clone()
    }

    /// Cloneable read-only view for other threads
    pub fn monitor(&self) -> EngineMonitor {
        EngineMonitor::new(self.atomics.clone())
    }

    /// Config of the running session, with resolved devices
    pub fn session_config(&self) -> Option<&SessionConfig> {
        self.session.as_ref().map(|s| &s.config)
    }

    fn set_state(&self, to: EngineState) {
        let from = self.atomics.swap_state(to);
        if from != to {
            log::debug!("Engine state {} → {}", from, to);
            self.events.send(EngineEvent::StateChanged { from, to });
        }
    }

    fn stream_error_sink(&self) -> StreamErrorSink {
        let events = self.events.clone();
        Arc::new(move |direction: Direction, message: String| {
            log::error!("Audio {} stream error: {}", direction, message);
            events.send(EngineEvent::StreamError { direction, message });
        })
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
