//! Processing worker (`mixxer-dsp`)
//!
//! One worker per session. Each iteration:
//! 1. Wait up to [`INGRESS_WAIT`] for a captured frame (parked, no spinning)
//! 2. Apply every pending [`ChainCommand`]
//! 3. Run the frame through the chain and report stage faults
//! 4. Publish a snapshot, push the frame to egress
//!
//! Stopping hands the chain (with its DSP state) back to the engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use basedrop::{Handle, Shared, SharedCell};
use crossbeam::channel::Sender;

use super::command::ChainCommand;
use super::error::EngineError;
use super::events::{EngineEvent, EventSender};
use crate::bridge::{FrameBridge, IngressWaiter};
use crate::effect::{EffectChain, StageId};
use crate::types::AudioFrame;

/// Longest time the worker stays parked before rechecking for shutdown
pub const INGRESS_WAIT: Duration = Duration::from_millis(10);

/// A stage the worker disabled, tagged with the chain generation it ran in
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FaultNotice {
    pub generation: u64,
    pub stage: StageId,
}

/// Everything the worker thread owns
pub(crate) struct WorkerContext {
    pub waiter: IngressWaiter,
    pub commands: rtrb::Consumer<ChainCommand>,
    pub chain: EffectChain,
    /// Generation of `chain`
    pub generation: u64,
    pub events: EventSender,
    pub faults: Sender<FaultNotice>,
    pub latest: Arc<SharedCell<AudioFrame>>,
    pub gc: Handle,
}

/// The worker could not be started; the chain it would have run is returned
pub(crate) struct SpawnFailure {
    pub error: EngineError,
    pub chain: EffectChain,
}

/// Engine-side handle to a running worker
pub(crate) struct WorkerHandle {
    running: Arc<AtomicBool>,
    bridge: Arc<FrameBridge>,
    thread: JoinHandle<EffectChain>,
}

impl WorkerHandle {
    /// Spawn the worker thread
    pub fn spawn(context: WorkerContext) -> Result<Self, SpawnFailure> {
        Self::spawn_with(thread::Builder::new().name("mixxer-dsp".to_string()), context)
    }

    fn spawn_with(builder: thread::Builder, context: WorkerContext) -> Result<Self, SpawnFailure> {
        let running = Arc::new(AtomicBool::new(true));
        let bridge = context.waiter.bridge().clone();

        // Passed through a channel so a failed spawn can take it back
        let (tx, rx) = crossbeam::channel::bounded::<WorkerContext>(1);
        tx.send(context).map_err(|e| SpawnFailure {
            error: EngineError::WorkerSpawn("worker context not delivered".to_string()),
            chain: e.into_inner().chain,
        })?;

        let spawned = builder.spawn({
            let running = running.clone();
            let rx = rx.clone();
            move || match rx.recv() {
                Ok(context) => run(context, &running),
                Err(_) => EffectChain::empty(),
            }
        });

        match spawned {
            Ok(thread) => Ok(Self {
                running,
                bridge,
                thread,
            }),
            Err(e) => Err(SpawnFailure {
                error: EngineError::WorkerSpawn(e.to_string()),
                chain: rx.try_recv().map(|c| c.chain).unwrap_or_default(),
            }),
        }
    }

    /// Stop the worker and take back its chain
    pub fn stop(self) -> EffectChain {
        self.running.store(false, Ordering::Release);
        self.bridge.wake_worker();
        match self.thread.join() {
            Ok(chain) => chain,
            Err(_) => {
                log::error!("mixxer-dsp thread panicked, effect chain lost");
                EffectChain::empty()
            }
        }
    }
}

fn run(context: WorkerContext, running: &AtomicBool) -> EffectChain {
    let WorkerContext {
        waiter,
        mut commands,
        mut chain,
        mut generation,
        events,
        faults,
        latest,
        gc,
    } = context;
    let bridge = waiter.bridge().clone();
    let counters = bridge.counters().clone();

    log::debug!("mixxer-dsp started (frame length {})", bridge.frame_len());

    while running.load(Ordering::Acquire) {
        let frame = waiter.pop_ingress_timeout(INGRESS_WAIT);

        while let Ok(command) = commands.pop() {
            match command {
                ChainCommand::Replace {
                    chain: next,
                    generation: next_generation,
                } => {
                    let mut next = *next;
                    next.prepare(bridge.frame_len());
                    chain = next;
                    generation = next_generation;
                }
                ChainCommand::SetParam(change) => {
                    chain.set_param_at(change.slot, change.param, change.value)
                }
                ChainCommand::SetEnabled { slot, enabled } => chain.set_enabled_at(slot, enabled),
            }
        }

        let Some(frame) = frame else {
            continue;
        };

        let frame = chain.apply(frame);
        for fault in chain.drain_faults() {
            log::warn!("Effect stage {} panicked and was disabled: {}", fault.stage, fault.message);
            // A full queue is fine: the layout is rebuilt from the chain at stop
            let _ = faults.try_send(FaultNotice {
                generation,
                stage: fault.stage.clone(),
            });
            events.send(EngineEvent::StageFaulted {
                stage: fault.stage,
                message: fault.message,
            });
        }

        latest.set(Shared::new(&gc, frame.clone()));
        bridge.push_egress(frame);
        counters.record_processed();
    }

    log::debug!("mixxer-dsp stopped");
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeCounters;
    use crate::effect::native::GainEffect;
    use crate::effect::{Effect, EffectBase, EffectInfo, EffectStage, ParamChange};
    use crate::engine::command::command_channel;
    use crate::engine::events::event_channel;
    use crate::engine::gc::GarbageCollector;
    use crate::types::Sample;
    use crossbeam::channel::Receiver;
    use std::time::Instant;

    struct Exploding {
        base: EffectBase,
    }

    impl Effect for Exploding {
        fn info(&self) -> &EffectInfo {
            self.base.info()
        }
        fn params(&self) -> &[f32] {
            self.base.params()
        }
        fn set_param(&mut self, index: usize, value: f32) {
            self.base.set_param(index, value)
        }
        fn process(&mut self, _samples: &mut [Sample], _channels: u16) {
            panic!("denormal storm");
        }
        fn reset(&mut self) {}
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    struct Harness {
        bridge: Arc<FrameBridge>,
        commands: rtrb::Producer<ChainCommand>,
        faults: Receiver<FaultNotice>,
        latest: Arc<SharedCell<AudioFrame>>,
        context: WorkerContext,
        _gc: GarbageCollector,
    }

    fn harness(chain: EffectChain) -> Harness {
        let gc = GarbageCollector::spawn().unwrap();
        let (bridge, waiter) = FrameBridge::new(4, 2, 1, Arc::new(BridgeCounters::new()));
        let (commands, consumer) = command_channel();
        let (events, _events_rx) = event_channel();
        let (faults_tx, faults) = crossbeam::channel::bounded(16);
        let latest = Arc::new(SharedCell::new(Shared::new(gc.handle(), AudioFrame::empty())));

        let context = WorkerContext {
            waiter,
            commands: consumer,
            chain,
            generation: 1,
            events,
            faults: faults_tx,
            latest: latest.clone(),
            gc: gc.handle().clone(),
        };
        Harness {
            bridge,
            commands,
            faults,
            latest,
            context,
            _gc: gc,
        }
    }

    #[test]
    fn test_worker_processes_and_returns_chain() {
        let chain =
            EffectChain::new(vec![EffectStage::new("gain", GainEffect::with_factor(2.0))]).unwrap();
        let Harness {
            bridge,
            mut commands,
            latest,
            context,
            _gc,
            ..
        } = harness(chain);
        let worker = WorkerHandle::spawn(context).ok().unwrap();

        bridge.capture(&[0.25, 0.5]);
        assert!(wait_for(|| bridge.counters().processed() == 1));
        assert_eq!(bridge.pop_egress().unwrap().samples(), &[0.5, 1.0]);
        assert_eq!(latest.get().samples(), &[0.5, 1.0]);

        commands
            .push(ChainCommand::SetParam(ParamChange {
                slot: 0,
                param: 0,
                value: 0.5,
            }))
            .unwrap();
        bridge.capture(&[1.0, 1.0]);
        assert!(wait_for(|| bridge.counters().processed() == 2));
        assert_eq!(bridge.pop_egress().unwrap().samples(), &[0.5, 0.5]);

        let chain = worker.stop();
        assert_eq!(
            chain.stage(&"gain".into()).unwrap().param(GainEffect::FACTOR),
            Some(0.5)
        );
    }

    #[test]
    fn test_fault_notices_carry_chain_generation() {
        let exploding = || Exploding {
            base: EffectBase::new(EffectInfo::new("Exploding", "Test")),
        };
        let chain = EffectChain::new(vec![EffectStage::new("bad", exploding())]).unwrap();
        let Harness {
            bridge,
            mut commands,
            faults,
            context,
            _gc,
            ..
        } = harness(chain);
        let worker = WorkerHandle::spawn(context).ok().unwrap();

        bridge.capture(&[0.1, 0.1]);
        assert!(wait_for(|| bridge.counters().processed() == 1));
        assert_eq!(
            faults.try_recv(),
            Ok(FaultNotice {
                generation: 1,
                stage: "bad".into(),
            })
        );

        let replacement = EffectChain::new(vec![EffectStage::new("bad", exploding())]).unwrap();
        commands
            .push(ChainCommand::Replace {
                chain: Box::new(replacement),
                generation: 7,
            })
            .unwrap();
        bridge.capture(&[0.1, 0.1]);
        assert!(wait_for(|| bridge.counters().processed() == 2));
        assert_eq!(faults.try_recv().map(|n| n.generation), Ok(7));

        let chain = worker.stop();
        assert!(!chain.stage(&"bad".into()).unwrap().enabled);
    }

    #[cfg(all(target_os = "linux", target_pointer_width = "64"))]
    #[test]
    fn test_failed_spawn_returns_chain() {
        let chain =
            EffectChain::new(vec![EffectStage::new("gain", GainEffect::with_factor(2.0))]).unwrap();
        let Harness { context, _gc, .. } = harness(chain);

        // No system can map a 1 EiB stack
        let builder = thread::Builder::new().stack_size(1 << 60);
        let failure = match WorkerHandle::spawn_with(builder, context) {
            Ok(worker) => {
                worker.stop();
                panic!("worker spawned with an impossible stack size");
            }
            Err(failure) => failure,
        };

        assert!(matches!(failure.error, EngineError::WorkerSpawn(_)));
        assert_eq!(
            failure.chain.stage(&"gain".into()).unwrap().param(GainEffect::FACTOR),
            Some(2.0)
        );
    }
}
