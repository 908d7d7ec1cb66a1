//! Notifications from the engine to the control layer

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use super::state::EngineState;
use crate::effect::StageId;
use crate::types::Direction;

/// Capacity of the event channel; events beyond it are dropped
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Something the control layer may want to react to
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StateChanged { from: EngineState, to: EngineState },
    /// A stage panicked while processing and was disabled
    StageFaulted { stage: StageId, message: String },
    /// The driver reported an error on an open stream
    StreamError { direction: Direction, message: String },
}

/// Non-blocking sending side of the event channel
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<EngineEvent>,
}

impl EventSender {
    /// Send an event, dropping it if nobody drains the channel
    pub fn send(&self, event: EngineEvent) {
        match self.tx.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(event)) => {
                log::debug!("Event queue full, dropping {:?}", event);
            }
        }
    }
}

/// Create the bounded event channel
pub fn event_channel() -> (EventSender, Receiver<EngineEvent>) {
    let (tx, rx) = channel::bounded(EVENT_QUEUE_CAPACITY);
    (EventSender { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_channel_never_blocks() {
        let (tx, rx) = event_channel();
        for _ in 0..EVENT_QUEUE_CAPACITY + 10 {
            tx.send(EngineEvent::StateChanged {
                from: EngineState::Idle,
                to: EngineState::Starting,
            });
        }
        assert_eq!(rx.len(), EVENT_QUEUE_CAPACITY);
    }
}
