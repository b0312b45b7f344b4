//! Events fanned out to observation streams

use crate::error::Error;
use crate::profile::Characteristic;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// One entry on the shared characteristic-change stream
#[derive(Debug, Clone)]
pub enum ObservationEvent {
    CharacteristicChange {
        characteristic: Characteristic,
        data: Vec<u8>,
    },
    Error {
        characteristic: Characteristic,
        cause: Error,
    },
    /// The link went down; applies to every characteristic
    Disconnected,
}

impl ObservationEvent {
    pub fn characteristic(&self) -> Option<&Characteristic> {
        match self {
            ObservationEvent::CharacteristicChange { characteristic, .. }
            | ObservationEvent::Error { characteristic, .. } => Some(characteristic),
            ObservationEvent::Disconnected => None,
        }
    }

    /// Whether a stream observing `characteristic` should see this event.
    pub fn is_associated_with(&self, characteristic: &Characteristic, by_uuid: bool) -> bool {
        match self.characteristic() {
            None => true,
            Some(source) => source.matches(characteristic, by_uuid),
        }
    }
}

/// Publishes characteristic changes to every subscribed stream.
///
/// Each subscriber owns an unbounded queue, so a slow stream never loses
/// changes; it only falls behind. Queues of dropped subscribers are pruned
/// on the next send.
#[derive(Clone, Default)]
pub struct ChangeSender {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<ObservationEvent>>>>,
}

impl ChangeSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber. It receives every event sent after this call.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ObservationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    /// Sends `event` to every live subscriber and returns how many received it.
    pub fn send(&self, event: ObservationEvent) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<ObservationEvent>>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
