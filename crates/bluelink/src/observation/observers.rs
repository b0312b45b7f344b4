//! Fan-out of characteristic changes to observation streams

use super::entry::{Observation, SubscriptionHook};
use super::event::{ChangeSender, ObservationEvent};
use super::{ObservationExceptionHandler, ObservationHandler};
use crate::error::{Error, Result};
use crate::profile::Characteristic;
use crate::state::State;
use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, trace, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{mpsc, watch};

/// Registry of observations for one peripheral.
///
/// Every characteristic change on the peripheral is published to each
/// stream returned by [`Observers::acquire`], which filters it down to the
/// characteristic it observes. For changes A1, B1, A2
/// on characteristics A and B, a stream acquired for A yields A1, A2 and a
/// stream acquired for B yields B1.
pub(crate) struct Observers {
    identifier: String,
    state: watch::Receiver<State>,
    handler: Weak<dyn ObservationHandler>,
    by_uuid: bool,
    changes: ChangeSender,
    exception_handler: ObservationExceptionHandler,
    observations: Mutex<HashMap<Characteristic, Arc<Observation>>>,
    next_id: AtomicU64,
}

impl Observers {
    pub(crate) fn new(
        identifier: String,
        state: watch::Receiver<State>,
        handler: Weak<dyn ObservationHandler>,
        by_uuid: bool,
        exception_handler: ObservationExceptionHandler,
    ) -> Self {
        Observers {
            identifier,
            state,
            handler,
            by_uuid,
            changes: ChangeSender::new(),
            exception_handler,
            observations: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Sender feeding every stream acquired from this registry.
    pub(crate) fn changes(&self) -> ChangeSender {
        self.changes.clone()
    }

    fn observations(&self) -> std::sync::MutexGuard<'_, HashMap<Characteristic, Arc<Observation>>> {
        match self.observations.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn observation(&self, characteristic: &Characteristic) -> Arc<Observation> {
        self.observations()
            .entry(characteristic.clone())
            .or_insert_with(|| {
                Arc::new(Observation::new(
                    self.identifier.clone(),
                    characteristic.clone(),
                    self.state.clone(),
                    self.handler.clone(),
                ))
            })
            .clone()
    }

    /// Number of live subscribers for `characteristic`.
    #[cfg(test)]
    pub(crate) async fn subscriber_count(&self, characteristic: &Characteristic) -> usize {
        let observation = self.observations().get(characteristic).cloned();
        match observation {
            Some(observation) => observation.subscriber_count().await,
            None => 0,
        }
    }

    /// Returns a stream of values for `characteristic`.
    ///
    /// Nothing happens until the stream is first polled. Dropping the stream
    /// unsubscribes; notifications are disabled once no subscriber is left.
    pub(crate) fn acquire(
        &self,
        characteristic: Characteristic,
        hook: Option<SubscriptionHook>,
    ) -> BoxStream<'static, Result<Vec<u8>>> {
        let subscriber = Subscriber {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            identifier: self.identifier.clone(),
            observation: self.observation(&characteristic),
            characteristic,
            hook,
            by_uuid: self.by_uuid,
            changes: self.changes.clone(),
            exception_handler: self.exception_handler.clone(),
            phase: Phase::Pending,
        };
        stream::unfold(subscriber, Subscriber::next).boxed()
    }

    /// Re-arms every observation after the link came (back) up.
    ///
    /// Each observation is handled on its own: a failure is published as an
    /// error event for that characteristic and does not affect the others.
    pub(crate) async fn on_connected(&self) {
        let observations: Vec<Arc<Observation>> = self.observations().values().cloned().collect();
        for observation in observations {
            if let Err(cause) = observation.on_connected().await {
                warn!(
                    "[{}] Failed to observe {} during connection attempt: {}",
                    self.identifier,
                    observation.characteristic(),
                    cause
                );
                self.changes.send(ObservationEvent::Error {
                    characteristic: observation.characteristic().clone(),
                    cause,
                });
            }
        }
    }
}

enum Phase {
    Pending,
    Active {
        events: mpsc::UnboundedReceiver<ObservationEvent>,
        _subscription: Subscription,
    },
    Done,
}

struct Subscriber {
    id: u64,
    identifier: String,
    observation: Arc<Observation>,
    characteristic: Characteristic,
    hook: Option<SubscriptionHook>,
    by_uuid: bool,
    changes: ChangeSender,
    exception_handler: ObservationExceptionHandler,
    phase: Phase,
}

impl Subscriber {
    async fn next(mut self) -> Option<(Result<Vec<u8>>, Subscriber)> {
        if let Phase::Pending = self.phase {
            // Subscribe before spinning up so no change after enabling is missed.
            let events = self.changes.subscribe();
            let subscription = Subscription {
                id: self.id,
                identifier: self.identifier.clone(),
                observation: self.observation.clone(),
            };
            let started = self
                .observation
                .on_subscription(self.id, self.hook.clone())
                .await;
            self.phase = Phase::Active {
                events,
                _subscription: subscription,
            };
            if let Err(cause) = started {
                if let Err(e) = (self.exception_handler)(cause) {
                    self.phase = Phase::Done;
                    return Some((Err(e), self));
                }
            }
        }

        loop {
            let event = match &mut self.phase {
                Phase::Active { events, .. } => events.recv().await,
                _ => return None,
            };
            match event {
                None => return None,
                Some(event) if !event.is_associated_with(&self.characteristic, self.by_uuid) => {}
                Some(ObservationEvent::CharacteristicChange { data, .. }) => {
                    return Some((Ok(data), self));
                }
                Some(ObservationEvent::Error { cause, .. }) => {
                    if let Err(e) = (self.exception_handler)(cause) {
                        self.phase = Phase::Done;
                        return Some((Err(e), self));
                    }
                }
                Some(ObservationEvent::Disconnected) => {
                    trace!("[{}] {} observation idle until reconnect", self.identifier, self.characteristic);
                }
            }
        }
    }
}

/// Removes the subscriber from its observation when dropped.
struct Subscription {
    id: u64,
    identifier: String,
    observation: Arc<Observation>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let observation = self.observation.clone();
        let id = self.id;
        let identifier = self.identifier.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = observation.on_completion(id).await {
                        warn!(
                            "[{}] Failed to stop observing {}: {}",
                            identifier,
                            observation.characteristic(),
                            e
                        );
                    }
                });
            }
            Err(_) => debug!(
                "[{}] No runtime to release observation of {}",
                identifier,
                observation.characteristic()
            ),
        }
    }
}

/// Default exception handler: every observation error terminates the stream.
pub(crate) fn rethrow(cause: Error) -> Result<()> {
    Err(cause)
}
