//! Per-characteristic observation state

use super::ObservationHandler;
use crate::error::{Error, Result};
use crate::profile::Characteristic;
use crate::state::{Connecting, State};
use futures::future::BoxFuture;
use log::{debug, trace};
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Mutex};

/// Invoked after notifications for a characteristic have been enabled.
pub type SubscriptionHook = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct Subscribers {
    entries: Vec<(u64, Option<SubscriptionHook>)>,
    did_start: bool,
}

/// Subscribers of one characteristic.
///
/// Native notifications are enabled when the first subscriber arrives while
/// connected (or on connect, if subscribers are already waiting) and
/// disabled when the last one leaves. All transitions are serialized by the
/// observation's lock, so concurrent first subscribers enable notifications
/// only once.
pub(crate) struct Observation {
    identifier: String,
    characteristic: Characteristic,
    state: watch::Receiver<State>,
    handler: Weak<dyn ObservationHandler>,
    subscribers: Mutex<Subscribers>,
}

impl Observation {
    pub(crate) fn new(
        identifier: String,
        characteristic: Characteristic,
        state: watch::Receiver<State>,
        handler: Weak<dyn ObservationHandler>,
    ) -> Self {
        Observation {
            identifier,
            characteristic,
            state,
            handler,
            subscribers: Mutex::new(Subscribers {
                entries: Vec::new(),
                did_start: false,
            }),
        }
    }

    pub(crate) fn characteristic(&self) -> &Characteristic {
        &self.characteristic
    }

    #[cfg(test)]
    pub(crate) async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.entries.len()
    }

    fn is_connected(&self) -> bool {
        self.state
            .borrow()
            .is_at_least(&State::Connecting(Connecting::Observes))
    }

    fn handler(&self) -> Result<Arc<dyn ObservationHandler>> {
        self.handler
            .upgrade()
            .ok_or_else(|| Error::NotConnected("Peripheral dropped".into()))
    }

    pub(crate) async fn on_subscription(
        &self,
        id: u64,
        hook: Option<SubscriptionHook>,
    ) -> Result<()> {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.entries.push((id, hook.clone()));
        if !self.is_connected() {
            return Ok(());
        }

        let result: Result<()> = async {
            if !subscribers.did_start {
                self.handler()?.start_observation(&self.characteristic).await?;
                subscribers.did_start = true;
            }
            if let Some(hook) = &hook {
                hook().await?;
            }
            Ok(())
        }
        .await;
        self.suppress_connection_loss(result)
    }

    pub(crate) async fn on_completion(&self, id: u64) -> Result<()> {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.entries.retain(|(entry, _)| *entry != id);
        if !subscribers.entries.is_empty() {
            return Ok(());
        }

        let should_stop = subscribers.did_start && self.is_connected();
        subscribers.did_start = false;
        if should_stop {
            let result = match self.handler() {
                Ok(handler) => handler.stop_observation(&self.characteristic).await,
                Err(e) => Err(e),
            };
            return self.suppress_connection_loss(result);
        }
        Ok(())
    }

    /// Re-enables notifications after a (re)connect and re-runs every
    /// subscriber's hook. The native stack forgets notification state when
    /// the link drops.
    pub(crate) async fn on_connected(&self) -> Result<()> {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.did_start = false;
        if subscribers.entries.is_empty() || !self.is_connected() {
            return Ok(());
        }

        let result: Result<()> = async {
            self.handler()?.start_observation(&self.characteristic).await?;
            subscribers.did_start = true;
            let hooks: Vec<SubscriptionHook> = subscribers
                .entries
                .iter()
                .filter_map(|(_, hook)| hook.clone())
                .collect();
            for hook in hooks {
                hook().await?;
            }
            Ok(())
        }
        .await;
        self.suppress_connection_loss(result)
    }

    /// Losing the link while spinning an observation up or down is expected:
    /// notifications are cleared on disconnect and re-enabled on reconnect.
    fn suppress_connection_loss(&self, result: Result<()>) -> Result<()> {
        match result {
            Err(e) if e.is_connection_loss() => {
                debug!(
                    "[{}] Suppressed failure for {}: {}",
                    self.identifier, self.characteristic, e
                );
                Ok(())
            }
            other => {
                trace!("[{}] Observation of {} updated", self.identifier, self.characteristic);
                other
            }
        }
    }
}
