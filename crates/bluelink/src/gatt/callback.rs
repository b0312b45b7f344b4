//! Per-connection event sink handed to the native transport
//!
//! The transport reports everything that happens on a link through one
//! [`Callback`]: link state changes, operation completions, MTU changes and
//! characteristic changes. Completions are queued for the connection's
//! executor; a link going down closes those queues so a pending request
//! wakes up instead of waiting forever.

use super::response::{MtuChanged, Response};
use crate::logs::LogConfig;
use crate::observation::{ChangeSender, ObservationEvent};
use crate::profile::Characteristic;
use crate::state::{Connecting, DisconnectStatus, State};
use log::{debug, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch, Notify};

/// Link state as reported by the native stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// Receiving ends of the completion queues fed by a [`Callback`]
#[derive(Debug)]
pub struct CallbackReceivers {
    pub responses: mpsc::UnboundedReceiver<Response>,
    pub mtu: mpsc::UnboundedReceiver<MtuChanged>,
}

/// Event sink for a single connection. Clones feed the same queues.
#[derive(Clone)]
pub struct Callback {
    inner: Arc<CallbackInner>,
}

struct CallbackInner {
    identifier: String,
    log: LogConfig,
    active: AtomicBool,
    mtu_requested: AtomicBool,
    state: Arc<watch::Sender<State>>,
    mtu: Arc<watch::Sender<Option<u16>>>,
    changes: ChangeSender,
    responses: Mutex<Option<mpsc::UnboundedSender<Response>>>,
    mtu_events: Mutex<Option<mpsc::UnboundedSender<MtuChanged>>>,
    service_changed: Notify,
}

impl Callback {
    pub fn new(
        identifier: impl Into<String>,
        state: Arc<watch::Sender<State>>,
        mtu: Arc<watch::Sender<Option<u16>>>,
        changes: ChangeSender,
        log: LogConfig,
    ) -> (Callback, CallbackReceivers) {
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let (mtu_tx, mtu_rx) = mpsc::unbounded_channel();
        let callback = Callback {
            inner: Arc::new(CallbackInner {
                identifier: identifier.into(),
                log,
                active: AtomicBool::new(true),
                mtu_requested: AtomicBool::new(false),
                state,
                mtu,
                changes,
                responses: Mutex::new(Some(response_tx)),
                mtu_events: Mutex::new(Some(mtu_tx)),
                service_changed: Notify::new(),
            }),
        };
        let receivers = CallbackReceivers {
            responses: response_rx,
            mtu: mtu_rx,
        };
        (callback, receivers)
    }

    pub fn on_connection_state_change(&self, link_state: LinkState, reason: u16) {
        let inner = &self.inner;
        if !inner.active.load(Ordering::Acquire) {
            debug!(
                "[{}] Ignoring {:?} for a disposed connection",
                inner.identifier, link_state
            );
            return;
        }
        debug!(
            "[{}] Link state {:?} (reason {:#06x})",
            inner.identifier, link_state, reason
        );

        match link_state {
            LinkState::Connecting => {
                inner.state.send_if_modified(|state| {
                    if state.is_disconnected() {
                        *state = State::Connecting(Connecting::Bluetooth);
                        true
                    } else {
                        false
                    }
                });
            }
            LinkState::Connected => {
                inner.state.send_if_modified(|state| {
                    if *state == State::Connecting(Connecting::Bluetooth) {
                        *state = State::Connecting(Connecting::Services);
                        true
                    } else {
                        false
                    }
                });
            }
            LinkState::Disconnecting => {
                self.close_queues();
                inner.state.send_if_modified(|state| {
                    if state.is_disconnected() || *state == State::Disconnecting {
                        false
                    } else {
                        *state = State::Disconnecting;
                        true
                    }
                });
            }
            LinkState::Disconnected => {
                self.close_queues();
                let status = DisconnectStatus::from_reason(reason);
                self.set_disconnected(status);
                inner.changes.send(ObservationEvent::Disconnected);
            }
        }
    }

    pub fn on_response(&self, response: Response) {
        let inner = &self.inner;
        trace!(
            "[{}] {} (status {})",
            inner.identifier,
            response.name(),
            response.status()
        );
        let guard = lock(&inner.responses);
        match guard.as_ref() {
            Some(tx) if tx.send(response).is_ok() => {}
            _ => debug!(
                "[{}] Dropped response, connection no longer accepts completions",
                inner.identifier
            ),
        }
    }

    pub fn on_mtu_changed(&self, event: MtuChanged) {
        let inner = &self.inner;
        debug!(
            "[{}] MTU changed to {} (status {})",
            inner.identifier, event.mtu, event.status
        );
        if event.status.is_success() {
            inner.mtu.send_replace(Some(event.mtu));
        }
        // Only a local request waits on the queue; peer exchanges end at the watch.
        if !inner.mtu_requested.swap(false, Ordering::AcqRel) {
            return;
        }
        let guard = lock(&inner.mtu_events);
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Forwards the next MTU change to the MTU queue. Called right before a
    /// local MTU request is submitted.
    pub(crate) fn expect_mtu(&self) {
        self.inner.mtu_requested.store(true, Ordering::Release);
    }

    pub fn on_characteristic_changed(&self, characteristic: Characteristic, value: Vec<u8>) {
        let inner = &self.inner;
        if !inner.active.load(Ordering::Acquire) {
            trace!(
                "[{}] Ignoring {} change for a disposed connection",
                inner.identifier, characteristic
            );
            return;
        }
        trace!(
            "[{}] {} changed: {}",
            inner.identifier,
            characteristic,
            inner.log.payload(&value)
        );
        let event = ObservationEvent::CharacteristicChange {
            characteristic,
            data: value,
        };
        inner.changes.send(event);
    }

    /// The peer indicated that its attribute database changed.
    pub fn on_service_changed(&self) {
        debug!("[{}] Services changed", self.inner.identifier);
        self.inner.service_changed.notify_one();
    }

    pub(crate) fn state(&self) -> watch::Receiver<State> {
        self.inner.state.subscribe()
    }

    pub(crate) async fn service_changed(&self) {
        self.inner.service_changed.notified().await
    }

    /// Settles the state at `Disconnected`, keeping any cause already reported.
    pub(crate) fn set_disconnected(&self, status: Option<DisconnectStatus>) {
        self.inner.state.send_if_modified(|state| match state {
            State::Disconnected(Some(_)) => false,
            State::Disconnected(None) if status.is_none() => false,
            _ => {
                *state = State::Disconnected(status);
                true
            }
        });
    }

    /// Closes the completion queues. Buffered completions are still delivered,
    /// after which receivers observe the end of the queue.
    pub(crate) fn close_queues(&self) {
        lock(&self.inner.responses).take();
        lock(&self.inner.mtu_events).take();
    }

    /// Stops this callback from touching the peripheral state.
    pub(crate) fn dispose(&self) {
        self.close_queues();
        self.inner.active.store(false, Ordering::Release);
    }

    /// Whether events are still applied to the peripheral state.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Callback lock poisoned, recovering");
            poisoned.into_inner()
        }
    }
}
