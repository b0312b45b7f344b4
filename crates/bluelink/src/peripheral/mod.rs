//! Connection state machine for one remote peripheral
//!
//! [`Peripheral`] coordinates everything needed to talk to a device: it opens
//! the link, discovers services, re-arms observations and publishes the
//! resulting [`State`]. A connect goes through
//!
//! ```text
//! Disconnected -> Connecting(Bluetooth) -> Connecting(Services)
//!              -> Connecting(Observes)  -> Connected
//! ```
//!
//! and any failure along the way settles the state back at `Disconnected`.
//! Concurrent calls to [`Peripheral::connect`] share a single attempt.

mod builder;
mod session;

#[cfg(test)]
mod tests;

pub use builder::{
    PeripheralBuilder, PeripheralConfig, ServicesDiscoveredHook, DEFAULT_DISCONNECT_TIMEOUT,
};
pub use session::ServicesDiscoveredPeripheral;

use crate::action::{ActionScope, SharedRepeatableAction};
use crate::connection::{Connection, ConnectionConfig};
use crate::discovery::ServiceDiscoveryRetrier;
use crate::error::{Error, Result};
use crate::gatt::Callback;
use crate::observation::{
    ObservationExceptionHandler, ObservationHandler, Observers, SubscriptionHook,
};
use crate::profile::{Characteristic, Descriptor, DiscoveredService, WriteType};
use crate::scope::TaskScope;
use crate::state::{Connecting, State};
use crate::threading::Dispatcher;
use crate::transport::{BluetoothState, Transport};
use async_trait::async_trait;
use futures::stream::BoxStream;
use log::{debug, error, info, trace, warn};
use session::Session;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;

/// A remote BLE peripheral.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct Peripheral {
    inner: Arc<PeripheralInner>,
}

struct PeripheralInner {
    identifier: String,
    transport: Arc<dyn Transport>,
    config: PeripheralConfig,
    dispatcher: Arc<Dispatcher>,
    state: Arc<watch::Sender<State>>,
    mtu: Arc<watch::Sender<Option<u16>>>,
    services: Arc<watch::Sender<Option<Vec<DiscoveredService>>>>,
    connection: Mutex<Option<Arc<Connection>>>,
    observers: Observers,
    on_services_discovered: Option<ServicesDiscoveredHook>,
    connect_action: SharedRepeatableAction<TaskScope>,
    closed: AtomicBool,
}

impl Peripheral {
    pub fn builder() -> PeripheralBuilder {
        PeripheralBuilder::new()
    }

    fn new(
        transport: Arc<dyn Transport>,
        config: PeripheralConfig,
        on_services_discovered: Option<ServicesDiscoveredHook>,
        exception_handler: ObservationExceptionHandler,
    ) -> Result<Peripheral> {
        let identifier = transport.identifier();
        let dispatcher = Arc::new(Dispatcher::new(&config.threading)?);
        let (state, _) = watch::channel(State::Disconnected(None));
        let (mtu, _) = watch::channel(None);
        let (services, _) = watch::channel(None);

        let inner = Arc::new_cyclic(|weak: &Weak<PeripheralInner>| {
            let handler: Weak<dyn ObservationHandler> = weak.clone();
            let observers = Observers::new(
                identifier.clone(),
                state.subscribe(),
                handler,
                config.force_characteristic_equality_by_uuid,
                exception_handler,
            );

            let owner = weak.clone();
            let connect_action = SharedRepeatableAction::new(move |scope: ActionScope| {
                let owner = owner.clone();
                async move {
                    match owner.upgrade() {
                        Some(inner) => inner.establish(scope).await,
                        None => Err(Error::NotConnected("Peripheral dropped".into())),
                    }
                }
            });

            PeripheralInner {
                identifier,
                transport,
                config,
                dispatcher,
                state: Arc::new(state),
                mtu: Arc::new(mtu),
                services: Arc::new(services),
                connection: Mutex::new(None),
                observers,
                on_services_discovered,
                connect_action,
                closed: AtomicBool::new(false),
            }
        });
        Ok(Peripheral { inner })
    }

    pub fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    pub fn state(&self) -> watch::Receiver<State> {
        self.inner.state.subscribe()
    }

    /// Services found by the most recent discovery; `None` before the first
    /// connection.
    pub fn services(&self) -> watch::Receiver<Option<Vec<DiscoveredService>>> {
        self.inner.services.subscribe()
    }

    /// MTU negotiated on the current connection; `None` until one was
    /// negotiated.
    pub fn mtu(&self) -> watch::Receiver<Option<u16>> {
        self.inner.mtu.subscribe()
    }

    /// Connects, or joins the attempt already in progress.
    ///
    /// Returns the scope of the established connection. Tasks spawned in it
    /// are cancelled when the connection ends, and a graceful disconnect
    /// waits for them before the link is torn down.
    pub async fn connect(&self) -> Result<TaskScope> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::NotConnected("Peripheral closed".into()));
        }
        self.inner.connect_action.await_result().await
    }

    /// Disconnects and waits until the state has settled at `Disconnected`.
    ///
    /// Any attempt in progress is cancelled. Completes within the configured
    /// disconnect timeout even if the peer never confirms.
    pub async fn disconnect(&self) {
        debug!("[{}] Disconnect requested", self.inner.identifier);
        self.inner
            .connect_action
            .cancel_and_join(Error::NotConnected("Disconnect requested".into()))
            .await;
        self.inner.release_connection().await;
    }

    pub async fn read(&self, characteristic: &Characteristic) -> Result<Vec<u8>> {
        self.inner.session()?.read(characteristic).await
    }

    pub async fn write(
        &self,
        characteristic: &Characteristic,
        data: &[u8],
        write_type: WriteType,
    ) -> Result<()> {
        self.inner
            .session()?
            .write(characteristic, data, write_type)
            .await
    }

    pub async fn read_descriptor(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        self.inner.session()?.read_descriptor(descriptor).await
    }

    pub async fn write_descriptor(&self, descriptor: &Descriptor, data: &[u8]) -> Result<()> {
        self.inner.session()?.write_descriptor(descriptor, data).await
    }

    pub async fn rssi(&self) -> Result<i32> {
        self.inner.session()?.rssi().await
    }

    /// Requests `mtu` and returns the value the peer agreed to.
    pub async fn request_mtu(&self, mtu: u16) -> Result<u16> {
        self.inner.session()?.request_mtu(mtu).await
    }

    /// Observes changes of `characteristic`.
    ///
    /// The stream may be created at any time; notifications are enabled once
    /// connected and re-enabled after every reconnect. Dropping the stream
    /// unsubscribes.
    pub fn observe(&self, characteristic: Characteristic) -> BoxStream<'static, Result<Vec<u8>>> {
        self.inner.observers.acquire(characteristic, None)
    }

    /// Like [`observe`](Self::observe), running `hook` each time the
    /// observation is (re-)established for this subscriber.
    pub fn observe_with(
        &self,
        characteristic: Characteristic,
        hook: SubscriptionHook,
    ) -> BoxStream<'static, Result<Vec<u8>>> {
        self.inner.observers.acquire(characteristic, Some(hook))
    }

    /// Disposes the peripheral: the link is closed without waiting for the
    /// peer and later connects fail with `NotConnected`.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.close_connection();
        self.inner
            .connect_action
            .cancel_and_join(Error::NotConnected("Peripheral closed".into()))
            .await;
        self.inner.dispatcher.shutdown();
        info!("[{}] Closed", self.inner.identifier);
    }
}

impl PeripheralInner {
    fn connection(&self) -> MutexGuard<'_, Option<Arc<Connection>>> {
        match self.connection.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn session(&self) -> Result<Session> {
        let connection = self
            .connection()
            .clone()
            .ok_or_else(|| Error::NotConnected("Not connected".into()))?;
        Ok(Session::new(
            connection,
            self.services.subscribe(),
            self.config.log.clone(),
        ))
    }

    async fn establish(self: Arc<Self>, scope: ActionScope) -> Result<TaskScope> {
        match self.connect_sequence(&scope).await {
            Ok(task_scope) => {
                info!("[{}] Connected", self.identifier);
                Ok(task_scope)
            }
            Err(e) => {
                error!("[{}] Failed to connect: {}", self.identifier, e);
                self.close_connection();
                Err(e)
            }
        }
    }

    async fn connect_sequence(self: &Arc<Self>, scope: &ActionScope) -> Result<TaskScope> {
        let mut bluetooth = self.transport.bluetooth_state();
        let powered = *bluetooth.borrow_and_update();
        if powered != BluetoothState::On {
            debug!("[{}] Bluetooth is {:?}", self.identifier, powered);
            return Err(Error::bluetooth_disabled());
        }
        self.watch_for_bluetooth_off(scope, bluetooth);

        let weak = Arc::downgrade(self);
        scope.on_teardown(move || async move {
            if let Some(inner) = weak.upgrade() {
                inner.release_connection().await;
            }
        });

        self.mtu.send_replace(None);
        self.state
            .send_replace(State::Connecting(Connecting::Bluetooth));

        debug!("[{}] Connecting", self.identifier);
        let (callback, receivers) = Callback::new(
            self.identifier.clone(),
            self.state.clone(),
            self.mtu.clone(),
            self.observers.changes(),
            self.config.log.clone(),
        );
        let link = self
            .transport
            .connect(callback.clone())
            .await?
            .ok_or(Error::ConnectionRejected)?;
        let connection = Connection::new(
            ConnectionConfig {
                identifier: self.identifier.clone(),
                disconnect_timeout: self.config.disconnect_timeout,
                discovery: ServiceDiscoveryRetrier::new(self.config.discover_services_attempts),
            },
            link,
            callback,
            receivers,
            self.services.clone(),
            self.dispatcher.clone(),
            scope.root(),
        );
        *self.connection() = Some(connection.clone());

        let mut state = self.state.subscribe();
        let link_up = state
            .wait_for(|s| *s != State::Connecting(Connecting::Bluetooth))
            .await
            .map(|s| s.is_at_least(&State::Connecting(Connecting::Services)))
            .unwrap_or(false);
        if !link_up {
            return Err(Error::NotConnected("Link went down while connecting".into()));
        }

        debug!("[{}] Discovering services", self.identifier);
        let services = connection.discover_services().await?;
        if let Some(hook) = &self.on_services_discovered {
            let session = Session::new(
                connection.clone(),
                self.services.subscribe(),
                self.config.log.clone(),
            );
            hook(ServicesDiscoveredPeripheral::new(session)).await?;
        }
        trace!(
            "[{}] {} services ready, re-arming observations",
            self.identifier,
            services.len()
        );

        self.advance(State::Connecting(Connecting::Observes))?;
        self.observers.on_connected().await;

        let task_scope = connection.task_scope().clone();
        self.advance(State::Connected(task_scope.clone()))?;
        self.watch_for_connection_loss(scope);
        Ok(task_scope)
    }

    /// Moves to `next` unless the link went down in the meantime.
    fn advance(&self, next: State) -> Result<()> {
        let advanced = self.state.send_if_modified(|state| {
            if state.is_at_least(&State::Connecting(Connecting::Bluetooth)) {
                *state = next;
                true
            } else {
                false
            }
        });
        if advanced {
            Ok(())
        } else {
            Err(Error::NotConnected("Link went down while connecting".into()))
        }
    }

    fn watch_for_bluetooth_off(
        self: &Arc<Self>,
        scope: &ActionScope,
        mut bluetooth: watch::Receiver<BluetoothState>,
    ) {
        let weak = Arc::downgrade(self);
        scope.spawn(async move {
            let turned_off = bluetooth
                .wait_for(|s| matches!(s, BluetoothState::TurningOff | BluetoothState::Off))
                .await
                .is_ok();
            if !turned_off {
                // Radio state is no longer reported; nothing left to watch.
                std::future::pending::<()>().await;
            }
            if let Some(inner) = weak.upgrade() {
                warn!("[{}] Bluetooth disabled, closing link", inner.identifier);
                inner.close_connection();
            }
            Err(Error::bluetooth_disabled())
        });
    }

    fn watch_for_connection_loss(&self, scope: &ActionScope) {
        let mut state = self.state.subscribe();
        let identifier = self.identifier.clone();
        scope.spawn(async move {
            let _ = state
                .wait_for(|s| matches!(s, State::Disconnecting | State::Disconnected(_)))
                .await;
            info!("[{}] Connection lost", identifier);
            Err(Error::ConnectionLost(format!("{} disconnected", identifier)))
        });
    }

    /// Gracefully disconnects the current connection, if any.
    async fn release_connection(&self) {
        let connection = self.connection().take();
        if let Some(connection) = connection {
            connection.disconnect().await;
        }
        self.settle_disconnected();
    }

    /// Closes the current connection, if any, without waiting for the peer.
    fn close_connection(&self) {
        let connection = self.connection().take();
        if let Some(connection) = connection {
            connection.close();
        }
        self.settle_disconnected();
    }

    fn settle_disconnected(&self) {
        self.state.send_if_modified(|state| {
            if state.is_disconnected() {
                false
            } else {
                *state = State::Disconnected(None);
                true
            }
        });
    }
}

#[async_trait]
impl ObservationHandler for PeripheralInner {
    async fn start_observation(&self, characteristic: &Characteristic) -> Result<()> {
        self.session()?.set_notification(characteristic, true).await
    }

    async fn stop_observation(&self, characteristic: &Characteristic) -> Result<()> {
        self.session()?.set_notification(characteristic, false).await
    }
}
