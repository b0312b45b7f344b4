//! Sequenced GATT request execution for one open link
//!
//! A [`Connection`] is created once a native link has been opened and lives
//! until that link is closed. Native stacks accept one outstanding request
//! per link, so every request goes through [`Connection::execute`] (or
//! [`Connection::request_mtu`]), which holds a mutex from submission until
//! the matching completion has been received.
//!
//! The wait for a completion runs in a detached task that owns the mutex
//! guard. A caller that gives up early therefore never strands a completion:
//! the task still receives it, logs it as discarded and only then releases
//! the mutex for the next request.

use crate::discovery::ServiceDiscoveryRetrier;
use crate::error::{Error, Result};
use crate::gatt::{
    Callback, CallbackReceivers, ExpectedResponse, GattStatus, MtuChanged, Response,
    ServicesDiscovered,
};
use crate::profile::DiscoveredService;
use crate::scope::TaskScope;
use crate::state::State;
use crate::threading::Dispatcher;
use crate::transport::Link;
use log::{debug, error, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex, OwnedMutexGuard};

#[cfg(test)]
mod tests;

/// Settings a connection is created with
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub identifier: String,
    pub disconnect_timeout: Duration,
    pub discovery: ServiceDiscoveryRetrier,
}

pub struct Connection {
    identifier: String,
    link: Arc<dyn Link>,
    callback: Callback,
    dispatcher: Arc<Dispatcher>,
    guard: Arc<Mutex<CallbackReceivers>>,
    state: watch::Receiver<State>,
    services: Arc<watch::Sender<Option<Vec<DiscoveredService>>>>,
    task_scope: TaskScope,
    disconnect_timeout: Duration,
    discovery: ServiceDiscoveryRetrier,
    closed: AtomicBool,
}

impl Connection {
    /// Wraps an opened link. `parent` bounds the lifetime of the
    /// connection's task scope.
    ///
    /// Must be called from within a tokio runtime; the connection starts
    /// watching for link loss and service changes immediately.
    pub fn new(
        config: ConnectionConfig,
        link: Arc<dyn Link>,
        callback: Callback,
        receivers: CallbackReceivers,
        services: Arc<watch::Sender<Option<Vec<DiscoveredService>>>>,
        dispatcher: Arc<Dispatcher>,
        parent: &TaskScope,
    ) -> Arc<Connection> {
        let state = callback.state();
        let connection = Arc::new(Connection {
            identifier: config.identifier,
            link,
            callback,
            dispatcher,
            guard: Arc::new(Mutex::new(receivers)),
            state,
            services,
            task_scope: TaskScope::child_of(parent),
            disconnect_timeout: config.disconnect_timeout,
            discovery: config.discovery,
            closed: AtomicBool::new(false),
        });
        connection.watch_for_disconnect();
        connection.watch_for_service_changes();
        connection
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Scope for tasks bound to this connection. Cancelled when the
    /// connection closes.
    pub fn task_scope(&self) -> &TaskScope {
        &self.task_scope
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn watch_for_disconnect(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let mut state = self.state.clone();
        self.task_scope.spawn(async move {
            let disconnected = state.wait_for(|s| s.is_disconnected()).await.is_ok();
            if let Some(connection) = weak.upgrade() {
                if disconnected {
                    debug!("[{}] Disconnect detected", connection.identifier);
                }
                connection.close();
            }
        });
    }

    fn watch_for_service_changes(self: &Arc<Self>) {
        let weak: Weak<Connection> = Arc::downgrade(self);
        let callback = self.callback.clone();
        self.task_scope.spawn(async move {
            loop {
                callback.service_changed().await;
                let Some(connection) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = connection.discover_services().await {
                    warn!(
                        "[{}] Rediscovery after service change failed: {}",
                        connection.identifier, e
                    );
                }
            }
        });
    }

    /// Submits one request and waits for its completion of type `R`.
    ///
    /// `submit` runs on the connection's dispatcher. If it fails, the error
    /// is returned as-is and no completion is awaited.
    pub async fn execute<R, F>(&self, submit: F) -> Result<R>
    where
        R: ExpectedResponse,
        F: FnOnce(&dyn Link) -> Result<()> + Send + 'static,
    {
        let guard = self.acquire().await?;
        let link = self.link.clone();
        let dispatcher = self.dispatcher.clone();
        let identifier = self.identifier.clone();
        let (tx, rx) = oneshot::channel::<Result<Response>>();

        tokio::spawn(async move {
            let mut guard: OwnedMutexGuard<CallbackReceivers> = guard;
            if tx.is_closed() {
                return;
            }
            let outcome = match dispatcher.run(move || submit(&*link)).await {
                Err(e) => Err(e),
                Ok(()) => guard
                    .responses
                    .recv()
                    .await
                    .ok_or_else(|| Error::NotConnected("Connection closed".into())),
            };
            if let Err(Ok(response)) = tx.send(outcome) {
                debug!(
                    "[{}] Discarded response to cancelled request: {} (status {})",
                    identifier,
                    response.name(),
                    response.status()
                );
            }
        });

        let response = rx
            .await
            .map_err(|_| Error::Internal("request task dropped".into()))??;

        let status = response.status();
        check_status(R::NAME, status)?;
        R::from_response(response).map_err(|other| {
            error!(
                "[{}] Expected response type {} but received {}",
                self.identifier,
                R::NAME,
                other.name()
            );
            Error::Internal(format!(
                "Expected response type {} but received {}",
                R::NAME,
                other.name()
            ))
        })
    }

    /// Requests an MTU and returns the negotiated value.
    ///
    /// Shares the request mutex with [`execute`](Self::execute) but waits on
    /// the dedicated MTU queue. Only changes arriving while a request is
    /// outstanding are queued; one left over from a rejected request is
    /// skipped.
    pub async fn request_mtu(&self, mtu: u16) -> Result<u16> {
        let guard = self.acquire().await?;
        let link = self.link.clone();
        let dispatcher = self.dispatcher.clone();
        let identifier = self.identifier.clone();
        let callback = self.callback.clone();
        let (tx, rx) = oneshot::channel::<Result<MtuChanged>>();

        tokio::spawn(async move {
            let mut guard: OwnedMutexGuard<CallbackReceivers> = guard;
            while let Ok(stale) = guard.mtu.try_recv() {
                trace!("[{}] Skipping earlier MTU change to {}", identifier, stale.mtu);
            }
            if tx.is_closed() {
                return;
            }
            callback.expect_mtu();
            let outcome = match dispatcher.run(move || link.request_mtu(mtu)).await {
                Err(e) => Err(e),
                Ok(()) => guard
                    .mtu
                    .recv()
                    .await
                    .ok_or_else(|| Error::NotConnected("Connection closed".into())),
            };
            if let Err(Ok(event)) = tx.send(outcome) {
                debug!(
                    "[{}] Discarded MTU change to {} for cancelled request",
                    identifier, event.mtu
                );
            }
        });

        let event = rx
            .await
            .map_err(|_| Error::Internal("request task dropped".into()))??;
        check_status("MtuChanged", event.status)?;
        Ok(event.mtu)
    }

    async fn acquire(&self) -> Result<OwnedMutexGuard<CallbackReceivers>> {
        if self.is_closed() {
            return Err(Error::NotConnected("Connection closed".into()));
        }
        Ok(self.guard.clone().lock_owned().await)
    }

    /// Discovers services, retrying while the native stack reports none, and
    /// publishes the result.
    pub async fn discover_services(&self) -> Result<Vec<DiscoveredService>> {
        trace!("[{}] Discovering services", self.identifier);
        let services = self
            .discovery
            .discover(&self.identifier, move || async move {
                self.execute::<ServicesDiscovered, _>(|link| link.discover_services())
                    .await?;
                let link = self.link.clone();
                self.dispatcher.run(move || Ok(link.services())).await
            })
            .await?;
        self.services.send_replace(Some(services.clone()));
        Ok(services)
    }

    /// Gracefully disconnects, then closes.
    ///
    /// Connection tasks are cancelled and awaited before the native
    /// disconnect is issued. If the link does not report `Disconnected`
    /// within the disconnect timeout the connection is closed regardless.
    pub async fn disconnect(&self) {
        if self.is_closed() || self.state.borrow().is_disconnected() {
            self.close();
            return;
        }

        let graceful = async {
            trace!("[{}] Waiting for connection tasks to complete", self.identifier);
            self.task_scope.cancel();
            self.task_scope.wait().await;

            debug!("[{}] Disconnecting", self.identifier);
            let link = self.link.clone();
            self.dispatcher
                .run(move || {
                    link.disconnect();
                    Ok(())
                })
                .await?;

            let mut state = self.state.clone();
            let disconnected = state.wait_for(|s| s.is_disconnected()).await.is_ok();
            if disconnected {
                Ok(())
            } else {
                Err(Error::Internal("state channel closed".into()))
            }
        };

        match tokio::time::timeout(self.disconnect_timeout, graceful).await {
            Ok(Ok(())) => info!("[{}] Disconnected", self.identifier),
            Ok(Err(e)) => warn!("[{}] Disconnect failed: {}", self.identifier, e),
            Err(_) => warn!(
                "[{}] Timed out after {:?} waiting for disconnect",
                self.identifier, self.disconnect_timeout
            ),
        }
        self.close();
    }

    /// Releases the link immediately. Pending and future requests fail with
    /// `NotConnected`; the state settles at `Disconnected`.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("[{}] Closing", self.identifier);
        self.task_scope.cancel();
        self.callback.close_queues();
        self.link.close();
        self.callback.set_disconnected(None);
        self.callback.dispose();
        info!("[{}] Closed", self.identifier);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Maps a completion status to an error. Bonding statuses take precedence
/// over the generic status error.
fn check_status(operation: &str, status: GattStatus) -> Result<()> {
    if status.requires_bond() {
        return Err(Error::BondRequired { status });
    }
    if !status.is_success() {
        return Err(Error::Status {
            operation: operation.to_string(),
            status,
        });
    }
    Ok(())
}
