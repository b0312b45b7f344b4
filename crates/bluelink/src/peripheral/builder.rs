//! Peripheral configuration and construction

use super::{Peripheral, ServicesDiscoveredPeripheral};
use crate::discovery::DEFAULT_DISCOVER_SERVICES_ATTEMPTS;
use crate::error::{Error, Result};
use crate::logs::LogConfig;
use crate::observation::{rethrow, ObservationExceptionHandler};
use crate::threading::Threading;
use crate::transport::Transport;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Default upper bound on a graceful disconnect
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub type ServicesDiscoveredHook =
    Arc<dyn Fn(ServicesDiscoveredPeripheral) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Peripheral configuration
#[derive(Debug, Clone)]
pub struct PeripheralConfig {
    /// How long a graceful disconnect may take before the link is closed anyway
    pub disconnect_timeout: Duration,
    /// Service discovery attempts while the native stack reports no services
    pub discover_services_attempts: usize,
    /// Match observations by UUID pair even when both sides carry a handle
    pub force_characteristic_equality_by_uuid: bool,
    pub threading: Threading,
    pub log: LogConfig,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
            discover_services_attempts: DEFAULT_DISCOVER_SERVICES_ATTEMPTS,
            force_characteristic_equality_by_uuid: false,
            threading: Threading::Inline,
            log: LogConfig::default(),
        }
    }
}

/// Builds a [`Peripheral`] from a configuration and optional hooks
pub struct PeripheralBuilder {
    config: PeripheralConfig,
    on_services_discovered: Option<ServicesDiscoveredHook>,
    exception_handler: ObservationExceptionHandler,
}

impl PeripheralBuilder {
    pub fn new() -> Self {
        PeripheralBuilder {
            config: PeripheralConfig::default(),
            on_services_discovered: None,
            exception_handler: Arc::new(rethrow),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: PeripheralConfig) -> Self {
        self.config = config;
        self
    }

    pub fn disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.config.disconnect_timeout = timeout;
        self
    }

    pub fn discover_services_attempts(mut self, attempts: usize) -> Self {
        self.config.discover_services_attempts = attempts;
        self
    }

    pub fn force_characteristic_equality_by_uuid(mut self, by_uuid: bool) -> Self {
        self.config.force_characteristic_equality_by_uuid = by_uuid;
        self
    }

    pub fn threading(mut self, threading: Threading) -> Self {
        self.config.threading = threading;
        self
    }

    pub fn log(mut self, log: LogConfig) -> Self {
        self.config.log = log;
        self
    }

    /// Runs `hook` after every successful service discovery, before
    /// observations are re-armed. An `Err` fails the connection attempt.
    pub fn on_services_discovered<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(ServicesDiscoveredPeripheral) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.on_services_discovered = Some(Arc::new(move |peripheral| hook(peripheral).boxed()));
        self
    }

    /// Decides what observation errors do to their streams. By default every
    /// error terminates the stream it occurred on.
    pub fn observation_exception_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(Error) -> Result<()> + Send + Sync + 'static,
    {
        self.exception_handler = Arc::new(handler);
        self
    }

    pub fn build(self, transport: Arc<dyn Transport>) -> Result<Peripheral> {
        if self.config.disconnect_timeout.is_zero() {
            return Err(Error::Internal(
                "Disconnect timeout must be positive".into(),
            ));
        }
        Peripheral::new(
            transport,
            self.config,
            self.on_services_discovered,
            self.exception_handler,
        )
    }
}

impl Default for PeripheralBuilder {
    fn default() -> Self {
        Self::new()
    }
}
