//! Bluelink - client-side connection engine for Bluetooth Low Energy peripherals
//!
//! This library sits between application code and a native BLE stack. It
//! establishes and tears down connections, sequences GATT requests so that
//! only one is ever outstanding per link, and fans characteristic
//! notifications out to any number of independent observers, re-enabling
//! them automatically after a reconnect.
//!
//! The native stack is reached through the [`Transport`] and [`Link`] traits;
//! [`mock`] provides an in-process implementation for tests.

pub mod action;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod gatt;
pub mod logs;
pub mod observation;
pub mod peripheral;
pub mod profile;
pub mod scope;
pub mod state;
pub mod threading;
pub mod transport;
pub mod uuid;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export common types for convenience
pub use action::{ActionScope, SharedRepeatableAction};
pub use error::{Error, Result, UnmetRequirementReason};
pub use gatt::{Callback, GattStatus, LinkState};
pub use logs::LogConfig;
pub use observation::{subscription_hook, ObservationEvent, SubscriptionHook};
pub use peripheral::{
    Peripheral, PeripheralBuilder, PeripheralConfig, ServicesDiscoveredPeripheral,
};
pub use profile::{
    Characteristic, Descriptor, DiscoveredCharacteristic, DiscoveredDescriptor,
    DiscoveredService, Properties, WriteType,
};
pub use scope::TaskScope;
pub use state::{Connecting, DisconnectStatus, State};
pub use threading::Threading;
pub use transport::{BluetoothState, Link, Transport};
pub use uuid::Uuid;
