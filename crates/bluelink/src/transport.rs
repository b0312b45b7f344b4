//! Native BLE transport abstraction
//!
//! A [`Transport`] opens links to one remote device; a [`Link`] accepts
//! request submissions for an open connection. Submissions return as soon as
//! the native stack has accepted (or refused) the request; the outcome is
//! reported later through the connection's [`Callback`].
//!
//! Implementations must deliver callbacks for a link in order and report at
//! most one operation completion per accepted submission.

use crate::error::Result;
use crate::gatt::Callback;
use crate::profile::{DiscoveredCharacteristic, DiscoveredDescriptor, DiscoveredService, WriteType};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

/// Power state of the local Bluetooth radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BluetoothState {
    On,
    TurningOn,
    TurningOff,
    Off,
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Identifier of the remote device, used in log messages.
    fn identifier(&self) -> String;

    /// Current and future power states of the local radio.
    fn bluetooth_state(&self) -> watch::Receiver<BluetoothState>;

    /// Starts connecting. `None` means the native stack refused the request.
    async fn connect(&self, callback: Callback) -> Result<Option<Arc<dyn Link>>>;
}

/// An open link. Every request method submits one operation; an `Err` is a
/// synchronous rejection and no completion will follow.
pub trait Link: Send + Sync + 'static {
    fn discover_services(&self) -> Result<()>;

    /// Services found by the most recent successful discovery.
    fn services(&self) -> Vec<DiscoveredService>;

    fn read_characteristic(&self, characteristic: &DiscoveredCharacteristic) -> Result<()>;

    fn write_characteristic(
        &self,
        characteristic: &DiscoveredCharacteristic,
        data: &[u8],
        write_type: WriteType,
    ) -> Result<()>;

    fn read_descriptor(&self, descriptor: &DiscoveredDescriptor) -> Result<()>;

    fn write_descriptor(&self, descriptor: &DiscoveredDescriptor, data: &[u8]) -> Result<()>;

    /// Enables or disables notifications (or indications) for a characteristic.
    fn set_notification(
        &self,
        characteristic: &DiscoveredCharacteristic,
        enabled: bool,
    ) -> Result<()>;

    fn request_mtu(&self, mtu: u16) -> Result<()>;

    fn read_rssi(&self) -> Result<()>;

    /// Starts a graceful disconnect; completion arrives as a link state change.
    fn disconnect(&self);

    /// Releases native resources. No callbacks follow.
    fn close(&self);
}
