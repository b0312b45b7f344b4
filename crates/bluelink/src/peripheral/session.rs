//! GATT operations against an open connection

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::gatt::{
    CharacteristicRead, CharacteristicWrite, DescriptorRead, DescriptorWrite,
    NotificationStateChanged, ReadRemoteRssi,
};
use crate::logs::LogConfig;
use crate::profile::{
    obtain_characteristic, obtain_descriptor, Characteristic, Descriptor,
    DiscoveredCharacteristic, DiscoveredDescriptor, DiscoveredService, Properties, WriteType,
};
use log::{debug, trace};
use std::sync::Arc;
use tokio::sync::watch;

/// A connection paired with the services discovered on it.
#[derive(Clone)]
pub(crate) struct Session {
    connection: Arc<Connection>,
    services: watch::Receiver<Option<Vec<DiscoveredService>>>,
    log: LogConfig,
}

impl Session {
    pub(crate) fn new(
        connection: Arc<Connection>,
        services: watch::Receiver<Option<Vec<DiscoveredService>>>,
        log: LogConfig,
    ) -> Self {
        Session {
            connection,
            services,
            log,
        }
    }

    fn identifier(&self) -> &str {
        self.connection.identifier()
    }

    pub(crate) fn services(&self) -> Vec<DiscoveredService> {
        self.services.borrow().clone().unwrap_or_default()
    }

    fn characteristic(
        &self,
        characteristic: &Characteristic,
        properties: Properties,
    ) -> Result<DiscoveredCharacteristic> {
        let services = self.services.borrow();
        let services = services
            .as_deref()
            .ok_or_else(|| Error::NotConnected("Services not discovered".into()))?;
        obtain_characteristic(services, characteristic, properties).cloned()
    }

    fn descriptor(&self, descriptor: &Descriptor) -> Result<DiscoveredDescriptor> {
        let services = self.services.borrow();
        let services = services
            .as_deref()
            .ok_or_else(|| Error::NotConnected("Services not discovered".into()))?;
        obtain_descriptor(services, descriptor).cloned()
    }

    pub(crate) async fn read(&self, characteristic: &Characteristic) -> Result<Vec<u8>> {
        let target = self.characteristic(characteristic, Properties::READ)?;
        debug!("[{}] Reading {}", self.identifier(), characteristic);
        let response = self
            .connection
            .execute::<CharacteristicRead, _>(move |link| link.read_characteristic(&target))
            .await?;
        debug!(
            "[{}] Read {}: {}",
            self.identifier(),
            characteristic,
            self.log.payload(&response.value)
        );
        Ok(response.value)
    }

    pub(crate) async fn write(
        &self,
        characteristic: &Characteristic,
        data: &[u8],
        write_type: WriteType,
    ) -> Result<()> {
        let target = self.characteristic(characteristic, write_type.required_property())?;
        debug!(
            "[{}] Writing ({:?}) {}: {}",
            self.identifier(),
            write_type,
            characteristic,
            self.log.payload(data)
        );
        let data = data.to_vec();
        self.connection
            .execute::<CharacteristicWrite, _>(move |link| {
                link.write_characteristic(&target, &data, write_type)
            })
            .await?;
        trace!("[{}] Wrote {}", self.identifier(), characteristic);
        Ok(())
    }

    pub(crate) async fn read_descriptor(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        let target = self.descriptor(descriptor)?;
        debug!("[{}] Reading {}", self.identifier(), descriptor);
        let response = self
            .connection
            .execute::<DescriptorRead, _>(move |link| link.read_descriptor(&target))
            .await?;
        debug!(
            "[{}] Read {}: {}",
            self.identifier(),
            descriptor,
            self.log.payload(&response.value)
        );
        Ok(response.value)
    }

    pub(crate) async fn write_descriptor(&self, descriptor: &Descriptor, data: &[u8]) -> Result<()> {
        let target = self.descriptor(descriptor)?;
        debug!(
            "[{}] Writing {}: {}",
            self.identifier(),
            descriptor,
            self.log.payload(data)
        );
        let data = data.to_vec();
        self.connection
            .execute::<DescriptorWrite, _>(move |link| link.write_descriptor(&target, &data))
            .await?;
        trace!("[{}] Wrote {}", self.identifier(), descriptor);
        Ok(())
    }

    pub(crate) async fn set_notification(
        &self,
        characteristic: &Characteristic,
        enabled: bool,
    ) -> Result<()> {
        let target =
            self.characteristic(characteristic, Properties::NOTIFY | Properties::INDICATE)?;
        debug!(
            "[{}] {} notifications for {}",
            self.identifier(),
            if enabled { "Enabling" } else { "Disabling" },
            characteristic
        );
        self.connection
            .execute::<NotificationStateChanged, _>(move |link| {
                link.set_notification(&target, enabled)
            })
            .await?;
        Ok(())
    }

    pub(crate) async fn rssi(&self) -> Result<i32> {
        let response = self
            .connection
            .execute::<ReadRemoteRssi, _>(|link| link.read_rssi())
            .await?;
        trace!("[{}] RSSI {}", self.identifier(), response.rssi);
        Ok(response.rssi)
    }

    pub(crate) async fn request_mtu(&self, mtu: u16) -> Result<u16> {
        debug!("[{}] Requesting MTU {}", self.identifier(), mtu);
        let negotiated = self.connection.request_mtu(mtu).await?;
        debug!("[{}] MTU negotiated at {}", self.identifier(), negotiated);
        Ok(negotiated)
    }
}

/// Handle passed to the services-discovered hook.
///
/// The hook runs while the peripheral is in `Connecting(Services)`, before
/// observations are re-armed, so it can prepare the peer (request an MTU,
/// write a configuration characteristic) ahead of any notification.
#[derive(Clone)]
pub struct ServicesDiscoveredPeripheral {
    session: Session,
}

impl ServicesDiscoveredPeripheral {
    pub(crate) fn new(session: Session) -> Self {
        ServicesDiscoveredPeripheral { session }
    }

    pub fn services(&self) -> Vec<DiscoveredService> {
        self.session.services()
    }

    pub async fn read(&self, characteristic: &Characteristic) -> Result<Vec<u8>> {
        self.session.read(characteristic).await
    }

    pub async fn write(
        &self,
        characteristic: &Characteristic,
        data: &[u8],
        write_type: WriteType,
    ) -> Result<()> {
        self.session.write(characteristic, data, write_type).await
    }

    pub async fn read_descriptor(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        self.session.read_descriptor(descriptor).await
    }

    pub async fn write_descriptor(&self, descriptor: &Descriptor, data: &[u8]) -> Result<()> {
        self.session.write_descriptor(descriptor, data).await
    }

    pub async fn request_mtu(&self, mtu: u16) -> Result<u16> {
        self.session.request_mtu(mtu).await
    }
}
