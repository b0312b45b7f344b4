//! GATT profile model
//!
//! [`Characteristic`] and [`Descriptor`] are lightweight references an
//! application builds from well-known UUIDs. After discovery they are
//! resolved against the discovered tree ([`DiscoveredService`] and friends),
//! which carries the native handles and properties.

use crate::error::{Error, Result};
use crate::uuid::Uuid;
use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Characteristic properties as defined in the Bluetooth Core specification
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Properties: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const SIGNED_WRITE = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

/// How a characteristic write is acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteType {
    WithResponse,
    WithoutResponse,
}

impl WriteType {
    /// Property a characteristic must advertise to accept this kind of write.
    pub fn required_property(self) -> Properties {
        match self {
            WriteType::WithResponse => Properties::WRITE,
            WriteType::WithoutResponse => Properties::WRITE_WITHOUT_RESPONSE,
        }
    }
}

/// Reference to a characteristic.
///
/// References built by the application carry no `handle` and match any
/// characteristic instance with the same (service, characteristic) UUID pair.
/// References derived from discovery carry the native handle, which tells
/// apart multiple instances sharing a UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Characteristic {
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    pub handle: Option<u16>,
}

impl Characteristic {
    pub fn new(service_uuid: impl Into<Uuid>, characteristic_uuid: impl Into<Uuid>) -> Self {
        Characteristic {
            service_uuid: service_uuid.into(),
            characteristic_uuid: characteristic_uuid.into(),
            handle: None,
        }
    }

    pub fn descriptor(&self, descriptor_uuid: impl Into<Uuid>) -> Descriptor {
        Descriptor {
            service_uuid: self.service_uuid,
            characteristic_uuid: self.characteristic_uuid,
            descriptor_uuid: descriptor_uuid.into(),
            handle: None,
        }
    }

    /// Whether `other` refers to the same characteristic.
    ///
    /// Handles are compared when both sides have one and `by_uuid` is off;
    /// otherwise the UUID pair decides.
    pub fn matches(&self, other: &Characteristic, by_uuid: bool) -> bool {
        match (self.handle, other.handle) {
            (Some(a), Some(b)) if !by_uuid => a == b,
            _ => {
                self.service_uuid == other.service_uuid
                    && self.characteristic_uuid == other.characteristic_uuid
            }
        }
    }
}

impl fmt::Display for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.service_uuid, self.characteristic_uuid
        )?;
        if let Some(handle) = self.handle {
            write!(f, "@{:#06x}", handle)?;
        }
        Ok(())
    }
}

/// Reference to a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Descriptor {
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    pub descriptor_uuid: Uuid,
    pub handle: Option<u16>,
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.service_uuid, self.characteristic_uuid, self.descriptor_uuid
        )?;
        if let Some(handle) = self.handle {
            write!(f, "@{:#06x}", handle)?;
        }
        Ok(())
    }
}

/// A service reported by discovery
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredService {
    pub uuid: Uuid,
    pub characteristics: Vec<DiscoveredCharacteristic>,
}

/// A characteristic reported by discovery
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredCharacteristic {
    pub service_uuid: Uuid,
    pub uuid: Uuid,
    /// Native value handle
    pub handle: u16,
    pub properties: Properties,
    pub descriptors: Vec<DiscoveredDescriptor>,
}

impl DiscoveredCharacteristic {
    pub fn to_ref(&self) -> Characteristic {
        Characteristic {
            service_uuid: self.service_uuid,
            characteristic_uuid: self.uuid,
            handle: Some(self.handle),
        }
    }
}

/// A descriptor reported by discovery
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredDescriptor {
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    pub uuid: Uuid,
    pub handle: u16,
}

impl DiscoveredDescriptor {
    pub fn to_ref(&self) -> Descriptor {
        Descriptor {
            service_uuid: self.service_uuid,
            characteristic_uuid: self.characteristic_uuid,
            descriptor_uuid: self.uuid,
            handle: Some(self.handle),
        }
    }
}

/// Resolves `characteristic` against the discovered tree.
///
/// With a handle, the exact instance is required. Without one, the first
/// instance advertising any of `properties` wins; an empty `properties`
/// accepts any instance.
pub fn obtain_characteristic<'a>(
    services: &'a [DiscoveredService],
    characteristic: &Characteristic,
    properties: Properties,
) -> Result<&'a DiscoveredCharacteristic> {
    let service_found = services
        .iter()
        .any(|s| s.uuid == characteristic.service_uuid);
    if !service_found {
        return Err(Error::NoSuchElement(format!(
            "Service {} not found",
            characteristic.service_uuid
        )));
    }

    services
        .iter()
        .filter(|s| s.uuid == characteristic.service_uuid)
        .flat_map(|s| s.characteristics.iter())
        .filter(|c| c.uuid == characteristic.characteristic_uuid)
        .filter(|c| characteristic.handle.map_or(true, |h| h == c.handle))
        .find(|c| properties.is_empty() || c.properties.intersects(properties))
        .ok_or_else(|| {
            Error::NoSuchElement(format!(
                "Characteristic {} with properties {:?} not found",
                characteristic, properties
            ))
        })
}

/// Resolves `descriptor` against the discovered tree.
pub fn obtain_descriptor<'a>(
    services: &'a [DiscoveredService],
    descriptor: &Descriptor,
) -> Result<&'a DiscoveredDescriptor> {
    services
        .iter()
        .filter(|s| s.uuid == descriptor.service_uuid)
        .flat_map(|s| s.characteristics.iter())
        .filter(|c| c.uuid == descriptor.characteristic_uuid)
        .flat_map(|c| c.descriptors.iter())
        .filter(|d| d.uuid == descriptor.descriptor_uuid)
        .find(|d| descriptor.handle.map_or(true, |h| h == d.handle))
        .ok_or_else(|| Error::NoSuchElement(format!("Descriptor {} not found", descriptor)))
}
