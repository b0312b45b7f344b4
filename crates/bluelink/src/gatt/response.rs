//! Operation completions delivered by the native transport

use super::status::GattStatus;
use crate::profile::{Characteristic, Descriptor};

#[derive(Debug, Clone, PartialEq)]
pub struct ServicesDiscovered {
    pub status: GattStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CharacteristicRead {
    pub characteristic: Characteristic,
    pub value: Vec<u8>,
    pub status: GattStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CharacteristicWrite {
    pub characteristic: Characteristic,
    pub status: GattStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorRead {
    pub descriptor: Descriptor,
    pub value: Vec<u8>,
    pub status: GattStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorWrite {
    pub descriptor: Descriptor,
    pub status: GattStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadRemoteRssi {
    pub rssi: i32,
    pub status: GattStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationStateChanged {
    pub characteristic: Characteristic,
    pub enabled: bool,
    pub status: GattStatus,
}

/// MTU negotiation result.
///
/// Delivered on its own channel: the peer may renegotiate at any time, so an
/// MTU change is never taken as the reply to an unrelated request.
#[derive(Debug, Clone, PartialEq)]
pub struct MtuChanged {
    pub mtu: u16,
    pub status: GattStatus,
}

/// Completion of a request/response style operation
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    ServicesDiscovered(ServicesDiscovered),
    CharacteristicRead(CharacteristicRead),
    CharacteristicWrite(CharacteristicWrite),
    DescriptorRead(DescriptorRead),
    DescriptorWrite(DescriptorWrite),
    ReadRemoteRssi(ReadRemoteRssi),
    NotificationStateChanged(NotificationStateChanged),
}

impl Response {
    pub fn status(&self) -> GattStatus {
        match self {
            Response::ServicesDiscovered(r) => r.status,
            Response::CharacteristicRead(r) => r.status,
            Response::CharacteristicWrite(r) => r.status,
            Response::DescriptorRead(r) => r.status,
            Response::DescriptorWrite(r) => r.status,
            Response::ReadRemoteRssi(r) => r.status,
            Response::NotificationStateChanged(r) => r.status,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Response::ServicesDiscovered(_) => ServicesDiscovered::NAME,
            Response::CharacteristicRead(_) => CharacteristicRead::NAME,
            Response::CharacteristicWrite(_) => CharacteristicWrite::NAME,
            Response::DescriptorRead(_) => DescriptorRead::NAME,
            Response::DescriptorWrite(_) => DescriptorWrite::NAME,
            Response::ReadRemoteRssi(_) => ReadRemoteRssi::NAME,
            Response::NotificationStateChanged(_) => NotificationStateChanged::NAME,
        }
    }
}

/// A completion type that a request can wait for.
///
/// `from_response` hands the response back unchanged when it is of a
/// different kind, so the caller can report what actually arrived.
pub trait ExpectedResponse: Sized + Send + 'static {
    const NAME: &'static str;

    fn from_response(response: Response) -> Result<Self, Response>;

    fn status(&self) -> GattStatus;
}

macro_rules! expected_response {
    ($($variant:ident => $name:literal),* $(,)?) => {
        $(
            impl ExpectedResponse for $variant {
                const NAME: &'static str = $name;

                fn from_response(response: Response) -> Result<Self, Response> {
                    match response {
                        Response::$variant(inner) => Ok(inner),
                        other => Err(other),
                    }
                }

                fn status(&self) -> GattStatus {
                    self.status
                }
            }

            impl From<$variant> for Response {
                fn from(inner: $variant) -> Self {
                    Response::$variant(inner)
                }
            }
        )*
    };
}

expected_response! {
    ServicesDiscovered => "ServicesDiscovered",
    CharacteristicRead => "CharacteristicRead",
    CharacteristicWrite => "CharacteristicWrite",
    DescriptorRead => "DescriptorRead",
    DescriptorWrite => "DescriptorWrite",
    ReadRemoteRssi => "ReadRemoteRssi",
    NotificationStateChanged => "NotificationStateChanged",
}
