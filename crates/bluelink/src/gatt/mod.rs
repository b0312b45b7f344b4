//! GATT completions and the per-connection event sink
//!
//! This module defines what a native transport reports back: operation
//! completions ([`Response`]), the status codes attached to them
//! ([`GattStatus`]) and the [`Callback`] through which they are delivered.

pub mod callback;
pub mod constants;
pub mod response;
pub mod status;

#[cfg(test)]
mod tests;

pub use callback::{Callback, CallbackReceivers, LinkState};
pub use response::{
    CharacteristicRead, CharacteristicWrite, DescriptorRead, DescriptorWrite, ExpectedResponse,
    MtuChanged, NotificationStateChanged, ReadRemoteRssi, Response, ServicesDiscovered,
};
pub use status::GattStatus;
