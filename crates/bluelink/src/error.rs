//! Error types for the bluelink library
//!
//! A single closed taxonomy is shared by every layer: connection establishment,
//! GATT operations and observations all fail with [`Error`].

use crate::gatt::GattStatus;
use std::fmt;
use thiserror::Error;

/// Requirement that must hold before a connection can be attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmetRequirementReason {
    /// The local radio is off (or turning off).
    BluetoothDisabled,
}

impl fmt::Display for UnmetRequirementReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnmetRequirementReason::BluetoothDisabled => write!(f, "Bluetooth disabled"),
        }
    }
}

/// Errors that can occur while connecting to or talking with a peripheral
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Requirement unmet: {reason}")]
    RequirementUnmet { reason: UnmetRequirementReason },

    #[error("Connection request rejected by the native stack")]
    ConnectionRejected,

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Request rejected: {0}")]
    RequestRejected(String),

    #[error("{operation} failed with status {status}")]
    Status {
        operation: String,
        status: GattStatus,
    },

    #[error("Bond required (status {status})")]
    BondRequired { status: GattStatus },

    #[error("{0}")]
    NoSuchElement(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this failure is a consequence of the link going away.
    ///
    /// Observation spin-up, spin-down and re-arm swallow exactly these errors:
    /// notification state is cleared by the native stack on disconnect and is
    /// re-established on the next connection.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            Error::NotConnected(_) | Error::ConnectionLost(_) | Error::RequirementUnmet { .. }
        )
    }

    /// Raw GATT status carried by a status-flavoured error.
    pub fn status(&self) -> Option<GattStatus> {
        match self {
            Error::Status { status, .. } | Error::BondRequired { status } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn bluetooth_disabled() -> Self {
        Error::RequirementUnmet {
            reason: UnmetRequirementReason::BluetoothDisabled,
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
