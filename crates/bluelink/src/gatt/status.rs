//! Operation status reported with every GATT completion

use super::constants::*;
use std::fmt;

/// Raw status code attached to a GATT operation completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GattStatus(pub u16);

impl GattStatus {
    pub const SUCCESS: GattStatus = GattStatus(GATT_SUCCESS);

    /// Returns the raw status code.
    pub const fn code(self) -> u16 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self.0 == GATT_SUCCESS
    }

    /// Whether the peer refused the operation until the link is bonded.
    ///
    /// Callers receiving one of these statuses are expected to start a pairing
    /// flow and retry.
    pub fn requires_bond(self) -> bool {
        matches!(
            self.0,
            GATT_INSUFFICIENT_AUTHENTICATION | GATT_INSUFFICIENT_ENCRYPTION | GATT_AUTH_FAIL
        )
    }

    fn name(self) -> &'static str {
        match self.0 {
            GATT_SUCCESS => "GATT_SUCCESS",
            GATT_INVALID_HANDLE => "GATT_INVALID_HANDLE",
            GATT_READ_NOT_PERMITTED => "GATT_READ_NOT_PERMITTED",
            GATT_WRITE_NOT_PERMITTED => "GATT_WRITE_NOT_PERMITTED",
            GATT_INVALID_PDU => "GATT_INVALID_PDU",
            GATT_INSUFFICIENT_AUTHENTICATION => "GATT_INSUFFICIENT_AUTHENTICATION",
            GATT_REQUEST_NOT_SUPPORTED => "GATT_REQUEST_NOT_SUPPORTED",
            GATT_INVALID_OFFSET => "GATT_INVALID_OFFSET",
            GATT_INSUFFICIENT_AUTHORIZATION => "GATT_INSUFFICIENT_AUTHORIZATION",
            GATT_PREPARE_QUEUE_FULL => "GATT_PREPARE_QUEUE_FULL",
            GATT_NOT_FOUND => "GATT_NOT_FOUND",
            GATT_NOT_LONG => "GATT_NOT_LONG",
            GATT_INSUFFICIENT_KEY_SIZE => "GATT_INSUFFICIENT_KEY_SIZE",
            GATT_INVALID_ATTRIBUTE_LENGTH => "GATT_INVALID_ATTRIBUTE_LENGTH",
            GATT_UNLIKELY => "GATT_UNLIKELY",
            GATT_INSUFFICIENT_ENCRYPTION => "GATT_INSUFFICIENT_ENCRYPTION",
            GATT_UNSUPPORTED_GROUP_TYPE => "GATT_UNSUPPORTED_GROUP_TYPE",
            GATT_INSUFFICIENT_RESOURCES => "GATT_INSUFFICIENT_RESOURCES",
            GATT_NO_RESOURCES => "GATT_NO_RESOURCES",
            GATT_INTERNAL_ERROR => "GATT_INTERNAL_ERROR",
            GATT_WRONG_STATE => "GATT_WRONG_STATE",
            GATT_DB_FULL => "GATT_DB_FULL",
            GATT_BUSY => "GATT_BUSY",
            GATT_ERROR => "GATT_ERROR",
            GATT_CMD_STARTED => "GATT_CMD_STARTED",
            GATT_ILLEGAL_PARAMETER => "GATT_ILLEGAL_PARAMETER",
            GATT_PENDING => "GATT_PENDING",
            GATT_AUTH_FAIL => "GATT_AUTH_FAIL",
            GATT_MORE => "GATT_MORE",
            GATT_INVALID_CFG => "GATT_INVALID_CFG",
            GATT_SERVICE_STARTED => "GATT_SERVICE_STARTED",
            GATT_ENCRYPTED_NO_MITM => "GATT_ENCRYPTED_NO_MITM",
            GATT_NOT_ENCRYPTED => "GATT_NOT_ENCRYPTED",
            GATT_CONNECTION_CONGESTED => "GATT_CONNECTION_CONGESTED",
            GATT_CCC_CFG_ERR => "GATT_CCC_CFG_ERR",
            GATT_PRC_IN_PROGRESS => "GATT_PRC_IN_PROGRESS",
            GATT_OUT_OF_RANGE => "GATT_OUT_OF_RANGE",
            GATT_FAILURE => "GATT_FAILURE",
            _ => "GATT_UNKNOWN",
        }
    }
}

impl From<u16> for GattStatus {
    fn from(code: u16) -> Self {
        GattStatus(code)
    }
}

impl From<GattStatus> for u16 {
    fn from(status: GattStatus) -> Self {
        status.0
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}
