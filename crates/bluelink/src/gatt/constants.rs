//! GATT status and link-loss reason constants
//!
//! Status codes are the values a native stack reports alongside an operation
//! completion. Link-loss reasons accompany a transition to the disconnected
//! link state.

// Operation statuses
pub const GATT_SUCCESS: u16 = 0x0000;
pub const GATT_INVALID_HANDLE: u16 = 0x0001;
pub const GATT_READ_NOT_PERMITTED: u16 = 0x0002;
pub const GATT_WRITE_NOT_PERMITTED: u16 = 0x0003;
pub const GATT_INVALID_PDU: u16 = 0x0004;
pub const GATT_INSUFFICIENT_AUTHENTICATION: u16 = 0x0005;
pub const GATT_REQUEST_NOT_SUPPORTED: u16 = 0x0006;
pub const GATT_INVALID_OFFSET: u16 = 0x0007;
pub const GATT_INSUFFICIENT_AUTHORIZATION: u16 = 0x0008;
pub const GATT_PREPARE_QUEUE_FULL: u16 = 0x0009;
pub const GATT_NOT_FOUND: u16 = 0x000A;
pub const GATT_NOT_LONG: u16 = 0x000B;
pub const GATT_INSUFFICIENT_KEY_SIZE: u16 = 0x000C;
pub const GATT_INVALID_ATTRIBUTE_LENGTH: u16 = 0x000D;
pub const GATT_UNLIKELY: u16 = 0x000E;
pub const GATT_INSUFFICIENT_ENCRYPTION: u16 = 0x000F;
pub const GATT_UNSUPPORTED_GROUP_TYPE: u16 = 0x0010;
pub const GATT_INSUFFICIENT_RESOURCES: u16 = 0x0011;
pub const GATT_NO_RESOURCES: u16 = 0x0080;
pub const GATT_INTERNAL_ERROR: u16 = 0x0081;
pub const GATT_WRONG_STATE: u16 = 0x0082;
pub const GATT_DB_FULL: u16 = 0x0083;
pub const GATT_BUSY: u16 = 0x0084;
pub const GATT_ERROR: u16 = 0x0085;
pub const GATT_CMD_STARTED: u16 = 0x0086;
pub const GATT_ILLEGAL_PARAMETER: u16 = 0x0087;
pub const GATT_PENDING: u16 = 0x0088;
pub const GATT_AUTH_FAIL: u16 = 0x0089;
pub const GATT_MORE: u16 = 0x008A;
pub const GATT_INVALID_CFG: u16 = 0x008B;
pub const GATT_SERVICE_STARTED: u16 = 0x008C;
pub const GATT_ENCRYPTED_NO_MITM: u16 = 0x008D;
pub const GATT_NOT_ENCRYPTED: u16 = 0x008E;
pub const GATT_CONNECTION_CONGESTED: u16 = 0x008F;
pub const GATT_CCC_CFG_ERR: u16 = 0x00FD;
pub const GATT_PRC_IN_PROGRESS: u16 = 0x00FE;
pub const GATT_OUT_OF_RANGE: u16 = 0x00FF;
pub const GATT_FAILURE: u16 = 0x0101;

// Link-loss reasons
pub const LINK_REASON_SUCCESS: u16 = 0x0000;
pub const LINK_REASON_L2CAP_FAILURE: u16 = 0x0001;
pub const LINK_REASON_TIMEOUT: u16 = 0x0008;
pub const LINK_REASON_PEER_USER: u16 = 0x0013;
pub const LINK_REASON_LOCAL_HOST: u16 = 0x0016;
pub const LINK_REASON_LMP_TIMEOUT: u16 = 0x0022;
pub const LINK_REASON_FAILED_ESTABLISHMENT: u16 = 0x003E;
pub const LINK_REASON_CANCELLED: u16 = 0x0100;

// Default ATT MTU before any exchange
pub const DEFAULT_MTU: u16 = 23;
