//! Bluetooth UUIDs
//!
//! Services, characteristics and descriptors are identified by 128-bit UUIDs.
//! SIG-assigned attributes use 16 or 32-bit aliases expanded against the
//! Bluetooth base UUID `00000000-0000-1000-8000-00805F9B34FB`.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;
const ALIAS_SHIFT: u32 = 96;
const ALIAS_MASK: u128 = !((u32::MAX as u128) << ALIAS_SHIFT);

/// A 128-bit Bluetooth UUID, stored in its big-endian numeric form.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uuid(u128);

impl Uuid {
    pub const fn from_u128(value: u128) -> Self {
        Uuid(value)
    }

    /// Expands a 16-bit SIG-assigned alias.
    pub const fn from_u16(alias: u16) -> Self {
        Uuid(BASE_UUID | ((alias as u128) << ALIAS_SHIFT))
    }

    /// Expands a 32-bit SIG-assigned alias.
    pub const fn from_u32(alias: u32) -> Self {
        Uuid(BASE_UUID | ((alias as u128) << ALIAS_SHIFT))
    }

    pub const fn as_u128(&self) -> u128 {
        self.0
    }

    pub fn as_bytes_be(&self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    fn is_sig_assigned(&self) -> bool {
        self.0 & ALIAS_MASK == BASE_UUID
    }

    /// The 16-bit alias, if this is a SIG-assigned 16-bit UUID.
    pub fn as_u16(&self) -> Option<u16> {
        self.as_u32().and_then(|alias| u16::try_from(alias).ok())
    }

    /// The 32-bit alias, if this is derived from the base UUID.
    pub fn as_u32(&self) -> Option<u32> {
        if self.is_sig_assigned() {
            Some((self.0 >> ALIAS_SHIFT) as u32)
        } else {
            None
        }
    }
}

impl From<u16> for Uuid {
    fn from(alias: u16) -> Self {
        Uuid::from_u16(alias)
    }
}

impl From<u32> for Uuid {
    fn from(alias: u32) -> Self {
        Uuid::from_u32(alias)
    }
}

impl From<u128> for Uuid {
    fn from(value: u128) -> Self {
        Uuid(value)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = hex::encode(self.as_bytes_be());
        write!(
            f,
            "{}-{}-{}-{}-{}",
            &b[0..8],
            &b[8..12],
            &b[12..16],
            &b[16..20],
            &b[20..32]
        )
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.as_u16(), self.as_u32()) {
            (Some(alias), _) => write!(f, "Uuid(0x{:04X})", alias),
            (None, Some(alias)) => write!(f, "Uuid(0x{:08X})", alias),
            _ => write!(f, "Uuid({})", self),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum UuidParseError {
    #[error("UUID must have 4, 8 or 32 hex digits, found {0}")]
    InvalidLength(usize),

    #[error("Invalid UUID: {0}")]
    InvalidFormat(#[from] hex::FromHexError),
}

impl FromStr for Uuid {
    type Err = UuidParseError;

    /// Accepts 16-bit (`180A`), 32-bit (`0000180A`) and full 128-bit forms,
    /// with or without hyphens.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| *c != '-').collect();
        let mut bytes = [0u8; 16];
        match digits.len() {
            4 => {
                hex::decode_to_slice(&digits, &mut bytes[..2])?;
                Ok(Uuid::from_u16(u16::from_be_bytes([bytes[0], bytes[1]])))
            }
            8 => {
                hex::decode_to_slice(&digits, &mut bytes[..4])?;
                Ok(Uuid::from_u32(u32::from_be_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3],
                ])))
            }
            32 => {
                hex::decode_to_slice(&digits, &mut bytes)?;
                Ok(Uuid(u128::from_be_bytes(bytes)))
            }
            n => Err(UuidParseError::InvalidLength(n)),
        }
    }
}
