//! Log formatting helpers

use std::fmt;

/// Controls how payloads appear in log messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Include characteristic and descriptor payloads in log messages
    pub data: bool,
    /// Inserted between hex-encoded bytes
    pub separator: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            data: false,
            separator: " ".to_string(),
        }
    }
}

impl LogConfig {
    /// Wraps `bytes` for display, honoring the data and separator settings.
    pub fn payload<'a>(&'a self, bytes: &'a [u8]) -> Payload<'a> {
        Payload {
            bytes,
            config: self,
        }
    }
}

/// Display adapter produced by [`LogConfig::payload`]
pub struct Payload<'a> {
    bytes: &'a [u8],
    config: &'a LogConfig,
}

impl fmt::Display for Payload<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.config.data {
            return write!(f, "<{} bytes>", self.bytes.len());
        }
        let mut first = true;
        for byte in self.bytes {
            if !first {
                f.write_str(&self.config.separator)?;
            }
            first = false;
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}
