//! CRC32C (Castagnoli) payload checksum

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fmt;

/// CRC-32C of a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crc32c(u32);

impl Crc32c {
    /// Checksum a whole buffer
    pub fn compute(data: &[u8]) -> Self {
        Self(crc32c::crc32c(data))
    }

    /// Extend the checksum with more bytes
    pub fn update(self, data: &[u8]) -> Self {
        Self(crc32c::crc32c_append(self.0, data))
    }

    pub fn from_value(value: u32) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    /// Base64 of the big-endian bytes, the form storage APIs exchange.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0.to_be_bytes())
    }

    /// Parse the base64 form back into a checksum
    pub fn from_base64(encoded: &str) -> Option<Self> {
        let bytes = STANDARD.decode(encoded.trim()).ok()?;
        let bytes: [u8; 4] = bytes.try_into().ok()?;
        Some(Self(u32::from_be_bytes(bytes)))
    }
}

impl fmt::Display for Crc32c {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}
