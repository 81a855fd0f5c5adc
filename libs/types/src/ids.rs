//! Identifier types for instruments and strategies
//!
//! Symbol codes are stored inline in every record as a fixed 16-byte,
//! zero-padded ASCII field so records stay plain-old-data and the code can
//! double as a hash key without heap allocation.

use std::fmt;
use std::str::FromStr;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::RecordError;

/// Width in bytes of an inline symbol code.
pub const SYMBOL_CODE_LEN: usize = 16;

/// Strategy identifier carried by signal records.
pub type StrategyId = i16;

/// Instrument code such as `600000.SH` or `000300.SH`.
///
/// Zero-padded on the right; the first NUL byte terminates the code.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Pod, Zeroable)]
#[repr(transparent)]
pub struct SymbolCode([u8; SYMBOL_CODE_LEN]);

impl SymbolCode {
    /// Create a symbol code, rejecting codes that do not fit inline.
    pub fn new(code: &str) -> Result<Self, RecordError> {
        if !code.is_ascii() {
            return Err(RecordError::NonAscii {
                code: code.to_string(),
            });
        }
        let bytes = code.as_bytes();
        if bytes.len() > SYMBOL_CODE_LEN {
            return Err(RecordError::SymbolTooLong {
                code: code.to_string(),
                max: SYMBOL_CODE_LEN,
            });
        }
        let mut raw = [0u8; SYMBOL_CODE_LEN];
        raw[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(raw))
    }

    /// Raw inline bytes, including padding.
    pub fn as_bytes(&self) -> &[u8; SYMBOL_CODE_LEN] {
        &self.0
    }

    /// The code without its zero padding.
    pub fn as_str(&self) -> &str {
        let len = self
            .0
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(SYMBOL_CODE_LEN);
        // Constructors only admit ASCII; bytes mapped from foreign files may not be.
        std::str::from_utf8(&self.0[..len]).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }
}

impl fmt::Display for SymbolCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for SymbolCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymbolCode({:?})", self.as_str())
    }
}

impl FromStr for SymbolCode {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for SymbolCode {
    type Error = RecordError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl Serialize for SymbolCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SymbolCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::new(&s).map_err(serde::de::Error::custom)
    }
}
