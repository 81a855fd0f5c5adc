//! Error types for record construction
//!
//! Storage and aggregation errors live with the crates that raise them.

use thiserror::Error;

/// Errors raised while building or decoding fixed-layout records.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("Symbol code {code:?} exceeds {max} bytes")]
    SymbolTooLong { code: String, max: usize },

    #[error("Symbol code {code:?} is not ASCII")]
    NonAscii { code: String },

    #[error("Unknown instrument type discriminator: {0}")]
    UnknownInstrumentType(i8),

    #[error("Invalid local time {hour:02}:{minute:02}:{second:02}")]
    InvalidTime { hour: u32, minute: u32, second: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_too_long_display() {
        let err = RecordError::SymbolTooLong {
            code: "VERY-LONG-SYMBOL-CODE".to_string(),
            max: 16,
        };
        assert!(err.to_string().contains("VERY-LONG-SYMBOL-CODE"));
        assert!(err.to_string().contains("16"));
    }

    #[test]
    fn test_invalid_time_display() {
        let err = RecordError::InvalidTime {
            hour: 25,
            minute: 0,
            second: 7,
        };
        assert_eq!(err.to_string(), "Invalid local time 25:00:07");
    }
}
