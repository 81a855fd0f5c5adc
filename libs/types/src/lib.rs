//! Types library for the tick store and bar compiler
//!
//! Fixed-layout records shared by every process that maps a store, so a
//! writer and its readers agree on the byte layout without a header.
//!
//! # Modules
//! - `ids`: Inline symbol codes and strategy identifiers
//! - `records`: Tick, Bar and Signal records (plain-old-data)
//! - `time`: Epoch-millisecond / local wall-clock conversions
//! - `errors`: Record construction errors

pub mod errors;
pub mod ids;
pub mod records;
pub mod time;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::errors::*;
    pub use crate::ids::*;
    pub use crate::records::*;
    pub use crate::time::*;
}
