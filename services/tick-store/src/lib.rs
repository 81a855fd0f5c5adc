//! Tick Store
//!
//! Append-only, fixed-capacity record arrays shared between one writer and
//! many readers through memory-mapped files, plus the window arithmetic
//! consumers use to follow a growing store incrementally.
//!
//! # Modules
//! - `store`: `MmapStore<R>`, the mapped data/index pair and its cursor
//! - `files`: in-place growth and end-of-day truncation
//! - `slicer`: `WindowSlicer` for next/overlap/tail ranges over the cursor

pub mod files;
pub mod slicer;
pub mod store;

pub use files::{StorePaths, TruncateReport, extend_file, truncate_file, truncate_store};
pub use slicer::{SlicerError, WindowSlicer};
pub use store::{AccessMode, Appended, INDEX_BYTES, INDEX_SLOTS, MmapStore, StoreError};
