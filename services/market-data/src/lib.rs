//! Market Data Service
//!
//! Compiles a growing tick store into session-aware bars, a live daily
//! snapshot and bucketed strategy signals, all persisted in mapped stores
//! that other processes read while they are written.
//!
//! # Architecture
//!
//! ```text
//!   tick store (written elsewhere)
//!        │
//!   ┌────▼─────┐
//!   │ Slicer   │  ← next window of unread rows
//!   └────┬─────┘
//!        │
//!   ┌────┴─────┬────────────┐
//!   │          │            │
//! ┌─▼──┐   ┌───▼──┐   ┌─────▼─────┐
//! │ 1m │   │ 5m   │   │ day snap  │   ← SessionClock labels
//! └─┬──┘   └───┬──┘   └─────┬─────┘
//!   │          │            │
//!   ▼          ▼            ▼
//!   bar stores (cursor published per batch)
//! ```

pub mod bars;
pub mod config;
pub mod metrics;
pub mod pipeline;
pub mod session;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
