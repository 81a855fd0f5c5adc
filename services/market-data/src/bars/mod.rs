//! Incremental per-symbol aggregation
//!
//! Every aggregator follows the same bucket state machine:
//!
//! ```text
//! unseen key ──first record──▶ open bucket ──same label──▶ open bucket
//!                                   │
//!                            different label
//!                                   ▼
//!                      previous row frozen, next row reserved
//! ```
//!
//! The open bucket's row is rewritten in place on every record; the store
//! cursor is published once per `extend` call. Keyed state lives in a
//! [`KeyedArena`] so the hot loop never allocates once every key is known.

pub mod aggregator;
pub mod day;
pub mod signal;
pub mod volume;

use std::collections::HashMap;
use std::hash::Hash;

use bytemuck::Pod;
use tick_store::{AccessMode, MmapStore, StoreError};
use types::prelude::*;

pub use aggregator::{BarAggregator, ResampleAggregator, TickBarAggregator};
pub use day::DaySnapshotAggregator;
pub use signal::SignalAggregator;
pub use volume::{CumulativeDelta, SummedDeltas, VolumeAccounting};

// ── Keyed state ─────────────────────────────────────────────────────

/// Map from a fixed-width key to a slot in a contiguous state vector.
#[derive(Debug, Clone)]
pub struct KeyedArena<K, S> {
    index: HashMap<K, usize>,
    slots: Vec<S>,
}

impl<K: Eq + Hash + Copy, S> KeyedArena<K, S> {
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            index: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
        }
    }

    /// State for `key`, created with `init` on first sight.
    pub fn get_or_insert_with(&mut self, key: K, init: impl FnOnce() -> S) -> &mut S {
        let slots = &mut self.slots;
        let slot = *self.index.entry(key).or_insert_with(|| {
            slots.push(init());
            slots.len() - 1
        });
        &mut self.slots[slot]
    }

    pub fn get(&self, key: &K) -> Option<&S> {
        self.index.get(key).map(|&slot| &self.slots[slot])
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop every key; allocations are kept for reuse.
    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &S)> {
        self.index.iter().map(move |(key, &slot)| (key, &self.slots[slot]))
    }
}

impl<K: Eq + Hash + Copy, S> Default for KeyedArena<K, S> {
    fn default() -> Self {
        Self::new()
    }
}

// ── Results ─────────────────────────────────────────────────────────

/// Row counter movement produced by one `extend` call.
///
/// Rows in `[prev_row, new_row)` were opened by the call; the row before
/// `prev_row` of any key touched may also have been rewritten while its
/// bucket was still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Emitted {
    pub prev_row: usize,
    pub new_row: usize,
    pub rows: usize,
}

impl Emitted {
    fn between(prev_row: usize, new_row: usize) -> Self {
        Self {
            prev_row,
            new_row,
            rows: new_row - prev_row,
        }
    }
}

/// Records seen and skipped by an aggregator since it was built or reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AggregatorStats {
    pub processed: u64,
    pub out_of_session: u64,
    pub stale: u64,
    pub unopened: u64,
}

// ── Inputs ──────────────────────────────────────────────────────────

/// A record that can be folded into a bar.
///
/// Ticks contribute a single price; finer bars contribute their own OHLC.
pub trait BarInput: Pod {
    fn code(&self) -> SymbolCode;
    /// Time used for labelling.
    fn time(&self) -> u64;
    fn first_time(&self) -> u64;
    fn last_time(&self) -> u64;
    fn open_price(&self) -> f32;
    fn high_price(&self) -> f32;
    fn low_price(&self) -> f32;
    fn close_price(&self) -> f32;
    /// Previous close, used to seed the first bucket of a key.
    fn prev_close(&self) -> f32;
    fn amount(&self) -> f64;
    fn volume(&self) -> u64;
    fn kind(&self) -> i8;
    fn top_of_book(&self) -> Quote;

    /// False for records that must not contribute yet.
    fn is_open(&self) -> bool {
        true
    }
}

impl BarInput for Tick {
    fn code(&self) -> SymbolCode {
        self.code
    }
    fn time(&self) -> u64 {
        self.time
    }
    fn first_time(&self) -> u64 {
        self.time
    }
    fn last_time(&self) -> u64 {
        self.time
    }
    fn open_price(&self) -> f32 {
        self.last_price
    }
    fn high_price(&self) -> f32 {
        self.last_price
    }
    fn low_price(&self) -> f32 {
        self.last_price
    }
    fn close_price(&self) -> f32 {
        self.last_price
    }
    fn prev_close(&self) -> f32 {
        self.last_close
    }
    fn amount(&self) -> f64 {
        self.amount
    }
    fn volume(&self) -> u64 {
        self.volume
    }
    fn kind(&self) -> i8 {
        self.kind
    }
    fn top_of_book(&self) -> Quote {
        self.quote()
    }

    // Some symbols still report open == 0 a few seconds after 09:25.
    fn is_open(&self) -> bool {
        self.open != 0.0
    }
}

impl BarInput for Bar {
    fn code(&self) -> SymbolCode {
        self.code
    }
    fn time(&self) -> u64 {
        self.time
    }
    fn first_time(&self) -> u64 {
        self.open_dt
    }
    fn last_time(&self) -> u64 {
        self.close_dt
    }
    fn open_price(&self) -> f32 {
        self.open
    }
    fn high_price(&self) -> f32 {
        self.high
    }
    fn low_price(&self) -> f32 {
        self.low
    }
    fn close_price(&self) -> f32 {
        self.close
    }
    fn prev_close(&self) -> f32 {
        self.pre_close
    }
    fn amount(&self) -> f64 {
        self.amount
    }
    fn volume(&self) -> u64 {
        self.volume
    }
    fn kind(&self) -> i8 {
        self.kind
    }
    fn top_of_book(&self) -> Quote {
        self.quote()
    }
}

/// Cursor of a store an aggregator is about to write to.
///
/// Aggregators resume after existing rows; a read-only handle is rejected
/// up front instead of on the first write.
fn resume_row<R: Pod>(store: &MmapStore<R>) -> Result<usize, StoreError> {
    if store.mode() != AccessMode::ReadWrite {
        return Err(StoreError::ReadOnly {
            path: store.paths().data.clone(),
        });
    }
    Ok(store.cursor())
}
