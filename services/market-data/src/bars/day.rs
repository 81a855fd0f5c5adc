//! Live daily snapshot from ticks
//!
//! Unlike the bucketed aggregators, every tick overwrites the symbol's day
//! row with the exchange's own running values, so the store always holds
//! today's OHLC, cumulative amount/volume and best quotes as of the latest
//! tick. Reset it at the start of each trading day.

use tick_store::{MmapStore, StoreError};
use tracing::{debug, info};
use types::prelude::*;

use super::{AggregatorStats, Emitted, KeyedArena, resume_row};
use crate::session::{BarSize, Label};

#[derive(Debug, Clone, Copy)]
struct DayState {
    row: usize,
    bar: Bar,
}

pub struct DaySnapshotAggregator {
    store: MmapStore<Bar>,
    states: KeyedArena<SymbolCode, DayState>,
    row: usize,
    stats: AggregatorStats,
}

impl DaySnapshotAggregator {
    pub fn new(store: MmapStore<Bar>) -> Result<Self, StoreError> {
        let row = resume_row(&store)?;
        Ok(Self {
            store,
            states: KeyedArena::new(),
            row,
            stats: AggregatorStats::default(),
        })
    }

    /// Overwrite each ticked symbol's day row and publish the row count.
    pub fn extend(&mut self, ticks: &[Tick], tz_offset: i64) -> Result<Emitted, StoreError> {
        let prev_row = self.row;
        let rows = self.store.rows_mut()?;

        for tick in ticks {
            let Some(time) = BarSize::D1.bucket_start_ms(tick.time, tz_offset) else {
                self.stats.out_of_session += 1;
                continue;
            };

            let state = self.states.get_or_insert_with(tick.code, || DayState {
                row: 0,
                bar: Bar::default(),
            });
            if time < state.bar.time {
                self.stats.stale += 1;
                continue;
            }

            let bar = &mut state.bar;
            if time != bar.time {
                state.row = self.row;
                self.row += 1;
                bar.code = tick.code;
                bar.time = time;
                bar.open_dt = tick.time;
                bar.kind = tick.kind;
                bar.pre_close = tick.last_close;
            }
            // Open is still 0 for some symbols until shortly after 09:25.
            bar.open = tick.open;
            bar.high = tick.high;
            bar.low = tick.low;
            bar.close = tick.last_price;
            bar.close_dt = tick.time;
            bar.amount = tick.amount;
            bar.volume = tick.volume;
            bar.set_quote(&tick.quote());

            rows[state.row] = *bar;
            self.stats.processed += 1;
        }

        self.store.publish(self.row)?;
        let emitted = Emitted::between(prev_row, self.row);
        debug!(
            input = ticks.len(),
            opened = emitted.rows,
            cursor = self.row,
            "Day snapshot extended"
        );
        Ok(emitted)
    }

    /// Latest snapshot for `code`.
    pub fn snapshot(&self, code: &SymbolCode) -> Option<&Bar> {
        self.states.get(code).map(|state| &state.bar)
    }

    /// Start a new trading day: forget every symbol and rewind the cursor.
    pub fn reset(&mut self) -> Result<(), StoreError> {
        info!(symbols = self.states.len(), "Resetting day snapshot");
        self.states.clear();
        self.row = 0;
        self.stats = AggregatorStats::default();
        self.store.reset()
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn stats(&self) -> AggregatorStats {
        self.stats
    }

    pub fn store(&self) -> &MmapStore<Bar> {
        &self.store
    }
}
