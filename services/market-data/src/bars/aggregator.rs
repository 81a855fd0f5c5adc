//! Bucketed bar aggregation from ticks or finer bars

use tick_store::{MmapStore, StoreError};
use tracing::{debug, trace};
use types::prelude::*;

use super::volume::{CumulativeDelta, SummedDeltas, VolumeAccounting};
use super::{AggregatorStats, BarInput, Emitted, KeyedArena, resume_row};
use crate::session::Label;

/// Ticks into 1m/5m/... bars.
pub type TickBarAggregator = BarAggregator<CumulativeDelta>;

/// Finer bars into coarser bars.
pub type ResampleAggregator = BarAggregator<SummedDeltas>;

/// Open-bucket state for one symbol.
#[derive(Debug, Clone)]
struct BarState<V> {
    row: usize,
    /// Bucket label in ms; 0 until the first bucket opens.
    time: u64,
    open_dt: u64,
    close_dt: u64,
    open: f32,
    high: f32,
    low: f32,
    close: f32,
    pre_close: f32,
    kind: i8,
    quote: Quote,
    volume: V,
}

impl<V: VolumeAccounting> BarState<V> {
    fn seeded(pre_close: f32) -> Self {
        Self {
            row: 0,
            time: 0,
            open_dt: 0,
            close_dt: 0,
            open: 0.0,
            high: 0.0,
            low: 0.0,
            close: pre_close,
            pre_close: 0.0,
            kind: 0,
            quote: Quote::default(),
            volume: V::default(),
        }
    }

    fn open_bucket(&mut self, time: u64, row: usize, record: &V::Input) {
        self.row = row;
        self.time = time;
        self.open_dt = record.first_time();
        self.kind = record.kind();
        self.pre_close = self.close;
        self.open = record.open_price();
        self.high = record.high_price();
        self.low = record.low_price();
        self.volume.open_bucket();
    }

    fn update(&mut self, record: &V::Input, include_quote: bool) {
        self.high = self.high.max(record.high_price());
        self.low = self.low.min(record.low_price());
        self.close = record.close_price();
        self.close_dt = record.last_time();
        self.volume.observe(record);
        if include_quote {
            self.quote = record.top_of_book();
        }
    }

    fn to_bar(&self, code: SymbolCode) -> Bar {
        let mut bar = Bar {
            code,
            time: self.time,
            open_dt: self.open_dt,
            close_dt: self.close_dt,
            amount: self.volume.amount(),
            volume: self.volume.volume(),
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            pre_close: self.pre_close,
            kind: self.kind,
            ..Bar::default()
        };
        bar.set_quote(&self.quote);
        bar
    }
}

/// Per-symbol bar builder writing into a bar store.
///
/// Inputs must arrive in non-decreasing time order per symbol. Ticks are
/// consumed exactly once (feed it `for_next` windows); finer bars may be
/// re-delivered through overlapping windows.
pub struct BarAggregator<V: VolumeAccounting> {
    store: MmapStore<Bar>,
    states: KeyedArena<SymbolCode, BarState<V>>,
    row: usize,
    include_quote: bool,
    stats: AggregatorStats,
}

impl<V: VolumeAccounting> BarAggregator<V> {
    /// Aggregate into `store`, continuing after its published rows.
    ///
    /// Key state starts empty, so the first record of each symbol after a
    /// restart opens a fresh row even if its bucket already has one.
    pub fn new(store: MmapStore<Bar>, include_quote: bool) -> Result<Self, StoreError> {
        let row = resume_row(&store)?;
        debug!(
            path = %store.paths().data.display(),
            row,
            include_quote,
            "Bar aggregator attached"
        );
        Ok(Self {
            store,
            states: KeyedArena::new(),
            row,
            include_quote,
            stats: AggregatorStats::default(),
        })
    }

    /// Fold `records` into their buckets and publish the new row count.
    ///
    /// Rows are written without a recoverable bounds check; exceeding the
    /// store's capacity panics.
    pub fn extend<L: Label + ?Sized>(
        &mut self,
        records: &[V::Input],
        label: &L,
        tz_offset: i64,
    ) -> Result<Emitted, StoreError> {
        let prev_row = self.row;
        let rows = self.store.rows_mut()?;

        for record in records {
            if !record.is_open() {
                self.stats.unopened += 1;
                continue;
            }
            let Some(time) = label.bucket_start_ms(record.time(), tz_offset) else {
                self.stats.out_of_session += 1;
                continue;
            };

            let code = record.code();
            let state = self
                .states
                .get_or_insert_with(code, || BarState::seeded(record.prev_close()));

            if time < state.time {
                self.stats.stale += 1;
                continue;
            }
            if time != state.time {
                state.open_bucket(time, self.row, record);
                trace!(%code, time, row = self.row, "Bucket opened");
                self.row += 1;
            }
            state.update(record, self.include_quote);

            rows[state.row] = state.to_bar(code);
            self.stats.processed += 1;
        }

        self.store.publish(self.row)?;
        let emitted = Emitted::between(prev_row, self.row);
        debug!(
            input = records.len(),
            opened = emitted.rows,
            cursor = self.row,
            "Bars extended"
        );
        Ok(emitted)
    }

    /// Forget every symbol and rewind the store cursor to 0.
    pub fn reset(&mut self) -> Result<(), StoreError> {
        self.states.clear();
        self.row = 0;
        self.stats = AggregatorStats::default();
        self.store.reset()
    }

    /// Row currently holding the open (or last) bucket of `code`.
    pub fn row_of(&self, code: &SymbolCode) -> Option<usize> {
        self.states.get(code).map(|state| state.row)
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn symbols(&self) -> usize {
        self.states.len()
    }

    pub fn stats(&self) -> AggregatorStats {
        self.stats
    }

    pub fn store(&self) -> &MmapStore<Bar> {
        &self.store
    }

    pub fn into_store(self) -> MmapStore<Bar> {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::BarSize;
    use chrono::NaiveDate;
    use tempfile::TempDir;
    use tick_store::AccessMode;
    use types::time::{DEFAULT_TZ_OFFSET, local_ms};

    const TZ: i64 = DEFAULT_TZ_OFFSET;

    fn at(h: u32, m: u32, s: u32) -> u64 {
        let date = NaiveDate::from_ymd_opt(2025, 2, 28).unwrap();
        local_ms(date, h, m, s, TZ).unwrap()
    }

    fn tick(code: &str, time: u64, price: f32, volume: u64) -> Tick {
        let mut t = Tick::new(SymbolCode::new(code).unwrap(), time, price);
        t.open = 10.0;
        t.last_close = 9.9;
        t.volume = volume;
        t.amount = volume as f64 * price as f64;
        t.kind = InstrumentType::Stock.as_i8();
        t
    }

    fn aggregator(tmp: &TempDir, name: &str) -> TickBarAggregator {
        let store =
            MmapStore::<Bar>::open(tmp.path().join(name), 1_000, AccessMode::ReadWrite, false)
                .unwrap();
        TickBarAggregator::new(store, true).unwrap()
    }

    #[test]
    fn test_ohlc_within_one_bucket() {
        let tmp = TempDir::new().unwrap();
        let mut agg = aggregator(&tmp, "m1");
        let ticks = [
            tick("600000.SH", at(10, 0, 3), 10.0, 100),
            tick("600000.SH", at(10, 0, 6), 10.4, 150),
            tick("600000.SH", at(10, 0, 9), 9.8, 150),
            tick("600000.SH", at(10, 0, 12), 10.1, 170),
        ];

        let emitted = agg.extend(&ticks, &BarSize::M1, TZ).unwrap();
        assert_eq!(emitted.rows, 1);

        let bar = agg.store().valid_rows()[0];
        assert_eq!(bar.time, at(10, 0, 0));
        assert_eq!(bar.open_dt, at(10, 0, 3));
        assert_eq!(bar.close_dt, at(10, 0, 12));
        assert_eq!((bar.open, bar.high, bar.low, bar.close), (10.0, 10.4, 9.8, 10.1));
        assert_eq!(bar.pre_close, 9.9);
        assert_eq!(bar.volume, 70);
        assert!(bar.is_valid());
    }

    #[test]
    fn test_unopened_and_out_of_session_skipped() {
        let tmp = TempDir::new().unwrap();
        let mut agg = aggregator(&tmp, "m1");
        let mut unopened = tick("600000.SH", at(9, 25, 3), 10.0, 100);
        unopened.open = 0.0;
        let ticks = [
            tick("600000.SH", at(9, 10, 0), 10.0, 10),
            unopened,
            tick("600000.SH", at(15, 5, 0), 10.0, 900),
        ];

        let emitted = agg.extend(&ticks, &BarSize::M1, TZ).unwrap();
        assert_eq!(emitted.rows, 0);
        assert_eq!(agg.store().cursor(), 0);
        let stats = agg.stats();
        assert_eq!(stats.unopened, 1);
        assert_eq!(stats.out_of_session, 2);
    }

    #[test]
    fn test_quote_follows_include_flag() {
        let tmp = TempDir::new().unwrap();
        let store =
            MmapStore::<Bar>::open(tmp.path().join("m1"), 10, AccessMode::ReadWrite, false)
                .unwrap();
        let mut agg = TickBarAggregator::new(store, false).unwrap();
        let mut t = tick("600000.SH", at(10, 0, 3), 10.0, 100);
        t.ask_price[0] = 10.01;

        agg.extend(&[t], &BarSize::M1, TZ).unwrap();
        assert_eq!(agg.store().valid_rows()[0].ask_price_1, 0.0);
    }

    #[test]
    fn test_read_only_store_rejected() {
        let tmp = TempDir::new().unwrap();
        let stem = tmp.path().join("m1");
        drop(MmapStore::<Bar>::open(&stem, 10, AccessMode::ReadWrite, false).unwrap());
        let store = MmapStore::<Bar>::open(&stem, 10, AccessMode::ReadOnly, false).unwrap();
        assert!(matches!(
            TickBarAggregator::new(store, true),
            Err(StoreError::ReadOnly { .. })
        ));
    }
}
