//! Strategy signals bucketed like bars
//!
//! Keyed by `(symbol, strategy_id)`. Within a bucket the latest signal's
//! payload wins; `open_dt`/`close_dt` record the first and last signal times.

use tick_store::{MmapStore, StoreError};
use tracing::debug;
use types::prelude::*;

use super::{AggregatorStats, Emitted, KeyedArena, resume_row};
use crate::session::Label;

#[derive(Debug, Clone, Copy)]
struct SignalState {
    row: usize,
    signal: Signal,
}

pub struct SignalAggregator {
    store: MmapStore<Signal>,
    states: KeyedArena<(SymbolCode, StrategyId), SignalState>,
    row: usize,
    stats: AggregatorStats,
}

impl SignalAggregator {
    pub fn new(store: MmapStore<Signal>) -> Result<Self, StoreError> {
        let row = resume_row(&store)?;
        Ok(Self {
            store,
            states: KeyedArena::new(),
            row,
            stats: AggregatorStats::default(),
        })
    }

    pub fn extend<L: Label + ?Sized>(
        &mut self,
        signals: &[Signal],
        label: &L,
        tz_offset: i64,
    ) -> Result<Emitted, StoreError> {
        let prev_row = self.row;
        let rows = self.store.rows_mut()?;

        for input in signals {
            let Some(time) = label.bucket_start_ms(input.time, tz_offset) else {
                self.stats.out_of_session += 1;
                continue;
            };

            let key = (input.code, input.strategy_id);
            let state = self.states.get_or_insert_with(key, || SignalState {
                row: 0,
                signal: Signal::new(input.code, input.strategy_id, 0),
            });
            if time < state.signal.time {
                self.stats.stale += 1;
                continue;
            }

            let signal = &mut state.signal;
            if time != signal.time {
                state.row = self.row;
                self.row += 1;
                signal.time = time;
                signal.open_dt = input.time;
            }
            signal.close_dt = input.time;
            signal.value_f32 = input.value_f32;
            signal.value_i32 = input.value_i32;
            signal.flag = input.flag;

            rows[state.row] = *signal;
            self.stats.processed += 1;
        }

        self.store.publish(self.row)?;
        let emitted = Emitted::between(prev_row, self.row);
        debug!(
            input = signals.len(),
            opened = emitted.rows,
            cursor = self.row,
            "Signals extended"
        );
        Ok(emitted)
    }

    /// Latest signal for a symbol and strategy.
    pub fn latest(&self, code: SymbolCode, strategy_id: StrategyId) -> Option<&Signal> {
        self.states
            .get(&(code, strategy_id))
            .map(|state| &state.signal)
    }

    pub fn reset(&mut self) -> Result<(), StoreError> {
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

    pub fn store(&self) -> &MmapStore<Signal> {
        &self.store
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

    fn signal(code: &str, strategy: StrategyId, time: u64, value: f32) -> Signal {
        let mut s = Signal::new(SymbolCode::new(code).unwrap(), strategy, time);
        s.value_f32 = value;
        s.value_i32 = value as i32;
        s.set_flag(value > 0.0);
        s
    }

    fn aggregator(tmp: &TempDir) -> SignalAggregator {
        let store =
            MmapStore::<Signal>::open(tmp.path().join("sig"), 100, AccessMode::ReadWrite, false)
                .unwrap();
        SignalAggregator::new(store).unwrap()
    }

    #[test]
    fn test_strategies_are_separate_keys() {
        let tmp = TempDir::new().unwrap();
        let mut agg = aggregator(&tmp);
        let inputs = [
            signal("600000.SH", 1, at(10, 0, 3), 1.0),
            signal("600000.SH", 2, at(10, 0, 4), -1.0),
            signal("600000.SH", 1, at(10, 0, 30), 2.0),
        ];

        let emitted = agg.extend(&inputs, &BarSize::M1, TZ).unwrap();
        assert_eq!(emitted.rows, 2);

        let rows = agg.store().valid_rows();
        assert_eq!(rows[0].strategy_id, 1);
        assert_eq!(rows[0].value_f32, 2.0);
        assert_eq!(rows[0].open_dt, at(10, 0, 3));
        assert_eq!(rows[0].close_dt, at(10, 0, 30));
        assert_eq!(rows[0].time, at(10, 0, 0));
        assert_eq!(rows[1].strategy_id, 2);
        assert!(!rows[1].flag());
    }

    #[test]
    fn test_bucket_change_freezes_previous_row() {
        let tmp = TempDir::new().unwrap();
        let mut agg = aggregator(&tmp);
        agg.extend(&[signal("600000.SH", 1, at(10, 0, 3), 1.0)], &BarSize::M1, TZ)
            .unwrap();
        agg.extend(&[signal("600000.SH", 1, at(10, 1, 3), 5.0)], &BarSize::M1, TZ)
            .unwrap();

        let rows = agg.store().valid_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value_f32, 1.0);
        assert_eq!(rows[1].value_f32, 5.0);
        assert_eq!(rows[1].value_i32, 5);
        assert_eq!(
            agg.latest(SymbolCode::new("600000.SH").unwrap(), 1)
                .map(|s| s.value_f32),
            Some(5.0)
        );
    }

    #[test]
    fn test_stale_signal_does_not_reopen() {
        let tmp = TempDir::new().unwrap();
        let mut agg = aggregator(&tmp);
        agg.extend(
            &[
                signal("600000.SH", 1, at(10, 1, 0), 1.0),
                signal("600000.SH", 1, at(10, 0, 0), 9.0),
            ],
            &BarSize::M1,
            TZ,
        )
        .unwrap();
        assert_eq!(agg.row(), 1);
        assert_eq!(agg.stats().stale, 1);
        assert_eq!(agg.store().valid_rows()[0].value_f32, 1.0);
    }
}
