//! Amount/volume accounting for an open bucket
//!
//! Ticks carry day-cumulative totals, so a bucket's volume is the distance
//! from a baseline. Finer bars already carry per-bucket deltas, so a coarser
//! bucket sums them, keyed by the finer bar's own label so that a bar read
//! again through an overlapping window replaces its earlier contribution.

use types::prelude::*;

use super::BarInput;

/// Strategy for turning a stream of inputs into per-bucket amount/volume.
pub trait VolumeAccounting: Default {
    type Input: BarInput;

    /// A new bucket starts with the next observation.
    fn open_bucket(&mut self);

    /// Fold one input into the open bucket.
    fn observe(&mut self, record: &Self::Input);

    fn amount(&self) -> f64;

    fn volume(&self) -> u64;
}

/// Delta against the last cumulative value seen before the bucket opened.
///
/// The very first observation of a key seeds the baseline with its own
/// totals: volume traded before this process first saw the symbol is never
/// attributed to a bucket. That includes the opening auction, so a symbol's
/// first bar under-reports and the sum of its intraday bar volumes falls
/// short of the exchange's day volume by whatever the first tick carried.
/// The day snapshot keeps the exchange totals. A cumulative value that moves
/// backwards is a feed reset and counts from zero again.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CumulativeDelta {
    baseline_amount: f64,
    baseline_volume: u64,
    last_amount: f64,
    last_volume: u64,
    seen: bool,
}

impl VolumeAccounting for CumulativeDelta {
    type Input = Tick;

    fn open_bucket(&mut self) {
        self.baseline_amount = self.last_amount;
        self.baseline_volume = self.last_volume;
    }

    fn observe(&mut self, tick: &Tick) {
        if !self.seen {
            self.seen = true;
            self.baseline_amount = tick.amount;
            self.baseline_volume = tick.volume;
        } else if tick.volume < self.last_volume || tick.amount < self.last_amount {
            self.baseline_amount = 0.0;
            self.baseline_volume = 0;
        }
        self.last_amount = tick.amount;
        self.last_volume = tick.volume;
    }

    fn amount(&self) -> f64 {
        (self.last_amount - self.baseline_amount).max(0.0)
    }

    fn volume(&self) -> u64 {
        self.last_volume.saturating_sub(self.baseline_volume)
    }
}

/// Sum of finer-bar deltas, one entry per finer-bar label.
///
/// A coarse bucket holds at most a handful of finer bars, so a short vector
/// scan beats hashing; the vector keeps its capacity across buckets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummedDeltas {
    parts: Vec<(u64, f64, u64)>,
}

impl SummedDeltas {
    /// Number of distinct finer bars in the open bucket.
    pub fn parts(&self) -> usize {
        self.parts.len()
    }
}

impl VolumeAccounting for SummedDeltas {
    type Input = Bar;

    fn open_bucket(&mut self) {
        self.parts.clear();
    }

    fn observe(&mut self, bar: &Bar) {
        match self.parts.iter_mut().find(|(time, _, _)| *time == bar.time) {
            Some(part) => *part = (bar.time, bar.amount, bar.volume),
            None => self.parts.push((bar.time, bar.amount, bar.volume)),
        }
    }

    fn amount(&self) -> f64 {
        self.parts.iter().map(|(_, amount, _)| amount).sum()
    }

    fn volume(&self) -> u64 {
        self.parts.iter().map(|(_, _, volume)| volume).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(volume: u64, amount: f64) -> Tick {
        Tick {
            volume,
            amount,
            ..Tick::default()
        }
    }

    fn bar(time: u64, volume: u64, amount: f64) -> Bar {
        Bar {
            time,
            volume,
            amount,
            ..Bar::default()
        }
    }

    #[test]
    fn test_flat_tick_is_not_double_counted() {
        let mut acc = CumulativeDelta::default();
        acc.open_bucket();
        for (volume, amount) in [(100, 1_000.0), (150, 1_500.0), (150, 1_500.0)] {
            acc.observe(&tick(volume, amount));
        }
        assert_eq!(acc.volume(), 50);
        assert_eq!(acc.amount(), 500.0);
    }

    #[test]
    fn test_first_observation_volume_is_not_attributed() {
        let mut v = CumulativeDelta::default();
        v.open_bucket();
        v.observe(&tick(100_000, 1_000_000.0));
        v.observe(&tick(100_500, 1_005_000.0));
        assert_eq!(v.volume(), 500);
        assert_eq!(v.amount(), 5_000.0);
    }

    #[test]
    fn test_next_bucket_starts_from_previous_last() {
        let mut acc = CumulativeDelta::default();
        acc.open_bucket();
        acc.observe(&tick(100, 1_000.0));
        acc.observe(&tick(180, 1_800.0));

        acc.open_bucket();
        acc.observe(&tick(200, 2_000.0));
        assert_eq!(acc.volume(), 20);
        acc.observe(&tick(260, 2_600.0));
        assert_eq!(acc.volume(), 80);
        assert_eq!(acc.amount(), 800.0);
    }

    #[test]
    fn test_backwards_cumulative_is_a_reset() {
        let mut acc = CumulativeDelta::default();
        acc.open_bucket();
        acc.observe(&tick(5_000, 50_000.0));
        acc.observe(&tick(5_100, 51_000.0));
        acc.observe(&tick(30, 300.0));
        assert_eq!(acc.volume(), 30);
        assert_eq!(acc.amount(), 300.0);
    }

    #[test]
    fn test_summed_deltas_are_idempotent() {
        let mut acc = SummedDeltas::default();
        acc.open_bucket();
        acc.observe(&bar(60_000, 10, 100.0));
        acc.observe(&bar(120_000, 20, 200.0));
        acc.observe(&bar(120_000, 20, 200.0));
        assert_eq!(acc.parts(), 2);
        assert_eq!(acc.volume(), 30);
        assert_eq!(acc.amount(), 300.0);
    }

    #[test]
    fn test_summed_deltas_take_latest_partial() {
        let mut acc = SummedDeltas::default();
        acc.open_bucket();
        acc.observe(&bar(60_000, 10, 100.0));
        acc.observe(&bar(60_000, 25, 250.0));
        assert_eq!(acc.volume(), 25);

        acc.open_bucket();
        assert_eq!(acc.parts(), 0);
        assert_eq!(acc.volume(), 0);
    }
}
