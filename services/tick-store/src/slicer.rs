//! Incremental windows over a growing store
//!
//! The slicer tracks a `[start, end)` range that advances with the store's
//! cursor by at most one step per update. Consumers that must not see a row
//! twice (ticks) read [`WindowSlicer::for_next`]; consumers that recompute
//! from finer bars read [`WindowSlicer::for_minute`], which reaches back by
//! `overlap` rows so a bar that was still open at the previous boundary is
//! merged again.

use std::ops::Range;

use thiserror::Error;
use tracing::{trace, warn};

/// Minimum overlap, in bar units.
pub const MIN_OVERLAP_RATIO: f64 = 2.5;

pub const DEFAULT_OVERLAP_RATIO: f64 = 3.0;
pub const DEFAULT_STEP_RATIO: f64 = 30.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SlicerError {
    #[error("Overlap ratio {0} is below the minimum of {MIN_OVERLAP_RATIO}")]
    OverlapTooSmall(f64),

    #[error("Step ratio {step} must be at least twice the overlap ratio {overlap}")]
    StepTooSmall { step: f64, overlap: f64 },
}

#[derive(Debug, Clone)]
pub struct WindowSlicer {
    bar_unit_size: usize,
    overlap: usize,
    step: usize,
    start: usize,
    end: usize,
    cursor: usize,
}

impl WindowSlicer {
    /// `bar_unit_size` is roughly the number of rows one minute of data
    /// occupies across all symbols; both ratios are multiples of it.
    pub fn new(
        bar_unit_size: usize,
        overlap_ratio: f64,
        step_ratio: f64,
    ) -> Result<Self, SlicerError> {
        if overlap_ratio.is_nan() || overlap_ratio < MIN_OVERLAP_RATIO {
            return Err(SlicerError::OverlapTooSmall(overlap_ratio));
        }
        if step_ratio.is_nan() || step_ratio < overlap_ratio * 2.0 {
            return Err(SlicerError::StepTooSmall {
                step: step_ratio,
                overlap: overlap_ratio,
            });
        }
        let bar_unit_size = bar_unit_size.max(1);
        Ok(Self {
            bar_unit_size,
            overlap: (bar_unit_size as f64 * overlap_ratio) as usize,
            step: ((bar_unit_size as f64 * step_ratio) as usize).max(1),
            start: 0,
            end: 0,
            cursor: 0,
        })
    }

    /// Slicer with the default ratios (overlap 3, step 30).
    pub fn with_unit(bar_unit_size: usize) -> Self {
        let bar_unit_size = bar_unit_size.max(1);
        Self {
            bar_unit_size,
            overlap: bar_unit_size * 3,
            step: bar_unit_size * 30,
            start: 0,
            end: 0,
            cursor: 0,
        }
    }

    /// Advance by at most one step towards `cursor`.
    ///
    /// Returns the new `(start, end, cursor)`. A cursor below the current end
    /// means the store was reset; the slicer rewinds to 0.
    pub fn update(&mut self, cursor: usize) -> (usize, usize, usize) {
        if cursor < self.end {
            warn!(
                cursor,
                end = self.end,
                "Cursor moved backwards, rewinding window"
            );
            self.end = 0;
        }
        self.cursor = cursor;
        self.start = self.end;
        self.end = cursor.min(self.start + self.step);
        trace!(start = self.start, end = self.end, cursor, "Window advanced");
        (self.start, self.end, self.cursor)
    }

    /// Only the rows added by the last update.
    pub fn for_next(&self) -> Range<usize> {
        self.start..self.end
    }

    /// The last update's rows plus `overlap` rows of look-back.
    pub fn for_minute(&self) -> Range<usize> {
        self.start.saturating_sub(self.overlap)..self.end
    }

    /// Everything written so far.
    pub fn for_all(&self) -> Range<usize> {
        0..self.cursor
    }

    /// The trailing bar unit, roughly the latest row per symbol.
    pub fn for_day(&self) -> Range<usize> {
        self.tail(self.bar_unit_size)
    }

    /// The first `n` rows, clipped to the cursor.
    pub fn head(&self, n: usize) -> Range<usize> {
        0..n.min(self.cursor)
    }

    /// The last `n` rows before the cursor.
    pub fn tail(&self, n: usize) -> Range<usize> {
        self.cursor.saturating_sub(n)..self.cursor
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn bar_unit_size(&self) -> usize {
        self.bar_unit_size
    }

    /// True once the window has reached the last observed cursor.
    pub fn is_caught_up(&self) -> bool {
        self.end >= self.cursor
    }
}

impl Default for WindowSlicer {
    fn default() -> Self {
        Self::with_unit(6000)
    }
}
