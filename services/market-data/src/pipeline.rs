//! Tick store → bar stores driver
//!
//! Follows a tick store written by another process and keeps the 1m, 5m and
//! daily snapshot stores current. Each step reads at most one slicer window
//! of new ticks and feeds it to every aggregator; when nothing is new the
//! loop either returns (catch-up mode) or sleeps for the poll interval.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tick_store::{AccessMode, MmapStore, SlicerError, StoreError, WindowSlicer};
use tracing::{debug, info, warn};
use types::prelude::*;

use crate::bars::{DaySnapshotAggregator, TickBarAggregator};
use crate::config::{ConfigError, PipelineConfig};
use crate::metrics::PipelineMetrics;
use crate::session::BarSize;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Slicer error: {0}")]
    Slicer(#[from] SlicerError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Tick cursor {cursor} is past the tick store's capacity {capacity}")]
    CursorPastCapacity { cursor: usize, capacity: usize },
}

/// Rows opened in each output store by one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepOutcome {
    pub ticks: usize,
    pub bar_1m_rows: usize,
    pub bar_5m_rows: usize,
    pub day_rows: usize,
}

pub struct TickPipeline {
    config: PipelineConfig,
    ticks: MmapStore<Tick>,
    slicer: WindowSlicer,
    bar_1m: TickBarAggregator,
    bar_5m: TickBarAggregator,
    day: DaySnapshotAggregator,
    metrics: Arc<PipelineMetrics>,
}

impl TickPipeline {
    /// Map the tick store read-only and every output store read-write.
    pub fn open(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let ticks = MmapStore::<Tick>::open(
            &config.tick_store,
            config.tick_capacity,
            AccessMode::ReadOnly,
            false,
        )?;
        let open_bars = |stem: &Path, capacity: usize| {
            MmapStore::<Bar>::open(stem, capacity, AccessMode::ReadWrite, false)
        };
        let mut bar_1m = TickBarAggregator::new(
            open_bars(config.bar_1m_store.as_path(), config.bar_capacity)?,
            config.include_quote,
        )?;
        let mut bar_5m = TickBarAggregator::new(
            open_bars(config.bar_5m_store.as_path(), config.bar_capacity)?,
            config.include_quote,
        )?;
        let mut day =
            DaySnapshotAggregator::new(open_bars(config.day_store.as_path(), config.day_capacity)?)?;

        // The slicer replays the tick store from row 0, so outputs are rebuilt.
        bar_1m.reset()?;
        bar_5m.reset()?;
        day.reset()?;

        let slicer = WindowSlicer::new(
            config.ticks_per_minute,
            config.overlap_ratio,
            config.step_ratio,
        )?;

        info!(
            tick_store = %config.tick_store.display(),
            tick_cursor = ticks.cursor(),
            step = slicer.step(),
            live = config.live,
            "Pipeline opened"
        );

        Ok(Self {
            config,
            ticks,
            slicer,
            bar_1m,
            bar_5m,
            day,
            metrics: Arc::new(PipelineMetrics::new()),
        })
    }

    /// Process at most one window of new ticks.
    pub fn step(&mut self) -> Result<StepOutcome, PipelineError> {
        let cursor = self.ticks.cursor();
        if cursor > self.ticks.capacity() {
            // The writer grew the file after we mapped it.
            self.ticks.remap()?;
            if cursor > self.ticks.capacity() {
                return Err(PipelineError::CursorPastCapacity {
                    cursor,
                    capacity: self.ticks.capacity(),
                });
            }
        }
        if cursor < self.slicer.end() {
            warn!(
                cursor,
                end = self.slicer.end(),
                "Tick store was reset, resetting outputs"
            );
            self.bar_1m.reset()?;
            self.bar_5m.reset()?;
            self.day.reset()?;
        }

        let (start, end, _) = self.slicer.update(cursor);
        if start == end {
            self.metrics.record_idle();
            return Ok(StepOutcome::default());
        }

        let started = Instant::now();
        let tz = self.config.tz_offset;
        let ticks = self.ticks.rows(start..end);

        let m1 = self.bar_1m.extend(ticks, &BarSize::M1, tz)?;
        let m5 = self.bar_5m.extend(ticks, &BarSize::M5, tz)?;
        let day = self.day.extend(ticks, tz)?;

        let outcome = StepOutcome {
            ticks: ticks.len(),
            bar_1m_rows: m1.rows,
            bar_5m_rows: m5.rows,
            day_rows: day.rows,
        };
        self.metrics
            .record_batch(ticks.len() as u64, started.elapsed().as_nanos() as u64);
        self.metrics.record_rows(m1.rows, m5.rows, day.rows);
        if let Some(last) = ticks.last() {
            let wall_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
            self.metrics.record_lag(last.now, wall_ms);
        }
        debug!(start, end, cursor, ?outcome, "Pipeline step");
        Ok(outcome)
    }

    /// Step until `stop` is set, or until caught up when not live.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<(), PipelineError> {
        let idle = Duration::from_millis(self.config.poll_interval_ms);
        while !stop.load(Ordering::Relaxed) {
            let outcome = self.step()?;
            if outcome.ticks > 0 {
                continue;
            }
            if !self.config.live {
                break;
            }
            thread::sleep(idle);
        }
        self.flush()?;
        info!(metrics = ?self.metrics.export(), "Pipeline stopped");
        Ok(())
    }

    pub fn flush(&self) -> Result<(), PipelineError> {
        self.bar_1m.store().flush()?;
        self.bar_5m.store().flush()?;
        self.day.store().flush()?;
        Ok(())
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn bar_1m(&self) -> &TickBarAggregator {
        &self.bar_1m
    }

    pub fn bar_5m(&self) -> &TickBarAggregator {
        &self.bar_5m
    }

    pub fn day(&self) -> &DaySnapshotAggregator {
        &self.day
    }

    pub fn slicer(&self) -> &WindowSlicer {
        &self.slicer
    }
}
