//! Driver tests: a writer fills a tick store, the pipeline follows it.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::atomic::AtomicBool;

use chrono::NaiveDate;
use market_data::bars::{DaySnapshotAggregator, TickBarAggregator};
use market_data::config::PipelineConfig;
use market_data::pipeline::{PipelineError, TickPipeline};
use market_data::session::BarSize;
use tempfile::TempDir;
use tick_store::{AccessMode, MmapStore};
use types::prelude::*;

const TZ: i64 = DEFAULT_TZ_OFFSET;
const SYMBOLS: [&str; 2] = ["600000.SH", "000001.SZ"];

fn session_ticks() -> Vec<Tick> {
    let start = local_ms(NaiveDate::from_ymd_opt(2025, 2, 28).unwrap(), 10, 0, 0, TZ).unwrap();
    let mut ticks = Vec::new();
    for i in 0..150u64 {
        for (n, symbol) in SYMBOLS.iter().enumerate() {
            let price = 10.0 + n as f32 + (i % 7) as f32 * 0.01;
            let mut t = Tick::new(SymbolCode::new(symbol).unwrap(), start + i * 3_000, price);
            t.now = t.time + 40;
            t.open = 10.0 + n as f32;
            t.high = t.open + 0.1;
            t.low = t.open - 0.1;
            t.last_close = t.open - 0.2;
            t.volume = 1_000 + i * (n as u64 + 1) * 10;
            t.amount = t.volume as f64 * price as f64;
            ticks.push(t);
        }
    }
    ticks
}

fn config(tmp: &TempDir) -> PipelineConfig {
    PipelineConfig {
        tick_store: tmp.path().join("tick"),
        bar_1m_store: tmp.path().join("bar_1m"),
        bar_5m_store: tmp.path().join("bar_5m"),
        day_store: tmp.path().join("bar_1d"),
        tick_capacity: 1_000,
        bar_capacity: 1_000,
        day_capacity: 100,
        // 120-row steps, so the 300 ticks take three windows.
        ticks_per_minute: 4,
        ..PipelineConfig::default()
    }
}

fn write_ticks(tmp: &TempDir, ticks: &[Tick]) -> MmapStore<Tick> {
    let mut store =
        MmapStore::<Tick>::open(tmp.path().join("tick"), 1_000, AccessMode::ReadWrite, false)
            .unwrap();
    store.append(ticks).unwrap();
    store
}

/// Bars built from every tick in one pass, for comparison.
fn expected_bars(tmp: &TempDir, name: &str, size: BarSize, ticks: &[Tick]) -> Vec<Bar> {
    let store =
        MmapStore::<Bar>::open(tmp.path().join(name), 1_000, AccessMode::ReadWrite, false)
            .unwrap();
    let mut agg = TickBarAggregator::new(store, true).unwrap();
    agg.extend(ticks, &size, TZ).unwrap();
    agg.store().valid_rows().to_vec()
}

#[test]
fn test_catch_up_matches_single_pass() {
    let tmp = TempDir::new().unwrap();
    let ticks = session_ticks();
    let _writer = write_ticks(&tmp, &ticks);

    let mut pipeline = TickPipeline::open(config(&tmp)).unwrap();
    pipeline.run(&AtomicBool::new(false)).unwrap();

    assert!(pipeline.slicer().is_caught_up());
    assert_eq!(pipeline.slicer().end(), ticks.len());

    let m1 = pipeline.bar_1m().store().valid_rows();
    assert_eq!(m1.len(), 2 * 8);
    assert_eq!(m1, expected_bars(&tmp, "expect_1m", BarSize::M1, &ticks).as_slice());

    let m5 = pipeline.bar_5m().store().valid_rows();
    assert_eq!(m5.len(), 2 * 2);
    assert_eq!(m5, expected_bars(&tmp, "expect_5m", BarSize::M5, &ticks).as_slice());

    let day = pipeline.day().store().valid_rows();
    assert_eq!(day.len(), 2);
    let last = &ticks[ticks.len() - 1];
    assert_eq!(day[1].code, last.code);
    assert_eq!(day[1].volume, last.volume);
    assert_eq!(day[1].close_dt, last.time);

    let metrics = pipeline.metrics().export();
    assert_eq!(metrics["ticks_processed"], ticks.len() as u64);
    assert_eq!(metrics["batches"], 3);
    assert_eq!(metrics["idle_polls"], 1);
    assert_eq!(metrics["bar_1m_rows"], 16);
}

#[test]
fn test_stop_flag_prevents_work() {
    let tmp = TempDir::new().unwrap();
    let _writer = write_ticks(&tmp, &session_ticks());

    let mut pipeline = TickPipeline::open(config(&tmp)).unwrap();
    pipeline.run(&AtomicBool::new(true)).unwrap();
    assert_eq!(pipeline.slicer().end(), 0);
    assert_eq!(pipeline.bar_1m().store().cursor(), 0);
}

#[test]
fn test_restart_rebuilds_without_duplicates() {
    let tmp = TempDir::new().unwrap();
    let ticks = session_ticks();
    let _writer = write_ticks(&tmp, &ticks);

    let first = {
        let mut pipeline = TickPipeline::open(config(&tmp)).unwrap();
        pipeline.run(&AtomicBool::new(false)).unwrap();
        pipeline.bar_1m().store().valid_rows().to_vec()
    };

    let mut pipeline = TickPipeline::open(config(&tmp)).unwrap();
    pipeline.run(&AtomicBool::new(false)).unwrap();
    assert_eq!(pipeline.bar_1m().store().valid_rows(), first.as_slice());
}

#[test]
fn test_incremental_steps_follow_writer() {
    let tmp = TempDir::new().unwrap();
    let ticks = session_ticks();
    let mut writer = write_ticks(&tmp, &ticks[..100]);

    let mut pipeline = TickPipeline::open(config(&tmp)).unwrap();
    let outcome = pipeline.step().unwrap();
    assert_eq!(outcome.ticks, 100);
    assert_eq!(pipeline.step().unwrap().ticks, 0);

    writer.append(&ticks[100..]).unwrap();
    pipeline.run(&AtomicBool::new(false)).unwrap();

    assert_eq!(
        pipeline.bar_1m().store().valid_rows(),
        expected_bars(&tmp, "expect_1m", BarSize::M1, &ticks).as_slice()
    );
}

#[test]
fn test_tick_store_reset_rebuilds_outputs() {
    let tmp = TempDir::new().unwrap();
    let ticks = session_ticks();
    let mut writer = write_ticks(&tmp, &ticks);

    let mut pipeline = TickPipeline::open(config(&tmp)).unwrap();
    pipeline.run(&AtomicBool::new(false)).unwrap();
    assert_eq!(pipeline.day().store().cursor(), 2);

    writer.reset().unwrap();
    writer.append(&ticks[..40]).unwrap();
    let outcome = pipeline.step().unwrap();
    assert_eq!(outcome.ticks, 40);

    assert_eq!(
        pipeline.bar_1m().store().valid_rows(),
        expected_bars(&tmp, "expect_1m", BarSize::M1, &ticks[..40]).as_slice()
    );
    let day_store =
        MmapStore::<Bar>::open(tmp.path().join("expect_1d"), 100, AccessMode::ReadWrite, false)
            .unwrap();
    let mut day = DaySnapshotAggregator::new(day_store).unwrap();
    day.extend(&ticks[..40], TZ).unwrap();
    assert_eq!(pipeline.day().store().valid_rows(), day.store().valid_rows());
}

#[test]
fn test_missing_tick_store_is_created_empty() {
    let tmp = TempDir::new().unwrap();
    let mut pipeline = TickPipeline::open(config(&tmp)).unwrap();
    assert_eq!(pipeline.step().unwrap().ticks, 0);
    assert_eq!(pipeline.metrics().export()["idle_polls"], 1);
}

#[test]
fn test_tick_store_grown_mid_run_is_remapped() {
    let tmp = TempDir::new().unwrap();
    let ticks = session_ticks();
    let stem = tmp.path().join("tick");
    let mut writer = MmapStore::<Tick>::open(&stem, 20, AccessMode::ReadWrite, false).unwrap();
    writer.append(&ticks[..10]).unwrap();

    let mut pipeline = TickPipeline::open(config(&tmp)).unwrap();
    pipeline.run(&AtomicBool::new(false)).unwrap();
    assert_eq!(pipeline.slicer().end(), 10);

    drop(writer);
    let mut writer = MmapStore::<Tick>::open(&stem, 400, AccessMode::ReadWrite, true).unwrap();
    writer.append(&ticks[10..]).unwrap();
    pipeline.run(&AtomicBool::new(false)).unwrap();

    assert_eq!(pipeline.slicer().end(), ticks.len());
    assert_eq!(
        pipeline.metrics().export()["ticks_processed"],
        ticks.len() as u64
    );
    assert_eq!(
        pipeline.bar_1m().store().valid_rows(),
        expected_bars(&tmp, "expect_1m", BarSize::M1, &ticks).as_slice()
    );
}

#[test]
fn test_cursor_past_file_is_an_error() {
    let tmp = TempDir::new().unwrap();
    drop(write_ticks(&tmp, &session_ticks()[..10]));

    // Corrupt the published cursor beyond the data file.
    let mut index = OpenOptions::new()
        .write(true)
        .open(tmp.path().join("tick.idx"))
        .unwrap();
    index.write_all(&5_000u64.to_ne_bytes()).unwrap();
    drop(index);

    let mut pipeline = TickPipeline::open(config(&tmp)).unwrap();
    assert!(matches!(
        pipeline.step(),
        Err(PipelineError::CursorPastCapacity {
            cursor: 5_000,
            capacity: 1_000
        })
    ));
    assert_eq!(pipeline.slicer().end(), 0);
}
