use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use market_data::bars::ResampleAggregator;
use market_data::config::PipelineConfig;
use market_data::pipeline::TickPipeline;
use market_data::session::BarSize;
use serde::Serialize;
use tick_store::{AccessMode, MmapStore, StorePaths, StoreError, WindowSlicer, truncate_store};
use tracing_subscriber::EnvFilter;
use types::prelude::*;

#[derive(Parser)]
#[command(name = "bar-compiler", author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum RecordKind {
    Tick,
    Bar,
    Signal,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile the tick store into 1m, 5m and daily snapshot stores
    Run {
        /// Path to the pipeline config (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Keep polling for new ticks after catching up
        #[arg(long)]
        live: bool,
    },

    /// Resample a finer bar store into a coarser one
    Resample {
        /// Stem of the finer bar store
        #[arg(long)]
        input: PathBuf,

        /// Stem of the coarser bar store
        #[arg(long)]
        output: PathBuf,

        /// Target bar size: 5m, 15m, 30m, 60m, 120m or 1d
        #[arg(long, default_value = "15m")]
        size: BarSize,

        /// Rows one minute of finer bars occupies
        #[arg(long, default_value = "6000")]
        unit: usize,

        /// Capacity of the output store when it is created
        #[arg(long, default_value = "300000")]
        capacity: usize,

        /// Seconds east of UTC
        #[arg(long, default_value_t = DEFAULT_TZ_OFFSET)]
        tz: i64,
    },

    /// Shrink a store to its cursor plus a reserve (end-of-day archival)
    Archive {
        /// Store stem (without .bin/.idx)
        #[arg(long)]
        store: PathBuf,

        /// Spare rows to keep after the cursor
        #[arg(long, default_value = "10000")]
        reserve: u64,
    },

    /// Print the last rows of a store as JSON lines
    Tail {
        #[arg(long)]
        store: PathBuf,

        #[arg(long, value_enum)]
        kind: RecordKind,

        #[arg(short, default_value = "10")]
        n: usize,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config, live } => run(config, live),
        Commands::Resample {
            input,
            output,
            size,
            unit,
            capacity,
            tz,
        } => resample(input, output, size, unit, capacity, tz),
        Commands::Archive { store, reserve } => archive(store, reserve),
        Commands::Tail { store, kind, n } => match kind {
            RecordKind::Tick => tail::<Tick>(store, n),
            RecordKind::Bar => tail::<Bar>(store, n),
            RecordKind::Signal => tail::<Signal>(store, n),
        },
    }
}

fn run(config: Option<PathBuf>, live: bool) -> anyhow::Result<()> {
    let mut config = match config {
        Some(path) => PipelineConfig::load(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config.live |= live;

    let mut pipeline = TickPipeline::open(config).context("opening pipeline stores")?;
    let stop = AtomicBool::new(false);
    pipeline.run(&stop)?;
    Ok(())
}

fn resample(
    input: PathBuf,
    output: PathBuf,
    size: BarSize,
    unit: usize,
    capacity: usize,
    tz: i64,
) -> anyhow::Result<()> {
    if size == BarSize::M1 {
        bail!("resampling needs a target coarser than 1m");
    }
    let source = open_existing::<Bar>(&input)?;
    let target = MmapStore::<Bar>::open(&output, capacity, AccessMode::ReadWrite, false)
        .with_context(|| format!("opening {}", output.display()))?;
    let mut aggregator = ResampleAggregator::new(target, true)?;
    aggregator.reset()?;

    // Overlapping windows re-deliver finer bars; their labels make that idempotent.
    let mut slicer = WindowSlicer::with_unit(unit);
    loop {
        let (start, end, _) = slicer.update(source.cursor());
        if start == end {
            break;
        }
        aggregator.extend(source.rows(slicer.for_minute()), &size, tz)?;
    }
    aggregator.store().flush()?;

    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        size = %size,
        rows = aggregator.row(),
        "Resample finished"
    );
    Ok(())
}

fn archive(store: PathBuf, reserve: u64) -> anyhow::Result<()> {
    match truncate_store(&store, reserve) {
        Ok(report) => {
            println!("{}", serde_json::to_string(&ArchiveLine::from(report))?);
            Ok(())
        }
        Err(StoreError::Locked { path }) => {
            bail!(
                "{} is still mapped by another process; stop its readers/writer and retry",
                path.display()
            )
        }
        Err(e) => Err(e).with_context(|| format!("archiving {}", store.display())),
    }
}

fn tail<R: bytemuck::Pod + Serialize>(store: PathBuf, n: usize) -> anyhow::Result<()> {
    let store = open_existing::<R>(&store)?;
    let rows = store.valid_rows();
    for row in &rows[rows.len().saturating_sub(n)..] {
        println!("{}", serde_json::to_string(row)?);
    }
    Ok(())
}

fn open_existing<R: bytemuck::Pod>(stem: &Path) -> anyhow::Result<MmapStore<R>> {
    let paths = StorePaths::new(stem);
    if !paths.data.exists() {
        bail!("store {} does not exist", paths.data.display());
    }
    MmapStore::<R>::open(stem, 1, AccessMode::ReadOnly, false)
        .with_context(|| format!("opening {}", stem.display()))
}

#[derive(Serialize)]
struct ArchiveLine {
    cursor: u64,
    record_size: u64,
    old_size: u64,
    new_size: u64,
    truncated: bool,
}

impl From<tick_store::TruncateReport> for ArchiveLine {
    fn from(report: tick_store::TruncateReport) -> Self {
        Self {
            cursor: report.cursor,
            record_size: report.record_size,
            old_size: report.old_size,
            new_size: report.new_size,
            truncated: report.truncated,
        }
    }
}
