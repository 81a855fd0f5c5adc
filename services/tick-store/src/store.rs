//! Memory-mapped append-only store
//!
//! A store is a pair of files sharing a stem:
//!
//! ```text
//! <stem>.bin   flat array of fixed-size records, no header
//! <stem>.idx   64 x u64 slots
//!              slot 0: cursor (number of valid rows)
//!              slot 1: record size in bytes
//!              slot 2..: reserved
//! ```
//!
//! Capacity is implicit: `len(<stem>.bin) / record_size`.
//!
//! One process maps the pair read-write and owns the cursor; any number of
//! readers map it read-only and poll the cursor. Rows are written first and
//! the cursor is published afterwards with release ordering, so a reader
//! that observes cursor `n` sees rows `[0, n)` fully written, apart from the
//! row of a bucket that is still open and being rewritten in place.
//!
//! Every handle holds a shared advisory lock on `<stem>.idx` for its lifetime
//! and a read-write handle additionally holds an exclusive lock on
//! `<stem>.bin`. Truncation needs the `.idx` lock exclusively, so it fails
//! while any handle is open instead of pulling pages out from under a mapping.

use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{self, Write};
use std::marker::PhantomData;
use std::mem::size_of;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytemuck::Pod;
use memmap2::{Mmap, MmapMut, MmapOptions, MmapRaw};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::files::{StorePaths, extend_file};

/// Number of u64 slots in the index file.
pub const INDEX_SLOTS: usize = 64;
/// Byte length of the index file.
pub const INDEX_BYTES: usize = INDEX_SLOTS * size_of::<u64>();

const CURSOR_SLOT: usize = 0;
const RECORD_SIZE_SLOT: usize = 1;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Schema mismatch for {path}: stored record size {stored}, expected {expected}")]
    SchemaMismatch {
        path: PathBuf,
        stored: u64,
        expected: u64,
    },

    #[error("Store {path} is locked by another handle; retry after it is released")]
    Locked { path: PathBuf },

    #[error("Store {path} already has a writer")]
    WriterActive { path: PathBuf },

    #[error("Store {path} is mapped read-only")]
    ReadOnly { path: PathBuf },

    #[error("Index file {path} is {len} bytes, expected at least {expected}")]
    CorruptIndex {
        path: PathBuf,
        len: u64,
        expected: u64,
    },

    #[error("Store {path} has zero capacity")]
    ZeroCapacity { path: PathBuf },
}

// ── Access Mode ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

/// Range written by [`MmapStore::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
    pub start: usize,
    pub end: usize,
    pub count: usize,
}

// ── Mapped Regions ──────────────────────────────────────────────────

enum Region {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl Region {
    fn map(file: &File, len: usize, mode: AccessMode) -> io::Result<Self> {
        let mut options = MmapOptions::new();
        options.len(len);
        // SAFETY: the mapping is tied to the lifetime of the store handle and
        // other processes only ever append or rewrite rows in place; file
        // shrinking is excluded by the advisory lock taken before mapping.
        unsafe {
            match mode {
                AccessMode::ReadOnly => options.map(file).map(Region::ReadOnly),
                AccessMode::ReadWrite => options.map_mut(file).map(Region::ReadWrite),
            }
        }
    }

    fn as_slice(&self) -> &[u8] {
        match self {
            Region::ReadOnly(m) => m,
            Region::ReadWrite(m) => m,
        }
    }

    fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match self {
            Region::ReadOnly(_) => None,
            Region::ReadWrite(m) => Some(m),
        }
    }

    fn flush(&self) -> io::Result<()> {
        match self {
            Region::ReadOnly(_) => Ok(()),
            Region::ReadWrite(m) => m.flush(),
        }
    }
}

/// Raw mapping of the index slots.
///
/// Slots are only touched through atomics, so the mapping is never borrowed
/// as a byte slice and stores go through a pointer with write provenance.
fn map_index(file: &File, mode: AccessMode) -> io::Result<MmapRaw> {
    let mut options = MmapOptions::new();
    options.len(INDEX_BYTES);
    match mode {
        AccessMode::ReadOnly => options.map_raw_read_only(file),
        AccessMode::ReadWrite => options.map_raw(file),
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// Fixed-capacity, fixed-record-size shared array with a published cursor.
pub struct MmapStore<R: Pod> {
    paths: StorePaths,
    mode: AccessMode,
    capacity: usize,
    data: Region,
    index: MmapRaw,
    // Held for their advisory locks; released when the handle drops.
    data_file: File,
    _index_file: File,
    _record: PhantomData<R>,
}

impl<R: Pod> MmapStore<R> {
    /// Size in bytes of one record, also the schema fingerprint in slot 1.
    pub const RECORD_SIZE: usize = size_of::<R>();

    /// Open the store at `stem`, creating both files if the data file is missing.
    ///
    /// For an existing data file the effective capacity is derived from its
    /// actual length unless `resize` asks to grow it first.
    pub fn open(
        stem: impl AsRef<Path>,
        capacity: usize,
        mode: AccessMode,
        resize: bool,
    ) -> Result<Self, StoreError> {
        let paths = StorePaths::new(stem);
        let record_size = Self::RECORD_SIZE;

        if !paths.data.exists() {
            Self::create(&paths, capacity)?;
        } else {
            info!(path = %paths.data.display(), "Opening existing store");
            if resize {
                extend_file(&paths.data, (capacity * record_size) as u64)?;
            }
            if !paths.index.exists() {
                warn!(path = %paths.index.display(), "Index file missing, recreating with cursor 0");
                create_index(&paths.index)?;
            }
        }

        let writable = mode == AccessMode::ReadWrite;

        let index_file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(&paths.index)?;
        index_file.lock_shared()?;
        let index_len = index_file.metadata()?.len();
        if index_len < INDEX_BYTES as u64 {
            return Err(StoreError::CorruptIndex {
                path: paths.index.clone(),
                len: index_len,
                expected: INDEX_BYTES as u64,
            });
        }

        let data_file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(&paths.data)?;
        if writable {
            match data_file.try_lock() {
                Ok(()) => {}
                Err(TryLockError::WouldBlock) => {
                    return Err(StoreError::WriterActive {
                        path: paths.data.clone(),
                    });
                }
                Err(TryLockError::Error(e)) => return Err(e.into()),
            }
        }

        let data_len = data_file.metadata()?.len() as usize;
        if data_len % record_size != 0 {
            warn!(
                path = %paths.data.display(),
                data_len,
                record_size,
                "Data file length is not a multiple of the record size"
            );
        }
        let capacity = data_len / record_size;
        if capacity == 0 {
            return Err(StoreError::ZeroCapacity {
                path: paths.data.clone(),
            });
        }

        let data = Region::map(&data_file, capacity * record_size, mode)?;
        let index = map_index(&index_file, mode)?;

        let store = Self {
            paths,
            mode,
            capacity,
            data,
            index,
            data_file,
            _index_file: index_file,
            _record: PhantomData,
        };

        let stored = store.record_size();
        if stored != 0 && stored != record_size as u64 {
            return Err(StoreError::SchemaMismatch {
                path: store.paths.index.clone(),
                stored,
                expected: record_size as u64,
            });
        }
        if writable {
            store
                .slot(RECORD_SIZE_SLOT)
                .store(record_size as u64, Ordering::Release);
        }

        debug!(
            path = %store.paths.data.display(),
            mode = ?store.mode,
            capacity,
            cursor = store.cursor(),
            "Store mapped"
        );
        Ok(store)
    }

    fn create(paths: &StorePaths, capacity: usize) -> Result<(), StoreError> {
        if capacity == 0 {
            return Err(StoreError::ZeroCapacity {
                path: paths.data.clone(),
            });
        }
        if let Some(parent) = paths.data.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        info!(path = %paths.data.display(), capacity, "Creating new store");

        let data = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&paths.data)?;
        data.set_len((capacity * Self::RECORD_SIZE) as u64)?;

        create_index(&paths.index)?;
        let index = OpenOptions::new().write(true).open(&paths.index)?;
        let mut header = [0u8; 16];
        header[8..16].copy_from_slice(&(Self::RECORD_SIZE as u64).to_le_bytes());
        (&index).write_all(&header)?;
        index.sync_all()?;
        Ok(())
    }

    fn slot(&self, slot: usize) -> &AtomicU64 {
        assert!(slot < INDEX_SLOTS && self.index.len() >= INDEX_BYTES);
        // SAFETY: the index mapping is page-aligned and INDEX_BYTES long, so
        // every slot is an aligned, in-bounds u64 that lives as long as
        // `self`. AtomicU64 has the same in-memory representation as u64.
        // Stores only happen on read-write handles, whose mapping is
        // writable; read-only handles only load.
        unsafe { &*(self.index.as_mut_ptr().add(slot * size_of::<u64>()) as *const AtomicU64) }
    }

    fn require_writable(&self) -> Result<(), StoreError> {
        match self.mode {
            AccessMode::ReadWrite => Ok(()),
            AccessMode::ReadOnly => Err(StoreError::ReadOnly {
                path: self.paths.data.clone(),
            }),
        }
    }

    // ── Published state ─────────────────────────────────────────────

    /// Number of rows currently published as valid.
    pub fn cursor(&self) -> usize {
        self.slot(CURSOR_SLOT).load(Ordering::Acquire) as usize
    }

    /// Record size stored in slot 1 (0 if never written).
    pub fn record_size(&self) -> u64 {
        self.slot(RECORD_SIZE_SLOT).load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// Fraction of capacity in use.
    pub fn usage(&self) -> f64 {
        self.cursor() as f64 / self.capacity as f64
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Typed view of all `capacity` rows, valid or not.
    fn all_rows(&self) -> &[R] {
        bytemuck::cast_slice(self.data.as_slice())
    }

    /// Rows in `range`, clipped to capacity.
    pub fn rows(&self, range: Range<usize>) -> &[R] {
        let end = range.end.min(self.capacity);
        let start = range.start.min(end);
        &self.all_rows()[start..end]
    }

    /// Rows `[0, cursor)`.
    pub fn valid_rows(&self) -> &[R] {
        self.rows(0..self.cursor())
    }

    pub fn get(&self, index: usize) -> Option<&R> {
        self.all_rows().get(index)
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Mutable typed view of every row.
    ///
    /// Indexing past `capacity` panics: the hot append path performs no
    /// recoverable bounds check, and stores must be sized generously.
    pub fn rows_mut(&mut self) -> Result<&mut [R], StoreError> {
        self.require_writable()?;
        let path = self.paths.data.clone();
        let bytes = self
            .data
            .as_mut_slice()
            .ok_or(StoreError::ReadOnly { path })?;
        Ok(bytemuck::cast_slice_mut(bytes))
    }

    /// Mutable access to row `index` without touching the cursor.
    ///
    /// Panics when `index >= capacity`.
    pub fn row_mut(&mut self, index: usize) -> Result<&mut R, StoreError> {
        Ok(&mut self.rows_mut()?[index])
    }

    /// Publish a new cursor value to readers.
    pub fn publish(&self, cursor: usize) -> Result<(), StoreError> {
        self.require_writable()?;
        debug_assert!(cursor <= self.capacity, "cursor {cursor} past capacity");
        self.slot(CURSOR_SLOT).store(cursor as u64, Ordering::Release);
        Ok(())
    }

    /// Copy `records` after the current cursor and publish the new cursor.
    pub fn append(&mut self, records: &[R]) -> Result<Appended, StoreError> {
        let start = self.cursor();
        let end = start + records.len();
        debug_assert!(
            end <= self.capacity,
            "append of {} rows overflows capacity {}",
            records.len(),
            self.capacity
        );
        self.rows_mut()?[start..end].copy_from_slice(records);
        self.publish(end)?;
        Ok(Appended {
            start,
            end,
            count: records.len(),
        })
    }

    /// Reset the cursor to 0; rows are left in place and overwritten later.
    pub fn reset(&mut self) -> Result<(), StoreError> {
        info!(path = %self.paths.data.display(), "Resetting store cursor");
        self.publish(0)
    }

    /// Flush dirty pages to disk (msync).
    pub fn flush(&self) -> Result<(), StoreError> {
        self.data.flush()?;
        if self.mode == AccessMode::ReadWrite {
            self.index.flush()?;
        }
        Ok(())
    }

    /// Remap the data file if another handle has grown it since open.
    ///
    /// Returns true when the capacity changed. Files never shrink while a
    /// handle is open, so a shorter file leaves the mapping untouched.
    pub fn remap(&mut self) -> Result<bool, StoreError> {
        let capacity = self.data_file.metadata()?.len() as usize / Self::RECORD_SIZE;
        if capacity <= self.capacity {
            return Ok(false);
        }
        self.data = Region::map(&self.data_file, capacity * Self::RECORD_SIZE, self.mode)?;
        info!(
            path = %self.paths.data.display(),
            old = self.capacity,
            new = capacity,
            "Store grown, remapped"
        );
        self.capacity = capacity;
        Ok(true)
    }
}

fn create_index(path: &Path) -> io::Result<()> {
    let index = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    index.set_len(INDEX_BYTES as u64)?;
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────
