//! File sizing for store pairs
//!
//! Growth is idempotent and in place. Shrinking is reserved for end-of-day
//! archival and requires that no handle has the store mapped.

use std::ffi::OsString;
use std::fs::{File, OpenOptions, TryLockError};
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::store::{INDEX_BYTES, StoreError};

/// Data and index paths derived from a store stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub data: PathBuf,
    pub index: PathBuf,
}

impl StorePaths {
    /// `<stem>.bin` and `<stem>.idx`. The stem's own extension, if any, is kept.
    pub fn new(stem: impl AsRef<Path>) -> Self {
        let stem = stem.as_ref().as_os_str();
        Self {
            data: with_suffix(stem, ".bin"),
            index: with_suffix(stem, ".idx"),
        }
    }
}

fn with_suffix(stem: &std::ffi::OsStr, suffix: &str) -> PathBuf {
    let mut path = OsString::from(stem);
    path.push(suffix);
    PathBuf::from(path)
}

/// Grow `path` to at least `new_size` bytes.
///
/// Returns `true` if the file was grown, `false` if it was already large enough.
pub fn extend_file(path: &Path, new_size: u64) -> Result<bool, StoreError> {
    let file = OpenOptions::new().write(true).open(path)?;
    let old_size = file.metadata()?.len();
    if old_size >= new_size {
        return Ok(false);
    }
    file.set_len(new_size)?;
    info!(path = %path.display(), old_size, new_size, "Extended file");
    Ok(true)
}

/// Shrink `path` to `new_size` bytes.
///
/// No-op (returns `false`) when the file is already no larger than `new_size`
/// or when `new_size` is 0, so a bad cursor can never wipe a store.
pub fn truncate_file(path: &Path, new_size: u64) -> Result<bool, StoreError> {
    let file = OpenOptions::new().write(true).open(path)?;
    shrink(&file, path, new_size)
}

fn shrink(file: &File, path: &Path, new_size: u64) -> Result<bool, StoreError> {
    let old_size = file.metadata()?.len();
    if new_size == 0 || old_size <= new_size {
        return Ok(false);
    }
    file.set_len(new_size)?;
    info!(path = %path.display(), old_size, new_size, "Truncated file");
    Ok(true)
}

/// Outcome of [`truncate_store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncateReport {
    pub cursor: u64,
    pub record_size: u64,
    pub old_size: u64,
    pub new_size: u64,
    pub truncated: bool,
}

/// Shrink `<stem>.bin` to `(cursor + reserve) * record_size` for archival.
///
/// Fails with [`StoreError::Locked`] while any [`MmapStore`](crate::MmapStore)
/// handle on the stem is open. Callers should surface that to an operator
/// rather than retry in a loop.
pub fn truncate_store(stem: impl AsRef<Path>, reserve: u64) -> Result<TruncateReport, StoreError> {
    let paths = StorePaths::new(stem);

    let index = OpenOptions::new().read(true).write(true).open(&paths.index)?;
    match index.try_lock() {
        Ok(()) => {}
        Err(TryLockError::WouldBlock) => {
            warn!(path = %paths.index.display(), "Store is mapped elsewhere, not truncating");
            return Err(StoreError::Locked { path: paths.data });
        }
        Err(TryLockError::Error(e)) => return Err(e.into()),
    }

    let len = index.metadata()?.len();
    if len < INDEX_BYTES as u64 {
        return Err(StoreError::CorruptIndex {
            path: paths.index,
            len,
            expected: INDEX_BYTES as u64,
        });
    }
    let mut header = [0u8; 16];
    (&index).read_exact(&mut header)?;
    let mut slot = [0u8; 8];
    slot.copy_from_slice(&header[0..8]);
    let cursor = u64::from_le_bytes(slot);
    slot.copy_from_slice(&header[8..16]);
    let record_size = u64::from_le_bytes(slot);

    let data = OpenOptions::new().write(true).open(&paths.data)?;
    let old_size = data.metadata()?.len();
    let new_size = (cursor + reserve) * record_size;
    let truncated = shrink(&data, &paths.data, new_size)?;

    Ok(TruncateReport {
        cursor,
        record_size,
        old_size,
        new_size,
        truncated,
    })
}
