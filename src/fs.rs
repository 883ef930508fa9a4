//! File system abstraction
//!
//! ## Responsibilities
//! - Positioned reads/writes and durability on the log file
//! - Creation, existence checks and renames for the create-then-rename dance
//! - Idempotent close guard for early-exit paths
//! - Incremental byte source feeding the append path
//!
//! The log core only ever talks to the `FileSystem`/`LogFile` traits, so
//! tests can inject failing or instrumented implementations.

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use tracing::warn;

use crate::error::{Result, WalError};

// =============================================================================
// File Traits
// =============================================================================

/// An open log file supporting positioned I/O.
///
/// All offsets are absolute file offsets; reads and writes never move a
/// shared file position, so the core and the persister can use one handle.
pub trait LogFile: Send + Sync {
    /// Fill `buf` from `offset`. Short reads are an error.
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()>;

    /// Write all of `buf` at `offset`.
    fn write_all_at(&self, buf: &[u8], offset: u64) -> Result<()>;

    /// Flush written data to the device.
    fn sync_data(&self) -> Result<()>;

    /// Current file length in bytes.
    fn len(&self) -> Result<u64>;
}

/// File system operations the log needs to create and open its file.
pub trait FileSystem: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    /// Create a file preallocated to `size` bytes, truncating any leftover.
    fn create_preallocated(&self, path: &Path, size: u64) -> Result<Box<dyn LogFile>>;

    /// Open an existing file for read/write.
    fn open(&self, path: &Path) -> Result<Box<dyn LogFile>>;

    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
}

// =============================================================================
// Standard Implementation
// =============================================================================

/// `FileSystem` backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_preallocated(&self, path: &Path, size: u64) -> Result<Box<dyn LogFile>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size)?;
        Ok(Box::new(StdLogFile { file }))
    }

    fn open(&self, path: &Path) -> Result<Box<dyn LogFile>> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Box::new(StdLogFile { file }))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to)?;
        Ok(())
    }
}

struct StdLogFile {
    file: File,
}

impl LogFile for StdLogFile {
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write_all_at(&self, buf: &[u8], offset: u64) -> Result<()> {
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn sync_data(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

// =============================================================================
// Close Guard
// =============================================================================

/// Syncs and releases a `LogFile` exactly once.
///
/// `close()` surfaces the sync error; a second `close()` is a no-op. If the
/// guard is dropped without an explicit close (an early `?` return), the
/// file is synced best-effort and released.
pub struct ScopedClose {
    file: Option<Box<dyn LogFile>>,
}

impl ScopedClose {
    pub fn new(file: Box<dyn LogFile>) -> Self {
        Self { file: Some(file) }
    }

    /// Access the wrapped file. Fails with `Closed` after `close()`.
    pub fn file(&self) -> Result<&dyn LogFile> {
        self.file.as_deref().ok_or(WalError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Sync and release the file. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        match self.file.take() {
            Some(file) => file.sync_data(),
            None => Ok(()),
        }
    }
}

impl Drop for ScopedClose {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(err) = file.sync_data() {
                warn!(error = %err, "file sync failed in close guard");
            }
        }
    }
}

// =============================================================================
// Byte Source
// =============================================================================

/// Incremental producer of payload bytes for `append`.
///
/// `read` may return fewer than `max` bytes; callers loop until they have
/// consumed what `remaining` promised. Lets hosts feed an entry from
/// scatter/gather storage without assembling it first.
pub trait ByteSource {
    /// Hand out up to `max` bytes. Must return a non-empty slice while
    /// `remaining() > 0`.
    fn read(&mut self, max: usize) -> &[u8];

    /// Bytes not yet handed out.
    fn remaining(&self) -> usize;
}

/// `ByteSource` over a single in-memory slice.
pub struct SliceSource<'a> {
    data: &'a [u8],
}

impl<'a> SliceSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl ByteSource for SliceSource<'_> {
    fn read(&mut self, max: usize) -> &[u8] {
        let n = self.data.len().min(max);
        let (out, rest) = self.data.split_at(n);
        self.data = rest;
        out
    }

    fn remaining(&self) -> usize {
        self.data.len()
    }
}
