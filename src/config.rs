//! Configuration for pagewal
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, WalError};
use crate::log::addr::PAGE_SIZE;

/// Main configuration for a write-ahead log instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // File Configuration
    // -------------------------------------------------------------------------
    /// Path of the log file. Created (preallocated to `file_size`) on first
    /// open; later opens require the same `file_size`.
    pub path: PathBuf,

    /// Total file size in bytes: the master page plus the log pages.
    /// Must be a multiple of 512 and hold at least two pages.
    pub file_size: u64,

    // -------------------------------------------------------------------------
    // Buffer Configuration
    // -------------------------------------------------------------------------
    /// In-memory ring buffer size in bytes.
    /// Must be a multiple of 512 and hold at least two pages.
    pub buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./pagewal.log"),
            file_size: 16 * 1024 * 1024, // 16 MB
            buffer_size: 256 * 1024,     // 256 KB
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Number of 512-byte pages in the file, master page included
    pub fn disk_pages(&self) -> u64 {
        self.file_size / PAGE_SIZE as u64
    }

    /// Number of 512-byte page slots in the ring buffer
    pub fn ring_pages(&self) -> u64 {
        (self.buffer_size / PAGE_SIZE) as u64
    }

    /// Check the size constraints. Called by `Wal::open` before any file
    /// is touched.
    pub fn validate(&self) -> Result<()> {
        let page = PAGE_SIZE as u64;
        if self.file_size % page != 0 || self.file_size < 2 * page {
            return Err(WalError::Config(format!(
                "file_size must be a multiple of {} bytes and hold at least 2 pages, got {}",
                page, self.file_size
            )));
        }
        if self.buffer_size % PAGE_SIZE != 0 || self.buffer_size < 2 * PAGE_SIZE {
            return Err(WalError::Config(format!(
                "buffer_size must be a multiple of {} bytes and hold at least 2 pages, got {}",
                PAGE_SIZE, self.buffer_size
            )));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the log file path
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Set the total file size (in bytes)
    pub fn file_size(mut self, size: u64) -> Self {
        self.config.file_size = size;
        self
    }

    /// Set the in-memory ring buffer size (in bytes)
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
