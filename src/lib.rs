//! # PageWAL
//!
//! An embeddable write-ahead log with:
//! - Fixed 512-byte pages, each CRC32-checksummed
//! - A bounded in-memory page ring buffer ahead of the file
//! - Append/publish separation with a background persister
//! - Epoch-stamped pages for clean crash recovery
//! - A master record carrying the durable checkpoint
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Host Threads                           │
//! │             lock() ── append()* ── publish()                │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                      Log Core                               │
//! │        page ring  │  cursors  │  epoch  │  checkpoint       │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ wake
//!                       ▼
//!               ┌───────────────┐       ┌───────────────────────┐
//!               │   Persister   │──────►│       Log File        │
//!               │ (seal + sync) │       │ master │ page │ page  │
//!               └───────────────┘       └───────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use pagewal::{Config, Wal};
//!
//! # fn main() -> pagewal::Result<()> {
//! let config = Config::builder().path("./app.wal").build();
//! let recovering = Wal::open(config)?;
//! for entry in recovering.entries() {
//!     let entry = entry?;
//!     // apply entry.payload, remember entry.end
//! }
//! let wal = recovering.finish_recover()?;
//!
//! let end = wal.append(b"hello")?;
//! wal.wait_flushed(end)?;
//! wal.advance_checkpoint(end)?;
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod fs;
pub mod log;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, WalError};
pub use config::{Config, ConfigBuilder};
pub use log::addr::Address;
pub use log::{Entries, RecoveringWal, ReplayEntry, Wal, WalGuard};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of PageWAL
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
