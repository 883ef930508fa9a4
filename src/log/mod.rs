//! Log Module
//!
//! The paged append-only log: address arithmetic, the page and entry
//! codecs, the master record, the in-memory core, the background persister
//! and crash-recovery replay.
//!
//! ## Responsibilities
//! - Address every byte three ways (file offset, page, payload stream)
//! - Split logical entries across fixed 512-byte checksummed pages
//! - Buffer appends in a bounded page ring ahead of the file
//! - Recover the durable end of the log and replay entries after a crash
//!
//! ## Lifecycle
//! ```text
//! Wal::open(config) ──► RecoveringWal ──► finish_recover() ──► Wal
//!                           │                                   │
//!                       entries()                     append / publish /
//!                     (replay iterator)             wait_flushed / shutdown
//! ```

pub mod addr;
pub mod entry;
pub mod master;
pub mod page;

mod core;
mod persister;
mod replay;

pub use self::core::{RecoveringWal, Wal, WalGuard};
pub use replay::{Entries, ReplayEntry};
