//! Replay
//!
//! Walks the on-disk log forward from the checkpoint, joining multi-page
//! entries back together. The walk runs twice per open: once inside
//! `Wal::open` to find the durable end of the log, and again lazily through
//! `RecoveringWal::entries()` when the host replays.
//!
//! ## Page acceptance
//!
//! A page image read at position `p` belongs to the live log when:
//! - its checksum verifies and its version is known,
//! - its page-number field equals `p`,
//! - its epoch is at most `master_epoch + 1` (only the boundary page a
//!   crashed `finish_recover` resealed can carry the +1; appends of a new
//!   generation start strictly after the master update lands),
//! - its epoch is no lower than any epoch seen earlier in the walk. Page
//!   epochs never decrease along the live log because each generation
//!   appends after the previous end, so the first decrease marks a stale
//!   leftover beyond the true end.
//!
//! The running maximum is seeded from the checkpoint's own page: every
//! completed recovery reseals that page with the newest epoch, which fences
//! off stale pages that directly follow a fully-checkpointed log.
//!
//! Any rejected page ends the walk cleanly; an entry still owed bytes at
//! that point never completed and is dropped. Only real I/O failures
//! surface as errors.

use crate::error::Result;
use crate::fs::LogFile;
use crate::log::addr::{Address, DataOffset, PageNum, DATA_PER_PAGE, PAGE_SIZE};
use crate::log::entry::{self, EntryType, ENTRY_HEADER_SIZE};
use crate::log::page::{self, PAGE_VERSION_FIRST};

/// Recovery acceptance check for a page image read at position `expect`.
pub(crate) fn page_accepted(buf: &[u8], expect: PageNum, master_epoch: u32, floor: u32) -> bool {
    if page::verify(buf, expect).is_err() || page::version(buf) != PAGE_VERSION_FIRST {
        return false;
    }
    let epoch = page::epoch(buf);
    page::page_num(buf) == expect && epoch <= master_epoch.saturating_add(1) && epoch >= floor
}

// =============================================================================
// Walker
// =============================================================================

/// Forward scanner over the on-disk entry stream.
pub(crate) struct LogWalker<'a> {
    file: &'a dyn LogFile,
    disk_pages: u64,
    master_epoch: u32,
    checkpoint_page: PageNum,
    /// Highest epoch accepted so far; later pages may not go below it.
    max_epoch: u32,
    /// Next entry boundary candidate.
    pos: DataOffset,
    /// End of the last complete entry (the recovered cursor when the walk
    /// finishes).
    last_end: DataOffset,
    buf: Box<[u8]>,
    loaded: Option<PageNum>,
    anchored: bool,
    done: bool,
}

impl<'a> LogWalker<'a> {
    pub(crate) fn new(
        file: &'a dyn LogFile,
        disk_pages: u64,
        master_epoch: u32,
        checkpoint: Address,
    ) -> Self {
        let cursor = checkpoint.to_data_offset();
        Self {
            file,
            disk_pages,
            master_epoch,
            checkpoint_page: checkpoint.page(),
            max_epoch: 0,
            pos: cursor + 1,
            last_end: cursor,
            buf: vec![0u8; PAGE_SIZE].into_boxed_slice(),
            loaded: None,
            anchored: false,
            done: false,
        }
    }

    pub(crate) fn last_end(&self) -> DataOffset {
        self.last_end
    }

    pub(crate) fn finish(&mut self) {
        self.done = true;
    }

    /// Load page `p` into the buffer if it passes acceptance.
    /// `Ok(false)` means the live log ends before `p`.
    fn ensure(&mut self, p: PageNum) -> Result<bool> {
        if self.loaded == Some(p) {
            return Ok(true);
        }
        if p.0 >= self.disk_pages {
            return Ok(false);
        }
        self.loaded = None;
        self.file.read_exact_at(&mut self.buf, p.file_offset())?;
        if !page_accepted(&self.buf, p, self.master_epoch, self.max_epoch) {
            return Ok(false);
        }
        self.max_epoch = page::epoch(&self.buf);
        self.loaded = Some(p);
        Ok(true)
    }

    /// Step to the next complete entry. `collect` controls whether the
    /// payload is materialized; the positioning scan passes `false`.
    pub(crate) fn advance(&mut self, collect: bool) -> Result<Option<(Address, Vec<u8>)>> {
        if self.done {
            return Ok(None);
        }
        if !self.anchored {
            self.anchored = true;
            if self.checkpoint_page.0 >= 1 && !self.ensure(self.checkpoint_page)? {
                self.done = true;
                return Ok(None);
            }
        }
        loop {
            let p = self.pos.page();
            if !self.ensure(p)? {
                self.done = true;
                return Ok(None);
            }
            let offset = self.pos.within_body();
            if offset + ENTRY_HEADER_SIZE + 1 > DATA_PER_PAGE {
                // tail too small for a header and a byte, the writer skipped it
                self.pos = PageNum(p.0 + 1).first_data_offset();
                continue;
            }
            let body = page::body(&self.buf);
            if body[offset] == 0 {
                self.done = true;
                return Ok(None);
            }
            let chunk = match entry::read_chunk(&body[offset..]) {
                Ok(chunk) => chunk,
                Err(_) => {
                    self.done = true;
                    return Ok(None);
                }
            };
            debug_assert_eq!(chunk.ty, EntryType::Normal);
            let declared = chunk.declared_len;
            let mut payload = Vec::new();
            if collect {
                payload.reserve(declared);
                payload.extend_from_slice(chunk.payload);
            }
            let mut taken = chunk.payload.len();
            let mut end = DataOffset(self.pos.0 + (ENTRY_HEADER_SIZE + taken) as u64 - 1);
            while taken < declared {
                let next = PageNum(end.page().0 + 1);
                if !self.ensure(next)? {
                    // still owed bytes, so the entry never completed
                    self.done = true;
                    return Ok(None);
                }
                let take = (declared - taken).min(DATA_PER_PAGE);
                if collect {
                    payload.extend_from_slice(&page::body(&self.buf)[..take]);
                }
                taken += take;
                end = DataOffset(next.first_data_offset().0 + take as u64 - 1);
            }
            self.last_end = end;
            self.pos = end + 1;
            return Ok(Some((end.to_address(), payload)));
        }
    }
}

// =============================================================================
// Replay Iterator
// =============================================================================

/// One recovered logical entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayEntry {
    /// Address of the entry's last byte, the value `append` returned for
    /// it, suitable for `advance_checkpoint`.
    pub end: Address,
    pub payload: Vec<u8>,
}

/// Iterator over the logical entries recorded after the checkpoint, oldest
/// first. Corruption or the end of the live log stop iteration cleanly;
/// only real I/O failures yield `Err`.
pub struct Entries<'a> {
    walker: LogWalker<'a>,
}

impl<'a> Entries<'a> {
    pub(crate) fn new(
        file: &'a dyn LogFile,
        disk_pages: u64,
        master_epoch: u32,
        checkpoint: Address,
    ) -> Self {
        Self {
            walker: LogWalker::new(file, disk_pages, master_epoch, checkpoint),
        }
    }
}

impl Iterator for Entries<'_> {
    type Item = Result<ReplayEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.walker.advance(true) {
            Ok(Some((end, payload))) => Some(Ok(ReplayEntry { end, payload })),
            Ok(None) => None,
            Err(err) => {
                self.walker.finish();
                Some(Err(err))
            }
        }
    }
}
