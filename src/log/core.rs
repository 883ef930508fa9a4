//! Log core
//!
//! ## Responsibilities
//! - Own the in-memory page ring and the append / publish / flush cursors
//! - Admission control and the page-splitting append path
//! - The open → recover → active → shutdown lifecycle
//!
//! ```text
//!   host threads                                  background
//!   ------------                                  ----------
//!   append / publish            wake
//!        |             +------------------+
//!        v             |                  v
//!   +----------- ring buffer ---------+   Persister
//!   | slot k = page k % ring_pages    |      |  seal + positioned write
//!   | flushed <= published <= cursor  |      v
//!   +---------------------------------+   log file (+ master record)
//! ```
//!
//! Every cursor and the ring live behind one mutex; `WalGuard` exposes that
//! critical section so a host can group appends with the publish that makes
//! them durable-eligible. The lifecycle is encoded in the types: `open`
//! yields a `RecoveringWal` that can only replay, and `finish_recover`
//! trades it for the active `Wal`.

use std::mem;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::BytesMut;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::{Result, WalError};
use crate::fs::{ByteSource, FileSystem, LogFile, ScopedClose, SliceSource, StdFileSystem};
use crate::log::addr::{Address, DataOffset, PageNum, DATA_PER_PAGE, PAGE_SIZE};
use crate::log::entry::{self, EntryType, ENTRY_HEADER_SIZE, MAX_ENTRY_LEN};
use crate::log::master::{MasterRecord, MASTER_VERSION_FIRST};
use crate::log::page;
use crate::log::persister;
use crate::log::replay::{self, Entries, LogWalker};

// =============================================================================
// Shared State
// =============================================================================

/// State shared between the host-facing handles and the persister thread.
pub(crate) struct Shared {
    pub(crate) state: Mutex<CoreState>,
    /// Persister wakeup: new published data, a checkpoint request, shutdown.
    pub(crate) wake: Condvar,
    /// Appender/waiter wakeup: flush progress, a persist failure, shutdown.
    pub(crate) space: Condvar,
}

pub(crate) struct CoreState {
    /// Page slots; slot k spans `ring[k * 512 .. (k + 1) * 512]`.
    pub(crate) ring: Vec<u8>,
    pub(crate) ring_pages: u64,
    pub(crate) disk_pages: u64,
    /// Data offset of the last appended byte.
    pub(crate) cursor: DataOffset,
    /// Address of the last byte visible to the persister.
    pub(crate) published: Address,
    /// Address of the last byte durably in the file.
    pub(crate) flushed: Address,
    pub(crate) epoch: u32,
    /// Durable checkpoint, mirroring the master record.
    pub(crate) checkpoint: Address,
    /// Host-requested checkpoint; the persister clamps it to `flushed`.
    pub(crate) requested_checkpoint: Address,
    pub(crate) closed: bool,
    /// Set once the persister thread has returned.
    pub(crate) exited: bool,
    /// Message of the last persist failure; cleared by a successful retry.
    pub(crate) persist_error: Option<String>,
}

impl CoreState {
    fn slot_start(&self, page: PageNum) -> usize {
        (page.0 % self.ring_pages) as usize * PAGE_SIZE
    }

    pub(crate) fn slot(&self, page: PageNum) -> &[u8] {
        let start = self.slot_start(page);
        &self.ring[start..start + PAGE_SIZE]
    }

    pub(crate) fn slot_mut(&mut self, page: PageNum) -> &mut [u8] {
        let start = self.slot_start(page);
        &mut self.ring[start..start + PAGE_SIZE]
    }

    fn init_slot(&mut self, page: PageNum) {
        let epoch = self.epoch;
        page::init(self.slot_mut(page), epoch, page);
    }

    /// Largest payload admission allows: it must fit the 2-byte length
    /// field, and its page span must never wrap the ring onto itself.
    fn max_entry_len(&self) -> usize {
        let ring_bound = ((self.ring_pages - 1) as usize * DATA_PER_PAGE)
            .saturating_sub(ENTRY_HEADER_SIZE);
        ring_bound.min(MAX_ENTRY_LEN)
    }

    /// Last page an entry of `len` bytes would touch, by running the split
    /// arithmetic of `write_entry` without writing.
    fn entry_span(&self, len: usize) -> PageNum {
        let mut pos = self.cursor;
        let mut first = true;
        let mut left = len;
        loop {
            let next = pos + 1;
            let within = next.to_address().within_page() as i64;
            let header = if first { ENTRY_HEADER_SIZE as i64 } else { 0 };
            let remaining = PAGE_SIZE as i64 - within - header;
            if remaining <= 0 {
                pos = next.page().last_data_offset();
                continue;
            }
            let chunk = left.min(remaining as usize);
            pos = pos + ((if first { ENTRY_HEADER_SIZE } else { 0 }) + chunk) as u64;
            left -= chunk;
            first = false;
            if left == 0 {
                return pos.page();
            }
        }
    }

    /// Split an admitted entry across page slots: one headered chunk, then
    /// raw continuation bytes page by page. Returns the entry's end.
    fn write_entry(&mut self, src: &mut dyn ByteSource, len: usize) -> Result<DataOffset> {
        let mut first = true;
        let mut left = len;
        loop {
            let next = self.cursor + 1;
            let page_num = next.page();
            if page_num > self.cursor.page() {
                self.init_slot(page_num);
            }
            let within = next.to_address().within_page() as i64;
            let header = if first { ENTRY_HEADER_SIZE as i64 } else { 0 };
            let remaining = PAGE_SIZE as i64 - within - header;
            if remaining <= 0 {
                // the skipped tail stays zero and reads back as end-of-page
                self.cursor = page_num.last_data_offset();
                continue;
            }
            let chunk = left.min(remaining as usize);
            let offset = next.within_body();
            let body = page::body_mut(self.slot_mut(page_num));
            let consumed = if first {
                entry::write_headered_chunk(&mut body[offset..], EntryType::Normal, len, src, chunk)?
            } else {
                entry::write_continuation_chunk(&mut body[offset..], src, chunk)
            };
            self.cursor = self.cursor + consumed as u64;
            left -= chunk;
            first = false;
            if left == 0 {
                return Ok(self.cursor);
            }
        }
    }
}

// =============================================================================
// Active Log
// =============================================================================

/// An active, appendable write-ahead log.
///
/// Created by [`RecoveringWal::finish_recover`]. All handles are `Send` +
/// `Sync`; every operation synchronizes on one internal lock.
pub struct Wal {
    shared: Arc<Shared>,
    config: Config,
    file: Arc<dyn LogFile>,
    persister: Mutex<Option<JoinHandle<()>>>,
}

impl Wal {
    /// Open or create the log at `config.path`, entering recovery.
    pub fn open(config: Config) -> Result<RecoveringWal> {
        Self::open_with(config, &StdFileSystem)
    }

    /// Open with a caller-provided file system (tests inject instrumented
    /// or failing ones).
    pub fn open_with(config: Config, fs: &dyn FileSystem) -> Result<RecoveringWal> {
        config.validate()?;
        if !fs.exists(&config.path) {
            create_log_file(fs, &config)?;
        }
        let file: Arc<dyn LogFile> = Arc::from(fs.open(&config.path)?);
        let actual_len = file.len()?;
        if actual_len != config.file_size {
            return Err(WalError::Config(format!(
                "existing log file is {} bytes, configured size is {}",
                actual_len, config.file_size
            )));
        }

        // Step 1: read the master record; without it there is nothing to
        // resume from
        let mut master_page = vec![0u8; PAGE_SIZE];
        file.read_exact_at(&mut master_page, 0)?;
        let master = MasterRecord::decode(&master_page)?;

        // Step 2: scan from the checkpoint to find the durable end
        let disk_pages = config.disk_pages();
        let ring_pages = config.ring_pages();
        let mut walker =
            LogWalker::new(file.as_ref(), disk_pages, master.epoch, master.checkpoint);
        let mut entries = 0u64;
        while walker.advance(false)?.is_some() {
            entries += 1;
        }
        let cursor = walker.last_end();

        // Step 3: prime the ring with the page the log resumes in
        let mut state = CoreState {
            ring: vec![0u8; ring_pages as usize * PAGE_SIZE],
            ring_pages,
            disk_pages,
            cursor,
            published: cursor.to_address(),
            flushed: cursor.to_address(),
            epoch: master.epoch,
            checkpoint: master.checkpoint,
            requested_checkpoint: master.checkpoint,
            closed: false,
            exited: false,
            persist_error: None,
        };
        let truncated = prime_boundary_slot(&mut state, file.as_ref(), &master, cursor)?;

        info!(
            path = %config.path.display(),
            epoch = master.epoch,
            entries,
            cursor = cursor.to_address().0,
            truncated,
            "opened log, entering recovery"
        );

        Ok(RecoveringWal {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                wake: Condvar::new(),
                space: Condvar::new(),
            }),
            config,
            file,
            master,
        })
    }

    /// Take the log lock for a batch of appends and a publish.
    pub fn lock(&self) -> WalGuard<'_> {
        let shared = self.shared.as_ref();
        WalGuard {
            shared,
            state: shared.state.lock(),
        }
    }

    /// Append one entry from a slice and publish it immediately.
    /// Returns the address of the entry's last byte.
    pub fn append(&self, payload: &[u8]) -> Result<Address> {
        let mut guard = self.lock();
        let end = guard.append(&mut SliceSource::new(payload))?;
        guard.publish();
        Ok(end)
    }

    /// Block until everything through `addr` is durably in the file.
    ///
    /// Fails with the sticky `PersistFailure` if the persister cannot make
    /// progress, or with `Closed` if the log shuts down before `addr`
    /// became durable.
    pub fn wait_flushed(&self, addr: Address) -> Result<()> {
        let mut state = self.shared.state.lock();
        loop {
            if state.flushed >= addr {
                return Ok(());
            }
            if let Some(msg) = &state.persist_error {
                return Err(WalError::PersistFailure(msg.clone()));
            }
            if state.closed && state.exited {
                return Err(WalError::Closed);
            }
            self.shared.space.wait(&mut state);
        }
    }

    /// Declare that entries ending at or before `addr` are reflected in
    /// durable host state; the persister clamps the request to the flushed
    /// cursor and rewrites the master record.
    pub fn advance_checkpoint(&self, addr: Address) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(WalError::Closed);
        }
        debug_assert!(addr <= state.cursor.to_address());
        if addr > state.requested_checkpoint {
            state.requested_checkpoint = addr;
            self.shared.wake.notify_one();
        }
        Ok(())
    }

    /// Stop accepting appends, let the persister drain what is already
    /// published, and join it. Idempotent; only the first caller blocks.
    pub fn shutdown(&self) {
        let prev_closed = {
            let mut state = self.shared.state.lock();
            mem::replace(&mut state.closed, true)
        };
        if prev_closed {
            return;
        }
        self.shared.wake.notify_all();
        self.shared.space.notify_all();
        if let Some(handle) = self.persister.lock().take() {
            if handle.join().is_err() {
                error!("persister thread panicked during shutdown");
            }
        }
        debug!("log shut down");
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn epoch(&self) -> u32 {
        self.shared.state.lock().epoch
    }

    /// Address of the last appended byte.
    pub fn cursor_address(&self) -> Address {
        self.shared.state.lock().cursor.to_address()
    }

    pub fn published_address(&self) -> Address {
        self.shared.state.lock().published
    }

    pub fn flushed_address(&self) -> Address {
        self.shared.state.lock().flushed
    }

    pub fn checkpoint_address(&self) -> Address {
        self.shared.state.lock().checkpoint
    }

    /// Message of the sticky persist failure, if any.
    pub fn persist_error(&self) -> Option<String> {
        self.shared.state.lock().persist_error.clone()
    }

    pub fn disk_pages(&self) -> u64 {
        self.config.disk_pages()
    }

    pub fn ring_pages(&self) -> u64 {
        self.config.ring_pages()
    }

    /// Raw copy of the ring slot `page` maps to. The slot header names the
    /// page actually occupying it (an untouched slot is all zero).
    pub fn ring_page(&self, page: PageNum) -> Vec<u8> {
        self.shared.state.lock().slot(page).to_vec()
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// =============================================================================
// Append Guard
// =============================================================================

/// Scoped access to the log core.
///
/// Holds the core lock, so a host can group several appends and the publish
/// that exposes them into one critical section. An `append` that must wait
/// for the persister to free ring slots releases the lock while it sleeps,
/// so a batch is atomic only as long as no append has to wait.
pub struct WalGuard<'a> {
    shared: &'a Shared,
    state: MutexGuard<'a, CoreState>,
}

impl WalGuard<'_> {
    /// Append one entry, initially unpublished. Returns the address of the
    /// entry's last byte. All-or-nothing: admission runs every check before
    /// the first byte lands in the ring.
    pub fn append(&mut self, src: &mut dyn ByteSource) -> Result<Address> {
        let len = src.remaining();
        self.admit(len)?;
        let end = self.state.write_entry(src, len)?;
        Ok(end.to_address())
    }

    /// Make everything appended so far visible to the persister and wake it.
    pub fn publish(&mut self) {
        let end = self.state.cursor.to_address();
        if end > self.state.published {
            self.state.published = end;
        }
        self.shared.wake.notify_one();
    }

    /// Fail fast or wait until the entry's page span can be taken without
    /// losing data.
    fn admit(&mut self, len: usize) -> Result<()> {
        loop {
            if let Some(msg) = &self.state.persist_error {
                return Err(WalError::PersistFailure(msg.clone()));
            }
            if self.state.closed {
                return Err(WalError::Closed);
            }
            let max = self.state.max_entry_len();
            if len > max {
                return Err(WalError::EntryTooLarge { len, max });
            }
            let last = self.state.entry_span(len);
            if last.0 >= self.state.disk_pages {
                return Err(WalError::LogFull {
                    pages: self.state.disk_pages,
                });
            }
            if last.0 < self.state.ring_pages {
                // every slot in the span is still virgin
                return Ok(());
            }
            // reusing slot(last) evicts this page from the ring:
            let evictee = PageNum(last.0 - self.state.ring_pages);
            if self.state.published.page() <= evictee {
                // only the caller's own publish can free the span
                return Err(WalError::RingBufferFull {
                    needed: evictee.0,
                    published: self.state.published.page().0,
                });
            }
            if self.state.flushed.page() > evictee {
                return Ok(());
            }
            // published but not yet flushed: wait for the persister
            self.shared.space.wait(&mut self.state);
        }
    }
}

// =============================================================================
// Recovering Log
// =============================================================================

/// A log that has been opened and positioned but not yet reactivated.
///
/// Replay what the host needs through [`entries`](Self::entries), then call
/// [`finish_recover`](Self::finish_recover) to start writing. Appends do
/// not exist in this state.
pub struct RecoveringWal {
    shared: Arc<Shared>,
    config: Config,
    file: Arc<dyn LogFile>,
    master: MasterRecord,
}

impl RecoveringWal {
    /// Iterate the entries recorded after the checkpoint, oldest first.
    /// Each call starts a fresh pass over the file.
    pub fn entries(&self) -> Entries<'_> {
        Entries::new(
            self.file.as_ref(),
            self.config.disk_pages(),
            self.master.epoch,
            self.master.checkpoint,
        )
    }

    /// Seal the resumed boundary page under a new epoch, rewrite the master
    /// record, start the persister, and hand back the active log.
    pub fn finish_recover(self) -> Result<Wal> {
        let new_epoch = self.master.epoch.saturating_add(1);
        let boundary = {
            let mut state = self.shared.state.lock();
            state.epoch = new_epoch;
            let bpage = state.cursor.page();
            if bpage.0 >= 1 {
                let full = state.cursor == bpage.last_data_offset();
                let keep = state.cursor.within_body() + 1;
                let slot = state.slot_mut(bpage);
                page::set_epoch(slot, new_epoch);
                let mut staged = BytesMut::with_capacity(PAGE_SIZE);
                page::seal_copy_into(slot, &mut staged, !full, keep);
                Some((bpage, staged))
            } else {
                None
            }
        };

        // Step 1: the resumed page must survive a crash right after the
        // master starts naming the new epoch
        if let Some((bpage, staged)) = &boundary {
            self.file.write_all_at(staged, bpage.file_offset())?;
            self.file.sync_data()?;
        }

        // Step 2: land the new generation in the master record
        let master = MasterRecord {
            version: MASTER_VERSION_FIRST,
            epoch: new_epoch,
            checkpoint: self.master.checkpoint,
        };
        let mut master_page = vec![0u8; PAGE_SIZE];
        master.encode_into(&mut master_page);
        self.file.write_all_at(&master_page, 0)?;
        self.file.sync_data()?;

        // Step 3: start the persister and go active
        let handle = persister::spawn(Arc::clone(&self.shared), Arc::clone(&self.file))?;
        info!(epoch = new_epoch, "recovery finished, log active");
        Ok(Wal {
            shared: self.shared,
            config: self.config,
            file: self.file,
            persister: Mutex::new(Some(handle)),
        })
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Epoch of the generation being recovered (pre-bump).
    pub fn epoch(&self) -> u32 {
        self.master.epoch
    }

    pub fn checkpoint_address(&self) -> Address {
        self.master.checkpoint
    }

    /// Address of the last byte of the recovered log.
    pub fn cursor_address(&self) -> Address {
        self.shared.state.lock().cursor.to_address()
    }

    /// Raw copy of the ring slot `page` maps to.
    pub fn ring_page(&self, page: PageNum) -> Vec<u8> {
        self.shared.state.lock().slot(page).to_vec()
    }
}

// =============================================================================
// Open Helpers
// =============================================================================

/// Create the file under a temporary name, write the fresh master record,
/// sync, then rename into place, so a crash mid-create never leaves a
/// half-initialized log at the real path.
fn create_log_file(fs: &dyn FileSystem, config: &Config) -> Result<()> {
    let mut tmp = config.path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let mut guard = ScopedClose::new(fs.create_preallocated(&tmp, config.file_size)?);
    let mut master_page = vec![0u8; PAGE_SIZE];
    MasterRecord::fresh().encode_into(&mut master_page);
    guard.file()?.write_all_at(&master_page, 0)?;
    guard.close()?;
    fs.rename(&tmp, &config.path)?;
    info!(path = %config.path.display(), size = config.file_size, "created log file");
    Ok(())
}

/// Load the cursor's page into its slot: the accepted disk image with the
/// tail after the cursor zeroed, or a fresh page when there is nothing to
/// resume. Returns whether nonzero bytes were discarded.
fn prime_boundary_slot(
    state: &mut CoreState,
    file: &dyn LogFile,
    master: &MasterRecord,
    cursor: DataOffset,
) -> Result<bool> {
    let bpage = cursor.page();
    if bpage.0 == 0 {
        // fresh log: the cursor still sits in the master page
        state.init_slot(bpage);
        return Ok(false);
    }
    let mut image = vec![0u8; PAGE_SIZE];
    file.read_exact_at(&mut image, bpage.file_offset())?;
    if replay::page_accepted(&image, bpage, master.epoch, 0) {
        let tail_start = cursor.within_body() + 1;
        let slot = state.slot_mut(bpage);
        slot.copy_from_slice(&image);
        page::zero_checksum(slot);
        page::clear_flag(slot, page::FLAG_NOT_FULL);
        let body = page::body_mut(slot);
        let discarded = body[tail_start..].iter().any(|b| *b != 0);
        body[tail_start..].fill(0);
        if discarded {
            page::set_flag(slot, page::FLAG_TRUNCATED);
        }
        Ok(discarded)
    } else {
        // the page holding the cursor is itself unreadable; resume on a
        // fresh image and record the cut
        state.init_slot(bpage);
        page::set_flag(state.slot_mut(bpage), page::FLAG_TRUNCATED);
        Ok(true)
    }
}
