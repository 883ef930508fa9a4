//! Persister
//!
//! ## Responsibilities
//! - Drain published ring pages to the log file in address order
//! - Advance the durable checkpoint by rewriting the master record
//! - Turn write failures into the sticky error appenders check
//!
//! One persister thread runs per log. Each flush seals the pages between
//! the flushed and published cursors into a staging buffer under the lock,
//! then performs the positioned write and the sync with the lock released,
//! so appenders only ever contend with memcpy-speed work. The staged pages
//! are contiguous on disk, one write call covers the whole range.
//!
//! On failure the persister records the error, wakes any blocked waiters so
//! they can observe it, and parks until the next `publish` or shutdown kicks
//! a retry at the same position. On shutdown it drains whatever is already
//! published before exiting; the final master rewrite happens only if a
//! checkpoint request is still pending.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::BytesMut;
use parking_lot::MutexGuard;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::fs::LogFile;
use crate::log::addr::{Address, PageNum, DATA_PER_PAGE, PAGE_SIZE};
use crate::log::core::{CoreState, Shared};
use crate::log::master::{MasterRecord, MASTER_VERSION_FIRST};
use crate::log::page;

pub(crate) fn spawn(shared: Arc<Shared>, file: Arc<dyn LogFile>) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("pagewal-persister".into())
        .spawn(move || run(shared, file))?;
    Ok(handle)
}

fn run(shared: Arc<Shared>, file: Arc<dyn LogFile>) {
    let mut state = shared.state.lock();
    loop {
        if state.flushed < state.published {
            let target = state.published;
            let (first, staged) = seal_range(&mut state, target);
            let pages = staged.len() / PAGE_SIZE;
            let result = MutexGuard::unlocked(&mut state, || {
                file.write_all_at(&staged, first.file_offset())
                    .and_then(|()| file.sync_data())
            });
            match result {
                Ok(()) => {
                    state.flushed = target;
                    if state.persist_error.take().is_some() {
                        info!(flushed = target.0, "persist recovered after earlier failure");
                    }
                    shared.space.notify_all();
                    debug!(flushed = target.0, pages, "flushed published range");
                }
                Err(err) => {
                    error!(error = %err, first_page = first.0, pages, "persist failed");
                    state.persist_error = Some(err.to_string());
                    shared.space.notify_all();
                    if state.closed {
                        break;
                    }
                    shared.wake.wait(&mut state);
                }
            }
            continue;
        }

        if state.requested_checkpoint > state.checkpoint {
            // never checkpoint past what the file actually holds
            let target = state.requested_checkpoint.min(state.flushed);
            if target > state.checkpoint {
                let master = MasterRecord {
                    version: MASTER_VERSION_FIRST,
                    epoch: state.epoch,
                    checkpoint: target,
                };
                let mut image = vec![0u8; PAGE_SIZE];
                master.encode_into(&mut image);
                let result = MutexGuard::unlocked(&mut state, || {
                    file.write_all_at(&image, 0).and_then(|()| file.sync_data())
                });
                match result {
                    Ok(()) => {
                        state.checkpoint = target;
                        shared.space.notify_all();
                        debug!(checkpoint = target.0, "advanced checkpoint");
                    }
                    Err(err) => {
                        error!(error = %err, "checkpoint persist failed");
                        state.persist_error = Some(err.to_string());
                        shared.space.notify_all();
                        if state.closed {
                            break;
                        }
                        shared.wake.wait(&mut state);
                    }
                }
                continue;
            }
        }

        if state.closed {
            break;
        }
        shared.wake.wait(&mut state);
    }
    state.exited = true;
    shared.space.notify_all();
    debug!("persister exited");
}

/// Seal every page between the flushed and published cursors into one
/// staging buffer. The last page is usually partial; its unpublished tail
/// is blanked in the copy so nothing unpublished reaches the file.
fn seal_range(state: &mut CoreState, target: Address) -> (PageNum, BytesMut) {
    let first = Address(state.flushed.0 + 1).page();
    let last = target.page();
    let mut staged = BytesMut::with_capacity((last.0 - first.0 + 1) as usize * PAGE_SIZE);
    for p in first.0..=last.0 {
        let page_num = PageNum(p);
        let full = target >= page_num.end_address();
        let keep = if full {
            DATA_PER_PAGE
        } else {
            target.to_data_offset().within_body() + 1
        };
        page::seal_copy_into(state.slot(page_num), &mut staged, !full, keep);
    }
    (first, staged)
}
