//! Tests for crash recovery and replay
//!
//! These tests verify:
//! - Replay of published entries across a close/reopen cycle
//! - Truncation at corrupt, incomplete, or stale pages
//! - Epoch acceptance across multiple log generations
//! - Checkpointed entries being skipped on replay
//!
//! Several tests build log files by hand to model crash states the live
//! write path cannot produce on demand.

use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::Path;

use bytes::BytesMut;
use pagewal::fs::SliceSource;
use pagewal::log::addr::{Address, PageNum, DATA_PER_PAGE, PAGE_SIZE};
use pagewal::log::master::{MasterRecord, MASTER_VERSION_FIRST};
use pagewal::log::page;
use pagewal::{Config, ReplayEntry, Wal};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup() -> (TempDir, Config) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let dir = TempDir::new().unwrap();
    let config = Config::builder()
        .path(dir.path().join("test.wal"))
        .file_size(64 * PAGE_SIZE as u64)
        .buffer_size(8 * PAGE_SIZE)
        .build();
    (dir, config)
}

fn open_active(config: Config) -> Wal {
    Wal::open(config).unwrap().finish_recover().unwrap()
}

fn replay_all(config: Config) -> (Vec<ReplayEntry>, Wal) {
    let recovering = Wal::open(config).unwrap();
    let entries = recovering
        .entries()
        .collect::<pagewal::Result<Vec<_>>>()
        .unwrap();
    (entries, recovering.finish_recover().unwrap())
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn read_file_page(config: &Config, page: u64) -> Vec<u8> {
    let file = OpenOptions::new().read(true).open(&config.path).unwrap();
    let mut buf = vec![0u8; PAGE_SIZE];
    file.read_exact_at(&mut buf, page * PAGE_SIZE as u64).unwrap();
    buf
}

fn flip_byte(path: &Path, offset: u64) {
    let file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    let mut b = [0u8; 1];
    file.read_exact_at(&mut b, offset).unwrap();
    file.write_all_at(&[b[0] ^ 0xFF], offset).unwrap();
}

/// Write one headered entry into a page body; returns the bytes consumed.
fn put_entry(body: &mut [u8], at: usize, payload: &[u8]) -> usize {
    body[at] = 1;
    body[at + 1..at + 3].copy_from_slice(&(payload.len() as u16).to_le_bytes());
    body[at + 3..at + 3 + payload.len()].copy_from_slice(payload);
    3 + payload.len()
}

/// Build a sealed page image the way the persister would emit it.
fn sealed_page(
    epoch: u32,
    num: PageNum,
    full: bool,
    fill: impl FnOnce(&mut [u8]) -> usize,
) -> Vec<u8> {
    let mut raw = vec![0u8; PAGE_SIZE];
    page::init(&mut raw, epoch, num);
    let used = fill(page::body_mut(&mut raw));
    let keep = if full { DATA_PER_PAGE } else { used };
    let mut staged = BytesMut::with_capacity(PAGE_SIZE);
    page::seal_copy_into(&raw, &mut staged, !full, keep);
    staged.to_vec()
}

/// Lay out a log file by hand: a master record plus explicit page images.
fn craft_log(config: &Config, epoch: u32, checkpoint: Address, pages: &[(PageNum, Vec<u8>)]) {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&config.path)
        .unwrap();
    file.set_len(config.file_size).unwrap();
    let master = MasterRecord {
        version: MASTER_VERSION_FIRST,
        epoch,
        checkpoint,
    };
    let mut image = vec![0u8; PAGE_SIZE];
    master.encode_into(&mut image);
    file.write_all_at(&image, 0).unwrap();
    for (num, image) in pages {
        file.write_all_at(image, num.file_offset()).unwrap();
    }
    file.sync_data().unwrap();
}

// =============================================================================
// Reopen and Replay
// =============================================================================

#[test]
fn test_reopen_replays_published_entries() {
    let (_dir, config) = setup();

    let wal = open_active(config.clone());
    let end_a = wal.append(b"input01").unwrap();
    let big = patterned(1000);
    let end_b = wal.append(&big).unwrap();
    wal.wait_flushed(end_b).unwrap();
    wal.shutdown();

    let recovering = Wal::open(config).unwrap();
    assert_eq!(recovering.epoch(), 1);
    assert_eq!(recovering.checkpoint_address(), Address(511));

    let entries = recovering
        .entries()
        .collect::<pagewal::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].end, end_a);
    assert_eq!(entries[0].payload, b"input01");
    assert_eq!(entries[1].end, end_b);
    assert_eq!(entries[1].payload, big);
    assert_eq!(recovering.cursor_address(), end_b);

    // each entries() call is an independent pass
    assert_eq!(recovering.entries().count(), 2);

    let wal = recovering.finish_recover().unwrap();
    assert_eq!(wal.epoch(), 2);
    let end_c = wal.append(b"next gen").unwrap();
    assert!(end_c > end_b);
}

#[test]
fn test_reopen_of_empty_log() {
    let (_dir, config) = setup();
    open_active(config.clone()).shutdown();

    let (entries, wal) = replay_all(config.clone());
    assert!(entries.is_empty());
    assert_eq!(wal.cursor_address(), Address(511));
    assert_eq!(wal.epoch(), 2);
    drop(wal);

    let master = MasterRecord::decode(&read_file_page(&config, 0)).unwrap();
    assert_eq!(master.epoch, 2);
}

// =============================================================================
// Unpublished Data
// =============================================================================

#[test]
fn test_unpublished_bytes_never_reach_the_file() {
    let (_dir, config) = setup();
    let wal = open_active(config.clone());

    // publish A while B already sits in the same ring page
    let mut guard = wal.lock();
    let end_a = guard.append(&mut SliceSource::new(b"published")).unwrap();
    guard.publish();
    guard.append(&mut SliceSource::new(b"secret")).unwrap();
    drop(guard);
    assert_eq!(end_a, Address(541));

    wal.wait_flushed(end_a).unwrap();

    // the ring holds B, the file must not
    let slot = wal.ring_page(PageNum(1));
    assert_eq!(&page::body(&slot)[15..21], b"secret");
    let image = read_file_page(&config, 1);
    page::verify(&image, PageNum(1)).unwrap();
    assert_eq!(&page::body(&image)[3..12], b"published");
    assert!(page::body(&image)[12..].iter().all(|b| *b == 0));

    wal.shutdown();

    let (entries, wal) = replay_all(config);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].payload, b"published");
    assert_eq!(wal.cursor_address(), end_a);
}

// =============================================================================
// Corruption and Incomplete Entries
// =============================================================================

#[test]
fn test_corrupt_page_truncates_replay() {
    let (_dir, config) = setup();

    let wal = open_active(config.clone());
    let end_a = wal.append(&patterned(491)).unwrap();
    let end_b = wal.append(&patterned(600)).unwrap();
    wal.wait_flushed(end_b).unwrap();
    wal.shutdown();
    assert_eq!(end_a, Address(1023));

    // B starts in page 2; breaking that page cuts the log after A
    flip_byte(&config.path, 2 * PAGE_SIZE as u64 + 100);

    let (entries, wal) = replay_all(config.clone());
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].end, end_a);
    assert_eq!(wal.cursor_address(), end_a);

    // the log resumes over the corrupt page under the new epoch
    let end_c = wal.append(b"after").unwrap();
    assert_eq!(end_c, Address(1049));
    wal.wait_flushed(end_c).unwrap();
    wal.shutdown();

    let (entries, wal) = replay_all(config);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].end, end_a);
    assert_eq!(entries[1].payload, b"after");
    drop(wal);
}

#[test]
fn test_incomplete_multipage_entry_dropped_and_resealed() {
    let (_dir, config) = setup();

    let wal = open_active(config.clone());
    let end_a = wal.append(b"head").unwrap();
    let end_b = wal.append(&patterned(981)).unwrap();
    wal.wait_flushed(end_b).unwrap();
    wal.shutdown();
    assert_eq!(end_a, Address(536));

    // B spans pages 1..=3; losing its last page drops the whole entry
    flip_byte(&config.path, 3 * PAGE_SIZE as u64 + 30);

    let (entries, wal) = replay_all(config.clone());
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].payload, b"head");
    assert_eq!(wal.cursor_address(), end_a);

    // reactivation rewrites the boundary page without B's leading chunk
    let image = read_file_page(&config, 1);
    page::verify(&image, PageNum(1)).unwrap();
    assert_eq!(page::epoch(&image), 2);
    assert!(page::has_flag(&image, page::FLAG_NOT_FULL));
    assert!(page::has_flag(&image, page::FLAG_TRUNCATED));
    let body = page::body(&image);
    assert_eq!(&body[..7], &[1, 4, 0, b'h', b'e', b'a', b'd']);
    assert!(body[7..].iter().all(|b| *b == 0));

    // new appends reuse the reclaimed space
    let end_c = wal.append(b"tail2").unwrap();
    assert_eq!(end_c, Address(544));
}

// =============================================================================
// Epoch Acceptance
// =============================================================================

#[test]
fn test_replay_spans_multiple_generations() {
    let (_dir, config) = setup();

    // generation 1 fills pages 1..=3
    let wal = open_active(config.clone());
    let end_a = wal.append(&patterned(1473)).unwrap();
    wal.wait_flushed(end_a).unwrap();
    wal.shutdown();
    assert_eq!(end_a, Address(2041));

    // generation 2 reseals page 3 and continues into pages 4..=5
    let (entries, wal) = replay_all(config.clone());
    assert_eq!(entries.len(), 1);
    let end_b = wal.append(b"abc").unwrap();
    assert_eq!(end_b, PageNum(3).end_address());
    let end_c = wal.append(&patterned(500)).unwrap();
    assert_eq!(end_c, Address(2586));
    wal.wait_flushed(end_c).unwrap();
    wal.shutdown();

    // the file now mixes epochs: ascending across the replay range
    assert_eq!(page::epoch(&read_file_page(&config, 1)), 1);
    assert_eq!(page::epoch(&read_file_page(&config, 2)), 1);
    assert_eq!(page::epoch(&read_file_page(&config, 3)), 2);
    assert_eq!(page::epoch(&read_file_page(&config, 4)), 2);

    let (entries, wal) = replay_all(config);
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].end, end_a);
    assert_eq!(entries[1].payload, b"abc");
    assert_eq!(entries[2].end, end_c);
    assert_eq!(entries[2].payload, patterned(500));
    drop(wal);
}

#[test]
fn test_stale_page_with_lower_epoch_fences_replay() {
    let (_dir, config) = setup();

    // page 1 belongs to the current generation and is full, so replay walks
    // on into page 2, a leftover the newer generation never overwrote
    let body_payload = patterned(491);
    let page1 = sealed_page(2, PageNum(1), true, |body| {
        put_entry(body, 0, &body_payload)
    });
    let page2 = sealed_page(1, PageNum(2), false, |body| put_entry(body, 0, b"stale"));
    craft_log(&config, 2, Address(511), &[(PageNum(1), page1), (PageNum(2), page2)]);

    let (entries, wal) = replay_all(config);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].payload, body_payload);
    assert_eq!(entries[0].end, PageNum(1).end_address());
    assert_eq!(wal.cursor_address(), PageNum(1).end_address());
    assert_eq!(wal.epoch(), 3);

    // the fenced page is plain free space for the new generation
    let end = wal.append(b"fresh").unwrap();
    assert_eq!(end, Address(PageNum(2).first_data_address().0 + 7));
}

#[test]
fn test_page_one_epoch_ahead_of_master_accepted() {
    // a crash between the boundary reseal and the master rewrite leaves
    // pages one epoch ahead of the master record
    let (_dir, config) = setup();
    let page1 = sealed_page(2, PageNum(1), false, |body| put_entry(body, 0, b"ahead"));
    craft_log(&config, 1, Address(511), &[(PageNum(1), page1)]);

    let (entries, wal) = replay_all(config);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].payload, b"ahead");
    assert_eq!(entries[0].end, Address(537));
    drop(wal);
}

#[test]
fn test_page_two_epochs_ahead_of_master_rejected() {
    let (_dir, config) = setup();
    let page1 = sealed_page(3, PageNum(1), false, |body| put_entry(body, 0, b"phantom"));
    craft_log(&config, 1, Address(511), &[(PageNum(1), page1)]);

    let (entries, wal) = replay_all(config);
    assert!(entries.is_empty());
    assert_eq!(wal.cursor_address(), Address(511));
    drop(wal);
}

// =============================================================================
// Checkpoints
// =============================================================================

#[test]
fn test_replay_resumes_after_checkpoint() {
    let (_dir, config) = setup();

    let wal = open_active(config.clone());
    let end_a = wal.append(b"first").unwrap();
    let end_b = wal.append(b"second").unwrap();
    wal.wait_flushed(end_b).unwrap();
    assert_eq!(end_a, Address(537));
    assert_eq!(end_b, Address(546));

    // shutdown completes the pending checkpoint before the persister exits
    wal.advance_checkpoint(end_a).unwrap();
    wal.shutdown();
    assert_eq!(wal.checkpoint_address(), end_a);

    let recovering = Wal::open(config).unwrap();
    assert_eq!(recovering.checkpoint_address(), end_a);
    let entries = recovering
        .entries()
        .collect::<pagewal::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].end, end_b);
    assert_eq!(entries[0].payload, b"second");
    assert_eq!(recovering.cursor_address(), end_b);
}
