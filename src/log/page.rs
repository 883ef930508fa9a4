//! Page codec
//!
//! ## Page Format (512 bytes)
//!
//! ```text
//! +---------+----------+-------+--------+----------+------------------+
//! | version | checksum | flags | epoch  | page num | body             |
//! | 1B      | 4B LE    | 1B    | 4B LE  | 8B LE    | 494B             |
//! +---------+----------+-------+--------+----------+------------------+
//! 0         1          5       6        10         18               512
//! ```
//!
//! The checksum is crc32 over the full page with the checksum field zeroed.
//! It is write-time-only: the in-ring copy keeps the field zero while the
//! body mutates, and only the sealed staging copies handed to the file carry
//! a value. Pages are windows into the ring arena, so everything here works
//! on plain `&[u8]` / `&mut [u8]` slices.

use bytes::BytesMut;

use crate::error::{Result, WalError};
use crate::log::addr::{PageNum, DATA_PER_PAGE, PAGE_HEADER_SIZE, PAGE_SIZE};
use crate::log::entry::{self, EntryType, ENTRY_HEADER_SIZE};

const VERSION_OFFSET: usize = 0;
const CHECKSUM_OFFSET: usize = 1;
const FLAGS_OFFSET: usize = 5;
const EPOCH_OFFSET: usize = 6;
const PAGE_NUM_OFFSET: usize = 10;

/// Format version stamped on every initialized page.
pub const PAGE_VERSION_FIRST: u8 = 1;

/// The page was sealed before its body filled up.
pub const FLAG_NOT_FULL: u8 = 0b0000_0001;

/// Recovery zeroed a torn tail out of this page.
pub const FLAG_TRUNCATED: u8 = 0b0000_0010;

// =============================================================================
// Initialization
// =============================================================================

/// Reset a slot to a fresh page: zero everything, stamp version, epoch and
/// page number. The checksum stays zero until the page is sealed.
pub fn init(buf: &mut [u8], epoch: u32, page_num: PageNum) {
    debug_assert_eq!(buf.len(), PAGE_SIZE);
    buf.fill(0);
    buf[VERSION_OFFSET] = PAGE_VERSION_FIRST;
    buf[EPOCH_OFFSET..EPOCH_OFFSET + 4].copy_from_slice(&epoch.to_le_bytes());
    buf[PAGE_NUM_OFFSET..PAGE_NUM_OFFSET + 8].copy_from_slice(&page_num.0.to_le_bytes());
}

// =============================================================================
// Field Accessors
// =============================================================================

pub fn version(buf: &[u8]) -> u8 {
    buf[VERSION_OFFSET]
}

pub fn checksum(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]])
}

pub fn epoch(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]])
}

pub fn set_epoch(buf: &mut [u8], epoch: u32) {
    buf[EPOCH_OFFSET..EPOCH_OFFSET + 4].copy_from_slice(&epoch.to_le_bytes());
}

pub fn page_num(buf: &[u8]) -> PageNum {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[PAGE_NUM_OFFSET..PAGE_NUM_OFFSET + 8]);
    PageNum(u64::from_le_bytes(bytes))
}

pub fn flags(buf: &[u8]) -> u8 {
    buf[FLAGS_OFFSET]
}

pub fn has_flag(buf: &[u8], flag: u8) -> bool {
    buf[FLAGS_OFFSET] & flag != 0
}

pub fn set_flag(buf: &mut [u8], flag: u8) {
    buf[FLAGS_OFFSET] |= flag;
}

pub fn clear_flag(buf: &mut [u8], flag: u8) {
    buf[FLAGS_OFFSET] &= !flag;
}

/// The 494-byte payload body.
pub fn body(buf: &[u8]) -> &[u8] {
    &buf[PAGE_HEADER_SIZE..PAGE_SIZE]
}

pub fn body_mut(buf: &mut [u8]) -> &mut [u8] {
    &mut buf[PAGE_HEADER_SIZE..PAGE_SIZE]
}

// =============================================================================
// Checksum Seal / Verify
// =============================================================================

/// crc32 over the page with the checksum field treated as zero.
pub fn compute_checksum(buf: &[u8]) -> u32 {
    debug_assert_eq!(buf.len(), PAGE_SIZE);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf[..CHECKSUM_OFFSET]);
    hasher.update(&[0u8; 4]);
    hasher.update(&buf[FLAGS_OFFSET..]);
    hasher.finalize()
}

/// Append a sealed image of `buf` to `out`: stamp the `NotFull` flag, blank
/// body bytes past `keep_body`, then checksum the result. Works on the copy
/// only; the in-ring source keeps its zero checksum field and may hold
/// appended bytes past `keep_body` that are not yet eligible for the file.
pub fn seal_copy_into(buf: &[u8], out: &mut BytesMut, not_full: bool, keep_body: usize) {
    debug_assert_eq!(buf.len(), PAGE_SIZE);
    debug_assert!(keep_body <= DATA_PER_PAGE);
    let base = out.len();
    out.extend_from_slice(buf);
    let image = &mut out[base..base + PAGE_SIZE];
    if not_full {
        set_flag(image, FLAG_NOT_FULL);
    } else {
        clear_flag(image, FLAG_NOT_FULL);
    }
    body_mut(image)[keep_body..].fill(0);
    let sum = compute_checksum(image);
    image[CHECKSUM_OFFSET..FLAGS_OFFSET].copy_from_slice(&sum.to_le_bytes());
}

/// Clear the checksum field when adopting a sealed on-disk image back into
/// the ring.
pub fn zero_checksum(buf: &mut [u8]) {
    buf[CHECKSUM_OFFSET..FLAGS_OFFSET].fill(0);
}

/// Check a sealed on-disk image. `page` is the position the image was read
/// from and is only used to label the error.
pub fn verify(buf: &[u8], page: PageNum) -> Result<()> {
    let stored = checksum(buf);
    let actual = compute_checksum(buf);
    if stored != actual {
        return Err(WalError::PageChecksumMismatch {
            page: page.0,
            expected: stored,
            actual,
        });
    }
    Ok(())
}

// =============================================================================
// Entry Iteration
// =============================================================================

/// Walk the in-page chunks of a page, front to back.
///
/// Yields `(type, payload view)` per chunk; the view is capped at the body
/// end, so a chunk that continues into the next page yields only its local
/// share. Stops at the `None` sentinel, at the body end, or at anything
/// malformed.
pub fn entries(buf: &[u8]) -> EntryCursor<'_> {
    debug_assert_eq!(buf.len(), PAGE_SIZE);
    EntryCursor {
        body: body(buf),
        pos: 0,
    }
}

pub struct EntryCursor<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for EntryCursor<'a> {
    type Item = (EntryType, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.body.len() || self.body[self.pos] == 0 {
            return None;
        }
        // a headered chunk needs its full 3-byte header in this page
        if self.pos + ENTRY_HEADER_SIZE > DATA_PER_PAGE {
            return None;
        }
        let chunk = entry::read_chunk(&self.body[self.pos..]).ok()?;
        self.pos += chunk.consumed;
        Some((chunk.ty, chunk.payload))
    }
}
