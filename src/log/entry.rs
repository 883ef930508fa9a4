//! Entry chunk codec
//!
//! ## Wire Format
//!
//! Headered chunk (the first chunk of a logical entry):
//! ```text
//! +------+----------+~~~~~~~~~~~~~~~~+
//! | type | length   | payload        |
//! | 1B   | 2B LE    | up to page end |
//! +------+----------+~~~~~~~~~~~~~~~~+
//! ```
//!
//! The length field declares the logical entry's FULL length, once. When an
//! entry overflows its page, every following page receives raw continuation
//! bytes with no framing at all; a reader tracks the bytes still owed from
//! the initiating header. Type 0 (`None`) is the end-of-page sentinel: no
//! length, no payload, the rest of the body is zero.

use crate::error::{Result, WalError};
use crate::fs::ByteSource;

/// Size of a chunk header: type (1B) + length (2B).
pub const ENTRY_HEADER_SIZE: usize = 3;

/// Largest logical entry the 2-byte length field can declare.
pub const MAX_ENTRY_LEN: usize = u16::MAX as usize; // 65535

// =============================================================================
// Entry Type
// =============================================================================

/// Kind of record found at an entry boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryType {
    /// End-of-page sentinel: no more entries in this page.
    None = 0,
    /// A logical record; may continue header-less into following pages.
    Normal = 1,
}

impl EntryType {
    pub fn from_byte(byte: u8) -> Result<EntryType> {
        match byte {
            0 => Ok(EntryType::None),
            1 => Ok(EntryType::Normal),
            other => Err(WalError::UnknownEntryType(other)),
        }
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Write a headered chunk: the 3-byte header declaring `total_len`, then
/// `chunk_len` payload bytes pulled from `src`.
///
/// `chunk_len` is the in-page share chosen by the splitter and may be less
/// than `total_len` when the entry continues into following pages. Returns
/// the bytes written (`3 + chunk_len`).
pub fn write_headered_chunk(
    buf: &mut [u8],
    ty: EntryType,
    total_len: usize,
    src: &mut dyn ByteSource,
    chunk_len: usize,
) -> Result<usize> {
    if total_len > MAX_ENTRY_LEN {
        // admission control rejects these before the codec ever sees them
        return Err(WalError::FramingViolation { len: total_len });
    }
    debug_assert!(chunk_len <= total_len);
    buf[0] = ty as u8;
    buf[1..ENTRY_HEADER_SIZE].copy_from_slice(&(total_len as u16).to_le_bytes());
    let written = write_continuation_chunk(&mut buf[ENTRY_HEADER_SIZE..], src, chunk_len);
    Ok(ENTRY_HEADER_SIZE + written)
}

/// Write `chunk_len` raw payload bytes from `src`, no framing. Returns
/// `chunk_len`.
pub fn write_continuation_chunk(
    buf: &mut [u8],
    src: &mut dyn ByteSource,
    chunk_len: usize,
) -> usize {
    let mut filled = 0;
    while filled < chunk_len {
        let piece = src.read(chunk_len - filled);
        buf[filled..filled + piece.len()].copy_from_slice(piece);
        filled += piece.len();
    }
    chunk_len
}

// =============================================================================
// Decoding
// =============================================================================

/// One decoded chunk.
#[derive(Debug)]
pub struct Chunk<'a> {
    pub ty: EntryType,
    /// Full logical length declared in the header (0 for `None`).
    pub declared_len: usize,
    /// Payload bytes present in THIS buffer; shorter than `declared_len`
    /// when the entry continues past the buffer end.
    pub payload: &'a [u8],
    /// Bytes this chunk occupies in the buffer.
    pub consumed: usize,
}

/// Decode the chunk starting at `buf[0]`.
///
/// `buf` must reach at least to the end of the page body; a `Normal` header
/// is never split across pages, so 3 header bytes are always available
/// (callers stop before the final 3 body bytes, which a writer skips).
pub fn read_chunk(buf: &[u8]) -> Result<Chunk<'_>> {
    let ty = EntryType::from_byte(buf[0])?;
    if ty == EntryType::None {
        return Ok(Chunk {
            ty,
            declared_len: 0,
            payload: &[],
            consumed: 1,
        });
    }
    debug_assert!(buf.len() >= ENTRY_HEADER_SIZE);
    let declared = u16::from_le_bytes([buf[1], buf[2]]) as usize;
    let avail = declared.min(buf.len().saturating_sub(ENTRY_HEADER_SIZE));
    Ok(Chunk {
        ty,
        declared_len: declared,
        payload: &buf[ENTRY_HEADER_SIZE..ENTRY_HEADER_SIZE + avail],
        consumed: ENTRY_HEADER_SIZE + avail,
    })
}
