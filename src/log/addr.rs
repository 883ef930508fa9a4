//! Log address arithmetic
//!
//! Three coordinate systems describe the same byte stream:
//!
//! ```text
//! Address      0           512          1024         1536
//!              |  master   | hdr | body | hdr | body | ...
//! PageNum      |____ 0 ____|_____ 1 ____|_____ 2 ____|
//! DataOffset    (0..=493)    494..=987    988..=1481
//! ```
//!
//! An `Address` is a byte position in the log and doubles as the absolute
//! file offset. A `DataOffset` addresses the compacted payload stream with
//! page headers removed. Page 0 holds the master record, so its data-offset
//! range `0..=493` exists arithmetically but never holds payload: a fresh
//! log's cursor starts at data offset 493 (address 511) and the first real
//! byte lands at data offset 494 (address 530, the first body byte of
//! page 1).

use std::ops::Add;

/// Pages are `1 << PAGE_SIZE_LOG` bytes.
pub const PAGE_SIZE_LOG: u32 = 9;

/// Size of one page in bytes.
pub const PAGE_SIZE: usize = 1 << PAGE_SIZE_LOG; // 512

/// Mask extracting the within-page offset from an address.
pub const WITHIN_PAGE_MASK: u64 = PAGE_SIZE as u64 - 1;

/// Size of the page header in bytes.
pub const PAGE_HEADER_SIZE: usize = 18;

/// Payload capacity of one page body.
pub const DATA_PER_PAGE: usize = PAGE_SIZE - PAGE_HEADER_SIZE; // 494

// =============================================================================
// Coordinate Types
// =============================================================================

/// Byte position in the log; equals the absolute file offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub u64);

/// Index of a fixed-size page (`address >> 9`). Page 0 is the master page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageNum(pub u64);

/// Position in the compacted payload stream, page headers removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataOffset(pub u64);

// =============================================================================
// Conversions
// =============================================================================

impl Address {
    /// Page containing this address.
    pub fn page(self) -> PageNum {
        PageNum(self.0 >> PAGE_SIZE_LOG)
    }

    /// Offset of this address within its page (`0..512`).
    pub fn within_page(self) -> u64 {
        self.0 & WITHIN_PAGE_MASK
    }

    /// Map a body address into the compacted payload stream.
    ///
    /// Only meaningful for addresses inside a page body (never a header
    /// byte); the conversion is a bijection over those addresses.
    pub fn to_data_offset(self) -> DataOffset {
        debug_assert!(self.within_page() >= PAGE_HEADER_SIZE as u64);
        let page = self.page().0;
        DataOffset(page * DATA_PER_PAGE as u64 + self.within_page() - PAGE_HEADER_SIZE as u64)
    }
}

impl DataOffset {
    /// Page whose body holds this offset.
    pub fn page(self) -> PageNum {
        PageNum(self.0 / DATA_PER_PAGE as u64)
    }

    /// Offset of this position within its page body (`0..494`).
    pub fn within_body(self) -> usize {
        (self.0 % DATA_PER_PAGE as u64) as usize
    }

    /// Map back into the headered address space.
    pub fn to_address(self) -> Address {
        let page = self.0 / DATA_PER_PAGE as u64;
        let within = self.0 % DATA_PER_PAGE as u64;
        Address((page << PAGE_SIZE_LOG) + PAGE_HEADER_SIZE as u64 + within)
    }
}

impl PageNum {
    /// Address of the first byte of this page (its header).
    pub fn base_address(self) -> Address {
        Address(self.0 << PAGE_SIZE_LOG)
    }

    /// Address of the last byte of this page.
    pub fn end_address(self) -> Address {
        Address((self.0 << PAGE_SIZE_LOG) + WITHIN_PAGE_MASK)
    }

    /// Address of the first body byte of this page.
    pub fn first_data_address(self) -> Address {
        Address((self.0 << PAGE_SIZE_LOG) + PAGE_HEADER_SIZE as u64)
    }

    /// Data offset of the first body byte of this page.
    pub fn first_data_offset(self) -> DataOffset {
        DataOffset(self.0 * DATA_PER_PAGE as u64)
    }

    /// Data offset of the last body byte of this page.
    pub fn last_data_offset(self) -> DataOffset {
        DataOffset((self.0 + 1) * DATA_PER_PAGE as u64 - 1)
    }

    /// Absolute file offset of this page.
    pub fn file_offset(self) -> u64 {
        self.0 << PAGE_SIZE_LOG
    }
}

impl Add<u64> for Address {
    type Output = Address;

    fn add(self, rhs: u64) -> Address {
        Address(self.0 + rhs)
    }
}

impl Add<u64> for DataOffset {
    type Output = DataOffset;

    fn add(self, rhs: u64) -> DataOffset {
        DataOffset(self.0 + rhs)
    }
}
