//! Tests for the master record
//!
//! These tests verify:
//! - The fresh-log master record
//! - Encode/decode round trips and the on-disk byte layout
//! - Corruption detection

use pagewal::error::WalError;
use pagewal::log::addr::{Address, PAGE_SIZE};
use pagewal::log::master::{MasterRecord, MASTER_VERSION_FIRST};

// =============================================================================
// Fresh Record
// =============================================================================

#[test]
fn test_fresh_master_record() {
    let master = MasterRecord::fresh();
    assert_eq!(master.version, MASTER_VERSION_FIRST);
    assert_eq!(master.epoch, 0);
    assert_eq!(master.checkpoint, Address(511));
}

// =============================================================================
// Round Trips
// =============================================================================

#[test]
fn test_encode_decode_round_trip() {
    let master = MasterRecord {
        version: MASTER_VERSION_FIRST,
        epoch: 7,
        checkpoint: Address(123_456),
    };

    let mut buf = vec![0u8; PAGE_SIZE];
    master.encode_into(&mut buf);
    let decoded = MasterRecord::decode(&buf).unwrap();

    assert_eq!(decoded, master);
}

#[test]
fn test_byte_layout() {
    let master = MasterRecord {
        version: MASTER_VERSION_FIRST,
        epoch: 0x01020304,
        checkpoint: Address(0x0506_0708_090A_0B0C),
    };

    let mut buf = vec![0u8; PAGE_SIZE];
    master.encode_into(&mut buf);

    assert_eq!(buf[0], 1);
    assert_eq!(&buf[5..9], &0x01020304u32.to_le_bytes());
    assert_eq!(&buf[9..17], &0x0506_0708_090A_0B0Cu64.to_le_bytes());
    assert!(buf[17..].iter().all(|b| *b == 0));

    // checksum field tracks the payload
    let mut other = vec![0u8; PAGE_SIZE];
    MasterRecord { epoch: 0x01020305, ..master }.encode_into(&mut other);
    assert_ne!(&buf[1..5], &other[1..5]);
}

#[test]
fn test_encode_overwrites_previous_content() {
    let mut buf = vec![0xAA; PAGE_SIZE];
    MasterRecord::fresh().encode_into(&mut buf);
    let decoded = MasterRecord::decode(&buf).unwrap();
    assert_eq!(decoded, MasterRecord::fresh());
}

// =============================================================================
// Corruption
// =============================================================================

#[test]
fn test_decode_rejects_corruption() {
    let mut buf = vec![0u8; PAGE_SIZE];
    MasterRecord::fresh().encode_into(&mut buf);
    buf[9] ^= 0xFF;

    let err = MasterRecord::decode(&buf).unwrap_err();
    assert!(matches!(err, WalError::MasterChecksumMismatch { .. }));
}

#[test]
fn test_decode_rejects_all_zero_page() {
    let buf = vec![0u8; PAGE_SIZE];
    assert!(MasterRecord::decode(&buf).is_err());
}
