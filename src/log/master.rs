//! Master record
//!
//! The first page of the file holds the log's durable root state:
//!
//! ```text
//! +---------+----------+--------+------------+----------------+
//! | version | checksum | epoch  | checkpoint | zero padding   |
//! | 1B      | 4B LE    | 4B LE  | 8B LE      | to 512 bytes   |
//! +---------+----------+--------+------------+----------------+
//! 0         1          5        9            17             512
//! ```
//!
//! Same checksum discipline as log pages: crc32 over the full 512-byte page
//! with the checksum field zeroed. Without a readable master there is no
//! checkpoint or epoch to recover from, so a corrupt one is fatal at open.

use crate::error::{Result, WalError};
use crate::log::addr::{Address, PAGE_SIZE};

const VERSION_OFFSET: usize = 0;
const CHECKSUM_OFFSET: usize = 1;
const EPOCH_OFFSET: usize = 5;
const CHECKPOINT_OFFSET: usize = 9;

/// Format version stamped on every master record.
pub const MASTER_VERSION_FIRST: u8 = 1;

/// Durable root state: current epoch and the replay checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterRecord {
    pub version: u8,
    pub epoch: u32,
    /// Address of the last byte already reflected in durable host state;
    /// replay resumes at the following address.
    pub checkpoint: Address,
}

impl MasterRecord {
    /// Master record of a freshly created log: nothing checkpointed, so the
    /// checkpoint sits at the last byte of the master page itself.
    pub fn fresh() -> Self {
        Self {
            version: MASTER_VERSION_FIRST,
            epoch: 0,
            checkpoint: Address(PAGE_SIZE as u64 - 1),
        }
    }

    /// Serialize into a full master page image, checksum stamped.
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        buf.fill(0);
        buf[VERSION_OFFSET] = self.version;
        buf[EPOCH_OFFSET..EPOCH_OFFSET + 4].copy_from_slice(&self.epoch.to_le_bytes());
        buf[CHECKPOINT_OFFSET..CHECKPOINT_OFFSET + 8]
            .copy_from_slice(&self.checkpoint.0.to_le_bytes());
        let sum = compute_checksum(buf);
        buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&sum.to_le_bytes());
    }

    /// Validate and decode a master page image.
    pub fn decode(buf: &[u8]) -> Result<MasterRecord> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let stored = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]);
        let actual = compute_checksum(buf);
        if stored != actual {
            return Err(WalError::MasterChecksumMismatch {
                expected: stored,
                actual,
            });
        }
        let version = buf[VERSION_OFFSET];
        if version != MASTER_VERSION_FIRST {
            return Err(WalError::UnsupportedMasterVersion(version));
        }
        let mut checkpoint = [0u8; 8];
        checkpoint.copy_from_slice(&buf[CHECKPOINT_OFFSET..CHECKPOINT_OFFSET + 8]);
        Ok(MasterRecord {
            version,
            epoch: u32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]),
            checkpoint: Address(u64::from_le_bytes(checkpoint)),
        })
    }
}

fn compute_checksum(buf: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf[..CHECKSUM_OFFSET]);
    hasher.update(&[0u8; 4]);
    hasher.update(&buf[EPOCH_OFFSET..]);
    hasher.finalize()
}
