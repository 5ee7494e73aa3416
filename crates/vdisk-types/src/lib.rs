#![forbid(unsafe_code)]
//! Shared layout constants, geometry, and id types for vdisk.
//!
//! Everything on disk is little-endian. The volume is a flat array of
//! 4096-byte blocks: block 0 holds the inode bitmap, block 1 the data
//! bitmap, then the inode table, then the data region.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ── Volume layout constants ─────────────────────────────────────────────────

/// Allocation unit of the filesystem.
pub const BLOCK_SIZE: u32 = 4096;
/// On-disk inode record size.
pub const INODE_SIZE: u32 = 128;
/// Inodes packed into one inode-table block.
pub const INODES_PER_BLOCK: u32 = BLOCK_SIZE / INODE_SIZE;
/// Direct block slots in an inode (2 bytes each, first 112 bytes).
pub const DIRECT_SLOTS: usize = 56;
/// Largest representable file: all direct slots full.
pub const MAX_FILE_SIZE: u32 = DIRECT_SLOTS as u32 * BLOCK_SIZE;

/// Inode field offsets within the 128-byte record.
pub const INODE_SCRATCH_OFFSET: usize = 112;
pub const INODE_SCRATCH_LEN: usize = 8;
pub const INODE_SIZE_OFFSET: usize = 120;
pub const INODE_LINKS_OFFSET: usize = 124;
pub const INODE_FLAGS_OFFSET: usize = 126;

/// Flags bit 0: the inode describes a directory.
pub const FLAG_DIRECTORY: u16 = 1;

/// Directory entry geometry: `u16` inode number + NUL-padded name.
pub const DIR_ENTRY_SIZE: usize = 16;
pub const DIR_NAME_OFFSET: usize = 2;
pub const DIR_NAME_LEN: usize = 14;
/// A directory owns exactly one data block.
pub const DIR_MAX_ENTRIES: u32 = BLOCK_SIZE / DIR_ENTRY_SIZE as u32;

/// Smallest volume: two bitmap blocks plus one inode-table block.
pub const MIN_DISK_SIZE: u64 = 3 * BLOCK_SIZE as u64;
/// Largest volume the data bitmap (and `u16` addressing) can cover.
pub const MAX_DISK_SIZE: u64 = 128 * 1024 * 1024;

/// Backing file used when the caller does not name one.
pub const DEFAULT_DISK_PATH: &str = "vDisk.vdf";

/// One inode block serves this many volume blocks, amortizing one inode
/// per two data blocks of average file.
const INODE_BLOCK_RATIO: u32 = INODES_PER_BLOCK * 2 + 1;

// ── Id newtypes ─────────────────────────────────────────────────────────────

/// Zero-based index into the inode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeNo(pub u16);

/// Zero-based index into the data region (not an absolute block number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockAddr(pub u16);

/// Absolute byte offset within the backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ByteOffset(pub u64);

impl InodeNo {
    /// The root directory always lives at inode 0.
    pub const ROOT: Self = Self(0);
}

impl fmt::Display for InodeNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ByteOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Geometry ────────────────────────────────────────────────────────────────

/// Region layout derived once from the configured volume size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    size_bytes: u64,
    n_blocks: u32,
    n_inode_blocks: u32,
}

impl Geometry {
    /// Derive the layout from a requested size in bytes.
    ///
    /// The size is rounded down to a block multiple and clamped to
    /// [`MIN_DISK_SIZE`, `MAX_DISK_SIZE`].
    #[must_use]
    pub fn new(requested_bytes: u64) -> Self {
        let block = u64::from(BLOCK_SIZE);
        let rounded = requested_bytes - requested_bytes % block;
        let size_bytes = rounded.clamp(MIN_DISK_SIZE, MAX_DISK_SIZE);
        // MAX_DISK_SIZE / BLOCK_SIZE = 32768, fits u32 comfortably.
        #[allow(clippy::cast_possible_truncation)]
        let n_blocks = (size_bytes / block) as u32;
        let n_inode_blocks = ((n_blocks - 2) / INODE_BLOCK_RATIO).max(1);
        Self {
            size_bytes,
            n_blocks,
            n_inode_blocks,
        }
    }

    /// Effective volume size in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Total number of blocks in the volume.
    #[must_use]
    pub fn n_blocks(&self) -> u32 {
        self.n_blocks
    }

    /// Number of blocks holding the inode table.
    #[must_use]
    pub fn n_inode_blocks(&self) -> u32 {
        self.n_inode_blocks
    }

    /// Capacity of the inode table.
    #[must_use]
    pub fn n_inodes(&self) -> u16 {
        // At most 504 inode blocks * 32 = 16128.
        #[allow(clippy::cast_possible_truncation)]
        let n = (self.n_inode_blocks * INODES_PER_BLOCK) as u16;
        n
    }

    /// Number of blocks in the data region.
    #[must_use]
    pub fn n_data_blocks(&self) -> u16 {
        #[allow(clippy::cast_possible_truncation)]
        let n = self.n_blocks.saturating_sub(2 + self.n_inode_blocks) as u16;
        n
    }

    /// Bytes available for file data.
    #[must_use]
    pub fn data_bytes_total(&self) -> u64 {
        u64::from(self.n_data_blocks()) * u64::from(BLOCK_SIZE)
    }

    /// Offset of the inode bitmap block.
    #[must_use]
    pub fn inode_bitmap_offset(&self) -> ByteOffset {
        ByteOffset(0)
    }

    /// Offset of the data bitmap block.
    #[must_use]
    pub fn data_bitmap_offset(&self) -> ByteOffset {
        ByteOffset(u64::from(BLOCK_SIZE))
    }

    /// Offset of inode `ino` within the inode table.
    #[must_use]
    pub fn inode_offset(&self, ino: InodeNo) -> ByteOffset {
        ByteOffset(2 * u64::from(BLOCK_SIZE) + u64::from(ino.0) * u64::from(INODE_SIZE))
    }

    /// Offset of data-region block `addr`.
    #[must_use]
    pub fn data_block_offset(&self, addr: BlockAddr) -> ByteOffset {
        ByteOffset(u64::from(2 + self.n_inode_blocks + u32::from(addr.0)) * u64::from(BLOCK_SIZE))
    }
}

// ── Little-endian field helpers ─────────────────────────────────────────────

/// Failure to decode a fixed on-disk record from a byte buffer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
}

/// Borrow `len` bytes at `offset`, or report how much was there.
#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: 0,
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

// ── Name codec ──────────────────────────────────────────────────────────────

/// Fix a name into the 14-byte NUL-padded on-disk form, truncating as
/// needed. Names are raw byte sequences; no Unicode handling.
#[must_use]
pub fn encode_name(name: &[u8]) -> [u8; DIR_NAME_LEN] {
    let mut out = [0_u8; DIR_NAME_LEN];
    let len = name.len().min(DIR_NAME_LEN);
    out[..len].copy_from_slice(&name[..len]);
    out
}

/// The meaningful prefix of a stored name: everything before the first NUL.
#[must_use]
pub fn trim_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}

/// Compare a stored (NUL-padded) name against a query, truncating the
/// query to the storable length first.
#[must_use]
pub fn name_matches(stored: &[u8], query: &[u8]) -> bool {
    let query = &query[..query.len().min(DIR_NAME_LEN)];
    trim_nul(stored) == query
}
