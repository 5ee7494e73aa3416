#![forbid(unsafe_code)]
//! Inode records.
//!
//! Each inode is a fixed 128-byte record in the inode table: a 56-slot
//! direct block table (2 bytes per address), 8 reserved bytes, then
//! size, link count, and flags. Whole-record `read_inode`/`write_inode`
//! pair with narrow field writers for the hot paths that patch a single
//! field in place.

use tracing::trace;
use vdisk_block::ByteDevice;
use vdisk_error::Result;
use vdisk_types::{
    BLOCK_SIZE, BlockAddr, ByteOffset, DIRECT_SLOTS, FLAG_DIRECTORY, Geometry,
    INODE_FLAGS_OFFSET, INODE_LINKS_OFFSET, INODE_SCRATCH_LEN, INODE_SCRATCH_OFFSET, INODE_SIZE,
    INODE_SIZE_OFFSET, InodeNo, ParseError, ensure_slice, read_le_u16, read_le_u32,
};

const RECORD_LEN: usize = INODE_SIZE as usize;

/// Decoded 128-byte inode record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    /// Direct block table; only the first `block_count()` slots are live.
    pub direct: [u16; DIRECT_SLOTS],
    /// Reserved bytes, preserved verbatim across round trips.
    pub scratch: [u8; INODE_SCRATCH_LEN],
    /// File: byte length. Directory: entry bytes in use.
    pub size: u32,
    pub link_count: u16,
    pub flags: u16,
}

impl Inode {
    /// A fresh regular-file inode: no blocks, no links, size 0.
    #[must_use]
    pub fn empty_file() -> Self {
        Self {
            direct: [0; DIRECT_SLOTS],
            scratch: [0; INODE_SCRATCH_LEN],
            size: 0,
            link_count: 0,
            flags: 0,
        }
    }

    /// A fresh directory inode owning `block` at slot 0.
    #[must_use]
    pub fn empty_dir(block: BlockAddr) -> Self {
        let mut direct = [0; DIRECT_SLOTS];
        direct[0] = block.0;
        Self {
            direct,
            scratch: [0; INODE_SCRATCH_LEN],
            size: 0,
            link_count: 0,
            flags: FLAG_DIRECTORY,
        }
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.flags & FLAG_DIRECTORY != 0
    }

    /// Number of live direct slots: `ceil(size / BLOCK_SIZE)`.
    #[must_use]
    pub fn block_count(&self) -> u32 {
        self.size.div_ceil(BLOCK_SIZE)
    }

    /// Addresses of the blocks this inode references.
    #[must_use]
    pub fn referenced_blocks(&self) -> Vec<BlockAddr> {
        self.direct
            .iter()
            .take(self.block_count() as usize)
            .map(|raw| BlockAddr(*raw))
            .collect()
    }

    /// Decode a raw 128-byte record.
    pub fn parse(raw: &[u8]) -> std::result::Result<Self, ParseError> {
        let mut direct = [0_u16; DIRECT_SLOTS];
        for (slot, value) in direct.iter_mut().enumerate() {
            *value = read_le_u16(raw, slot * 2)?;
        }
        let mut scratch = [0_u8; INODE_SCRATCH_LEN];
        scratch.copy_from_slice(ensure_slice(raw, INODE_SCRATCH_OFFSET, INODE_SCRATCH_LEN)?);
        Ok(Self {
            direct,
            scratch,
            size: read_le_u32(raw, INODE_SIZE_OFFSET)?,
            link_count: read_le_u16(raw, INODE_LINKS_OFFSET)?,
            flags: read_le_u16(raw, INODE_FLAGS_OFFSET)?,
        })
    }

    /// Encode into the raw 128-byte on-disk form.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut raw = [0_u8; RECORD_LEN];
        for (slot, value) in self.direct.iter().enumerate() {
            raw[slot * 2..slot * 2 + 2].copy_from_slice(&value.to_le_bytes());
        }
        raw[INODE_SCRATCH_OFFSET..INODE_SCRATCH_OFFSET + INODE_SCRATCH_LEN]
            .copy_from_slice(&self.scratch);
        raw[INODE_SIZE_OFFSET..INODE_SIZE_OFFSET + 4].copy_from_slice(&self.size.to_le_bytes());
        raw[INODE_LINKS_OFFSET..INODE_LINKS_OFFSET + 2]
            .copy_from_slice(&self.link_count.to_le_bytes());
        raw[INODE_FLAGS_OFFSET..INODE_FLAGS_OFFSET + 2]
            .copy_from_slice(&self.flags.to_le_bytes());
        raw
    }
}

// ── Whole-record I/O ────────────────────────────────────────────────────────

/// Read and decode an inode from the table.
pub fn read_inode(dev: &dyn ByteDevice, geo: &Geometry, ino: InodeNo) -> Result<Inode> {
    let mut raw = [0_u8; RECORD_LEN];
    dev.read_exact_at(geo.inode_offset(ino), &mut raw)?;
    Ok(Inode::parse(&raw)?)
}

/// Encode and write a full inode record.
pub fn write_inode(dev: &dyn ByteDevice, geo: &Geometry, ino: InodeNo, inode: &Inode) -> Result<()> {
    trace!(
        target: "vdisk::inode",
        event = "write_inode",
        ino = ino.0,
        size = inode.size,
        links = inode.link_count,
        dir = inode.is_directory()
    );
    dev.write_all_at(geo.inode_offset(ino), &inode.to_bytes())
}

// ── Narrow field access ─────────────────────────────────────────────────────

fn field_offset(geo: &Geometry, ino: InodeNo, field: usize) -> ByteOffset {
    ByteOffset(geo.inode_offset(ino).0 + field as u64)
}

pub fn read_size(dev: &dyn ByteDevice, geo: &Geometry, ino: InodeNo) -> Result<u32> {
    let mut raw = [0_u8; 4];
    dev.read_exact_at(field_offset(geo, ino, INODE_SIZE_OFFSET), &mut raw)?;
    Ok(u32::from_le_bytes(raw))
}

pub fn write_size(dev: &dyn ByteDevice, geo: &Geometry, ino: InodeNo, size: u32) -> Result<()> {
    dev.write_all_at(field_offset(geo, ino, INODE_SIZE_OFFSET), &size.to_le_bytes())
}

pub fn read_link_count(dev: &dyn ByteDevice, geo: &Geometry, ino: InodeNo) -> Result<u16> {
    let mut raw = [0_u8; 2];
    dev.read_exact_at(field_offset(geo, ino, INODE_LINKS_OFFSET), &mut raw)?;
    Ok(u16::from_le_bytes(raw))
}

pub fn write_link_count(
    dev: &dyn ByteDevice,
    geo: &Geometry,
    ino: InodeNo,
    links: u16,
) -> Result<()> {
    dev.write_all_at(
        field_offset(geo, ino, INODE_LINKS_OFFSET),
        &links.to_le_bytes(),
    )
}

/// Read the block address stored in direct slot `slot`.
pub fn read_block_slot(
    dev: &dyn ByteDevice,
    geo: &Geometry,
    ino: InodeNo,
    slot: usize,
) -> Result<BlockAddr> {
    debug_assert!(slot < DIRECT_SLOTS);
    let mut raw = [0_u8; 2];
    dev.read_exact_at(field_offset(geo, ino, slot * 2), &mut raw)?;
    Ok(BlockAddr(u16::from_le_bytes(raw)))
}

/// Store a block address into direct slot `slot`.
pub fn write_block_slot(
    dev: &dyn ByteDevice,
    geo: &Geometry,
    ino: InodeNo,
    slot: usize,
    addr: BlockAddr,
) -> Result<()> {
    debug_assert!(slot < DIRECT_SLOTS);
    dev.write_all_at(field_offset(geo, ino, slot * 2), &addr.0.to_le_bytes())
}
