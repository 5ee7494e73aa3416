#![forbid(unsafe_code)]
//! Inode and data-block allocation.
//!
//! Two independent first-fit allocators over two fixed bitmap blocks:
//! block 0 tracks inodes, block 1 tracks data blocks. Bits are
//! LSB-first within each byte. A bit is set *before* the referencing
//! pointer is written and cleared *after* the last reference is gone,
//! so a bitmap read on a later run never sees a dangling reference.

use tracing::{debug, trace};
use vdisk_block::ByteDevice;
use vdisk_error::{Result, VdiskError};
use vdisk_types::{BLOCK_SIZE, BlockAddr, ByteOffset, Geometry, InodeNo};

// ── Raw bitmap operations ───────────────────────────────────────────────────

/// Get bit `idx` from a bitmap byte slice.
#[must_use]
pub fn bitmap_get(bitmap: &[u8], idx: u32) -> bool {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx >= bitmap.len() {
        return false;
    }
    (bitmap[byte_idx] >> bit_idx) & 1 == 1
}

/// Set bit `idx` in a bitmap byte slice.
pub fn bitmap_set(bitmap: &mut [u8], idx: u32) {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx < bitmap.len() {
        bitmap[byte_idx] |= 1 << bit_idx;
    }
}

/// Clear bit `idx` in a bitmap byte slice.
pub fn bitmap_clear(bitmap: &mut [u8], idx: u32) {
    let byte_idx = (idx / 8) as usize;
    let bit_idx = idx % 8;
    if byte_idx < bitmap.len() {
        bitmap[byte_idx] &= !(1 << bit_idx);
    }
}

/// Count set (in-use) bits in the first `count` bits of `bitmap`.
#[must_use]
pub fn bitmap_count_set(bitmap: &[u8], count: u32) -> u32 {
    let full_bytes = (count / 8) as usize;
    let remainder = count % 8;
    let mut used = 0_u32;

    for &byte in bitmap.iter().take(full_bytes) {
        used += byte.count_ones();
    }

    if remainder > 0 && full_bytes < bitmap.len() {
        let byte = bitmap[full_bytes];
        for bit in 0..remainder {
            if (byte >> bit) & 1 == 1 {
                used += 1;
            }
        }
    }

    used
}

/// Find the smallest clear (free) bit in the first `count` bits.
#[must_use]
pub fn bitmap_find_clear(bitmap: &[u8], count: u32) -> Option<u32> {
    (0..count).find(|&idx| !bitmap_get(bitmap, idx))
}

// ── On-device allocators ────────────────────────────────────────────────────

const BITMAP_BYTES: usize = BLOCK_SIZE as usize;

fn read_bitmap(dev: &dyn ByteDevice, offset: ByteOffset) -> Result<Vec<u8>> {
    let mut buf = vec![0_u8; BITMAP_BYTES];
    dev.read_exact_at(offset, &mut buf)?;
    Ok(buf)
}

fn flip_bit(dev: &dyn ByteDevice, base: ByteOffset, idx: u32, in_use: bool) -> Result<()> {
    let byte_offset = ByteOffset(base.0 + u64::from(idx / 8));
    let mut byte = [0_u8; 1];
    dev.read_exact_at(byte_offset, &mut byte)?;
    if in_use {
        byte[0] |= 1 << (idx % 8);
    } else {
        byte[0] &= !(1 << (idx % 8));
    }
    dev.write_all_at(byte_offset, &byte)
}

/// Allocate the smallest free inode and mark it used.
pub fn alloc_inode(dev: &dyn ByteDevice, geo: &Geometry) -> Result<InodeNo> {
    let bitmap = read_bitmap(dev, geo.inode_bitmap_offset())?;
    let idx =
        bitmap_find_clear(&bitmap, u32::from(geo.n_inodes())).ok_or(VdiskError::NoFreeInode)?;
    flip_bit(dev, geo.inode_bitmap_offset(), idx, true)?;
    debug!(target: "vdisk::alloc", event = "alloc_inode", ino = idx);
    // n_inodes() fits u16, so idx does too.
    #[allow(clippy::cast_possible_truncation)]
    Ok(InodeNo(idx as u16))
}

/// Allocate the smallest free data block and mark it used.
pub fn alloc_block(dev: &dyn ByteDevice, geo: &Geometry) -> Result<BlockAddr> {
    let bitmap = read_bitmap(dev, geo.data_bitmap_offset())?;
    let idx = bitmap_find_clear(&bitmap, u32::from(geo.n_data_blocks()))
        .ok_or(VdiskError::NoFreeBlock)?;
    flip_bit(dev, geo.data_bitmap_offset(), idx, true)?;
    debug!(target: "vdisk::alloc", event = "alloc_block", block = idx);
    #[allow(clippy::cast_possible_truncation)]
    Ok(BlockAddr(idx as u16))
}

/// Return an inode to the free pool.
pub fn free_inode(dev: &dyn ByteDevice, geo: &Geometry, ino: InodeNo) -> Result<()> {
    trace!(target: "vdisk::alloc", event = "free_inode", ino = ino.0);
    flip_bit(dev, geo.inode_bitmap_offset(), u32::from(ino.0), false)
}

/// Return a data block to the free pool.
pub fn free_block(dev: &dyn ByteDevice, geo: &Geometry, addr: BlockAddr) -> Result<()> {
    trace!(target: "vdisk::alloc", event = "free_block", block = addr.0);
    flip_bit(dev, geo.data_bitmap_offset(), u32::from(addr.0), false)
}

/// Whether an inode's bitmap bit is set.
pub fn inode_in_use(dev: &dyn ByteDevice, geo: &Geometry, ino: InodeNo) -> Result<bool> {
    let byte_offset = ByteOffset(geo.inode_bitmap_offset().0 + u64::from(ino.0 / 8));
    let mut byte = [0_u8; 1];
    dev.read_exact_at(byte_offset, &mut byte)?;
    Ok((byte[0] >> (ino.0 % 8)) & 1 == 1)
}

/// Number of inodes currently marked in use.
pub fn used_inodes(dev: &dyn ByteDevice, geo: &Geometry) -> Result<u32> {
    let bitmap = read_bitmap(dev, geo.inode_bitmap_offset())?;
    Ok(bitmap_count_set(&bitmap, u32::from(geo.n_inodes())))
}

/// Number of data blocks currently marked in use.
pub fn used_blocks(dev: &dyn ByteDevice, geo: &Geometry) -> Result<u32> {
    let bitmap = read_bitmap(dev, geo.data_bitmap_offset())?;
    Ok(bitmap_count_set(&bitmap, u32::from(geo.n_data_blocks())))
}

/// Whether the volume already carries a filesystem.
///
/// Inode bitmap bit 0 is the root directory; a set bit means a prior
/// run formatted this backing file and initialization must not run
/// again.
pub fn is_formatted(dev: &dyn ByteDevice, geo: &Geometry) -> Result<bool> {
    inode_in_use(dev, geo, InodeNo::ROOT)
}

/// Zero both bitmap blocks (fresh-volume initialization).
pub fn clear_bitmaps(dev: &dyn ByteDevice, geo: &Geometry) -> Result<()> {
    debug!(target: "vdisk::alloc", event = "clear_bitmaps");
    let zeros = vec![0_u8; BITMAP_BYTES];
    dev.write_all_at(geo.inode_bitmap_offset(), &zeros)?;
    dev.write_all_at(geo.data_bitmap_offset(), &zeros)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdisk_block::MemByteDevice;

    fn small_geo() -> Geometry {
        // 16 blocks: 1 inode block (32 inodes), 13 data blocks.
        Geometry::new(65536)
    }

    fn fresh_dev(geo: &Geometry) -> MemByteDevice {
        let dev = MemByteDevice::new(geo.size_bytes() as usize);
        clear_bitmaps(&dev, geo).expect("clear");
        dev
    }

    #[test]
    fn raw_bitmap_ops() {
        let mut bm = vec![0_u8; 8];
        assert!(!bitmap_get(&bm, 0));
        bitmap_set(&mut bm, 0);
        bitmap_set(&mut bm, 9);
        assert!(bitmap_get(&bm, 0));
        assert!(bitmap_get(&bm, 9));
        assert_eq!(bm[0], 0b0000_0001);
        assert_eq!(bm[1], 0b0000_0010);
        assert_eq!(bitmap_count_set(&bm, 64), 2);

        bitmap_clear(&mut bm, 0);
        assert!(!bitmap_get(&bm, 0));
        assert_eq!(bitmap_find_clear(&bm, 64), Some(0));

        bitmap_set(&mut bm, 0);
        assert_eq!(bitmap_find_clear(&bm, 64), Some(1));
    }

    #[test]
    fn find_clear_respects_count_limit() {
        let bm = vec![0xFF_u8; 2];
        assert_eq!(bitmap_find_clear(&bm, 16), None);
        // Bits past the slice read as free but count caps the scan.
        assert_eq!(bitmap_find_clear(&bm, 17), Some(16));
    }

    #[test]
    fn count_set_partial_byte() {
        let bm = vec![0b1111_1111_u8];
        assert_eq!(bitmap_count_set(&bm, 3), 3);
        assert_eq!(bitmap_count_set(&bm, 8), 8);
    }

    #[test]
    fn alloc_is_first_fit() {
        let geo = small_geo();
        let dev = fresh_dev(&geo);

        assert_eq!(alloc_inode(&dev, &geo).expect("alloc"), InodeNo(0));
        assert_eq!(alloc_inode(&dev, &geo).expect("alloc"), InodeNo(1));
        assert_eq!(alloc_block(&dev, &geo).expect("alloc"), BlockAddr(0));
        assert_eq!(alloc_block(&dev, &geo).expect("alloc"), BlockAddr(1));

        free_inode(&dev, &geo, InodeNo(0)).expect("free");
        assert_eq!(alloc_inode(&dev, &geo).expect("alloc"), InodeNo(0));

        free_block(&dev, &geo, BlockAddr(0)).expect("free");
        assert_eq!(alloc_block(&dev, &geo).expect("alloc"), BlockAddr(0));
    }

    #[test]
    fn inode_exhaustion() {
        let geo = small_geo();
        let dev = fresh_dev(&geo);

        for i in 0..geo.n_inodes() {
            assert_eq!(alloc_inode(&dev, &geo).expect("alloc"), InodeNo(i));
        }
        assert!(matches!(
            alloc_inode(&dev, &geo),
            Err(VdiskError::NoFreeInode)
        ));
        assert_eq!(used_inodes(&dev, &geo).expect("count"), 32);
    }

    #[test]
    fn block_exhaustion() {
        let geo = small_geo();
        let dev = fresh_dev(&geo);

        for _ in 0..geo.n_data_blocks() {
            alloc_block(&dev, &geo).expect("alloc");
        }
        assert!(matches!(
            alloc_block(&dev, &geo),
            Err(VdiskError::NoFreeBlock)
        ));
        assert_eq!(used_blocks(&dev, &geo).expect("count"), 13);
    }

    #[test]
    fn format_probe_follows_root_bit() {
        let geo = small_geo();
        let dev = fresh_dev(&geo);

        assert!(!is_formatted(&dev, &geo).expect("probe"));
        let root = alloc_inode(&dev, &geo).expect("alloc");
        assert_eq!(root, InodeNo::ROOT);
        assert!(is_formatted(&dev, &geo).expect("probe"));

        clear_bitmaps(&dev, &geo).expect("clear");
        assert!(!is_formatted(&dev, &geo).expect("probe"));
    }

    #[test]
    fn free_is_idempotent() {
        let geo = small_geo();
        let dev = fresh_dev(&geo);

        let addr = alloc_block(&dev, &geo).expect("alloc");
        free_block(&dev, &geo, addr).expect("free");
        free_block(&dev, &geo, addr).expect("free again");
        assert_eq!(used_blocks(&dev, &geo).expect("count"), 0);
    }
}
