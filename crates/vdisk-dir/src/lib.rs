#![forbid(unsafe_code)]
//! Directory operations.
//!
//! A directory is an inode with the directory flag set and a single
//! data block referenced at slot 0. The block holds a dense array of
//! 16-byte entries: a `u16` inode number followed by a 14-byte
//! NUL-padded name. The inode's size field tracks `entries * 16`;
//! deletion shifts later entries left so there are no tombstones.

use tracing::{debug, trace};
use vdisk_block::ByteDevice;
use vdisk_error::{Result, VdiskError};
use vdisk_types::{
    BlockAddr, ByteOffset, DIR_ENTRY_SIZE, DIR_MAX_ENTRIES, DIR_NAME_LEN, DIR_NAME_OFFSET,
    Geometry, InodeNo, encode_name, name_matches, read_le_u16, trim_nul,
};

/// One decoded directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: InodeNo,
    name: [u8; DIR_NAME_LEN],
}

impl DirEntry {
    /// The stored name without its NUL padding.
    #[must_use]
    pub fn name_bytes(&self) -> &[u8] {
        trim_nul(&self.name)
    }

    /// Display form of the name; invalid UTF-8 is replaced, not lost.
    #[must_use]
    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(self.name_bytes()).into_owned()
    }
}

// ── Directory header access ─────────────────────────────────────────────────

/// Byte offset of entry `index` inside the directory's data block.
fn entry_offset(geo: &Geometry, block: BlockAddr, index: u32) -> ByteOffset {
    ByteOffset(geo.data_block_offset(block).0 + u64::from(index) * DIR_ENTRY_SIZE as u64)
}

/// The data block a directory keeps its entries in (direct slot 0).
fn dir_block(dev: &dyn ByteDevice, geo: &Geometry, dir: InodeNo) -> Result<BlockAddr> {
    vdisk_inode::read_block_slot(dev, geo, dir, 0)
}

/// Number of entries currently stored.
pub fn entry_count(dev: &dyn ByteDevice, geo: &Geometry, dir: InodeNo) -> Result<u32> {
    Ok(vdisk_inode::read_size(dev, geo, dir)? / DIR_ENTRY_SIZE as u32)
}

/// Whether one more entry fits in the directory's single block.
pub fn has_room(dev: &dyn ByteDevice, geo: &Geometry, dir: InodeNo) -> Result<bool> {
    Ok(entry_count(dev, geo, dir)? < DIR_MAX_ENTRIES)
}

// ── Creation ────────────────────────────────────────────────────────────────

/// Allocate and persist an empty directory: a fresh inode whose slot 0
/// references a fresh data block, directory flag set, size and link
/// count zero. The caller wires up `.`, `..`, and the parent entry.
pub fn create_empty_dir(dev: &dyn ByteDevice, geo: &Geometry) -> Result<InodeNo> {
    let ino = vdisk_alloc::alloc_inode(dev, geo)?;
    let block = match vdisk_alloc::alloc_block(dev, geo) {
        Ok(block) => block,
        Err(err) => {
            vdisk_alloc::free_inode(dev, geo, ino)?;
            return Err(err);
        }
    };
    vdisk_inode::write_inode(dev, geo, ino, &vdisk_inode::Inode::empty_dir(block))?;
    debug!(
        target: "vdisk::dir",
        event = "create_dir",
        ino = ino.0,
        block = block.0
    );
    Ok(ino)
}

// ── Entry maintenance ───────────────────────────────────────────────────────

/// Append an entry for `child` named `name`, bumping the child's link
/// count and the directory size.
pub fn add_entry(
    dev: &dyn ByteDevice,
    geo: &Geometry,
    dir: InodeNo,
    child: InodeNo,
    name: &[u8],
) -> Result<()> {
    let size = vdisk_inode::read_size(dev, geo, dir)?;
    let count = size / DIR_ENTRY_SIZE as u32;
    if count >= DIR_MAX_ENTRIES {
        return Err(VdiskError::DirectoryFull);
    }
    let block = dir_block(dev, geo, dir)?;

    let mut raw = [0_u8; DIR_ENTRY_SIZE];
    raw[..2].copy_from_slice(&child.0.to_le_bytes());
    raw[DIR_NAME_OFFSET..].copy_from_slice(&encode_name(name));
    dev.write_all_at(entry_offset(geo, block, count), &raw)?;

    let links = vdisk_inode::read_link_count(dev, geo, child)?;
    vdisk_inode::write_link_count(dev, geo, child, links + 1)?;
    vdisk_inode::write_size(dev, geo, dir, size + DIR_ENTRY_SIZE as u32)?;
    trace!(
        target: "vdisk::dir",
        event = "add_entry",
        dir = dir.0,
        child = child.0,
        slot = count
    );
    Ok(())
}

/// Remove the first entry named `name`, shifting later entries left.
///
/// Link counts and bitmaps are left to the caller, which sequences the
/// unlink steps.
pub fn remove_entry(
    dev: &dyn ByteDevice,
    geo: &Geometry,
    dir: InodeNo,
    name: &[u8],
) -> Result<()> {
    let size = vdisk_inode::read_size(dev, geo, dir)? as usize;
    let block = dir_block(dev, geo, dir)?;

    let mut used = vec![0_u8; size];
    dev.read_exact_at(geo.data_block_offset(block), &mut used)?;

    let index = used
        .chunks_exact(DIR_ENTRY_SIZE)
        .position(|chunk| name_matches(&chunk[DIR_NAME_OFFSET..], name))
        .ok_or_else(|| VdiskError::NotFound(String::from_utf8_lossy(name).into_owned()))?;

    let start = index * DIR_ENTRY_SIZE;
    used.copy_within(start + DIR_ENTRY_SIZE.., start);
    if start < size - DIR_ENTRY_SIZE {
        dev.write_all_at(
            ByteOffset(geo.data_block_offset(block).0 + start as u64),
            &used[start..size - DIR_ENTRY_SIZE],
        )?;
    }
    vdisk_inode::write_size(dev, geo, dir, (size - DIR_ENTRY_SIZE) as u32)?;
    trace!(
        target: "vdisk::dir",
        event = "remove_entry",
        dir = dir.0,
        slot = index
    );
    Ok(())
}

/// Find the inode number of the first entry named `name`.
pub fn lookup(
    dev: &dyn ByteDevice,
    geo: &Geometry,
    dir: InodeNo,
    name: &[u8],
) -> Result<Option<InodeNo>> {
    let size = vdisk_inode::read_size(dev, geo, dir)? as usize;
    let block = dir_block(dev, geo, dir)?;

    let mut used = vec![0_u8; size];
    dev.read_exact_at(geo.data_block_offset(block), &mut used)?;

    for chunk in used.chunks_exact(DIR_ENTRY_SIZE) {
        if name_matches(&chunk[DIR_NAME_OFFSET..], name) {
            return Ok(Some(InodeNo(read_le_u16(chunk, 0)?)));
        }
    }
    Ok(None)
}

/// All entries in slot order.
pub fn entries(dev: &dyn ByteDevice, geo: &Geometry, dir: InodeNo) -> Result<Vec<DirEntry>> {
    let size = vdisk_inode::read_size(dev, geo, dir)? as usize;
    let block = dir_block(dev, geo, dir)?;

    let mut used = vec![0_u8; size];
    dev.read_exact_at(geo.data_block_offset(block), &mut used)?;

    let mut out = Vec::with_capacity(size / DIR_ENTRY_SIZE);
    for chunk in used.chunks_exact(DIR_ENTRY_SIZE) {
        let mut name = [0_u8; DIR_NAME_LEN];
        name.copy_from_slice(&chunk[DIR_NAME_OFFSET..]);
        out.push(DirEntry {
            ino: InodeNo(read_le_u16(chunk, 0)?),
            name,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdisk_block::MemByteDevice;

    fn setup() -> (MemByteDevice, Geometry) {
        let geo = Geometry::new(65536);
        let dev = MemByteDevice::new(geo.size_bytes() as usize);
        vdisk_alloc::clear_bitmaps(&dev, &geo).expect("clear");
        (dev, geo)
    }

    fn names(dev: &MemByteDevice, geo: &Geometry, dir: InodeNo) -> Vec<String> {
        entries(dev, geo, dir)
            .expect("entries")
            .iter()
            .map(DirEntry::name_lossy)
            .collect()
    }

    #[test]
    fn create_empty_dir_persists_record() {
        let (dev, geo) = setup();
        let dir = create_empty_dir(&dev, &geo).expect("create");
        assert_eq!(dir, InodeNo(0));

        let inode = vdisk_inode::read_inode(&dev, &geo, dir).expect("read");
        assert!(inode.is_directory());
        assert_eq!(inode.direct[0], 0);
        assert_eq!(inode.size, 0);
        assert_eq!(inode.link_count, 0);
        assert!(vdisk_alloc::inode_in_use(&dev, &geo, dir).expect("bit"));
    }

    #[test]
    fn add_and_lookup_entries() {
        let (dev, geo) = setup();
        let dir = create_empty_dir(&dev, &geo).expect("create");
        let file = vdisk_alloc::alloc_inode(&dev, &geo).expect("alloc");
        vdisk_inode::write_inode(&dev, &geo, file, &vdisk_inode::Inode::empty_file())
            .expect("init");

        add_entry(&dev, &geo, dir, dir, b".").expect("dot");
        add_entry(&dev, &geo, dir, dir, b"..").expect("dotdot");
        add_entry(&dev, &geo, dir, file, b"notes.txt").expect("file");

        assert_eq!(entry_count(&dev, &geo, dir).expect("count"), 3);
        assert_eq!(lookup(&dev, &geo, dir, b".").expect("lookup"), Some(dir));
        assert_eq!(
            lookup(&dev, &geo, dir, b"notes.txt").expect("lookup"),
            Some(file)
        );
        assert_eq!(lookup(&dev, &geo, dir, b"missing").expect("lookup"), None);

        // `.` and `..` bumped the directory itself twice; the file once.
        assert_eq!(
            vdisk_inode::read_link_count(&dev, &geo, dir).expect("links"),
            2
        );
        assert_eq!(
            vdisk_inode::read_link_count(&dev, &geo, file).expect("links"),
            1
        );
    }

    #[test]
    fn lookup_truncates_long_queries() {
        let (dev, geo) = setup();
        let dir = create_empty_dir(&dev, &geo).expect("create");
        add_entry(&dev, &geo, dir, dir, b"a-very-long-file-name").expect("add");

        assert_eq!(
            lookup(&dev, &geo, dir, b"a-very-long-file-name").expect("lookup"),
            Some(dir)
        );
        assert_eq!(
            lookup(&dev, &geo, dir, b"a-very-long-fi").expect("lookup"),
            Some(dir)
        );
    }

    #[test]
    fn remove_shifts_later_entries() {
        let (dev, geo) = setup();
        let dir = create_empty_dir(&dev, &geo).expect("create");
        add_entry(&dev, &geo, dir, dir, b"one").expect("add");
        add_entry(&dev, &geo, dir, dir, b"two").expect("add");
        add_entry(&dev, &geo, dir, dir, b"three").expect("add");

        remove_entry(&dev, &geo, dir, b"two").expect("remove");
        assert_eq!(names(&dev, &geo, dir), vec!["one", "three"]);
        assert_eq!(entry_count(&dev, &geo, dir).expect("count"), 2);

        remove_entry(&dev, &geo, dir, b"three").expect("remove tail");
        assert_eq!(names(&dev, &geo, dir), vec!["one"]);

        assert!(matches!(
            remove_entry(&dev, &geo, dir, b"two"),
            Err(VdiskError::NotFound(_))
        ));
    }

    #[test]
    fn directory_full_after_max_entries() {
        let (dev, geo) = setup();
        let dir = create_empty_dir(&dev, &geo).expect("create");

        for i in 0..DIR_MAX_ENTRIES {
            let name = format!("f{i:03}");
            add_entry(&dev, &geo, dir, dir, name.as_bytes()).expect("add");
        }
        assert!(!has_room(&dev, &geo, dir).expect("room"));
        assert!(matches!(
            add_entry(&dev, &geo, dir, dir, b"one-more"),
            Err(VdiskError::DirectoryFull)
        ));
        assert_eq!(entry_count(&dev, &geo, dir).expect("count"), 256);
    }

    #[test]
    fn create_dir_without_blocks_releases_inode() {
        let (dev, geo) = setup();
        for _ in 0..geo.n_data_blocks() {
            vdisk_alloc::alloc_block(&dev, &geo).expect("drain");
        }

        assert!(matches!(
            create_empty_dir(&dev, &geo),
            Err(VdiskError::NoFreeBlock)
        ));
        assert_eq!(vdisk_alloc::used_inodes(&dev, &geo).expect("count"), 0);
    }
}
