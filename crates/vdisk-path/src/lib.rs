#![forbid(unsafe_code)]
//! Path resolution.
//!
//! Paths are `/`-separated; empty segments are dropped, so a leading
//! slash carries no meaning and every walk starts at the caller's
//! current directory. `.` is a no-op, `..` pops one level (never past
//! the root), anything else must name a live directory entry with the
//! directory flag.
//!
//! Resolution returns plain values; the caller decides what to commit.
//! Only a successful `cd` assigns the returned inode and path into
//! engine state, so a failed walk can never leave it half-updated.

use tracing::trace;
use vdisk_block::ByteDevice;
use vdisk_error::{Result, VdiskError};
use vdisk_types::{DIR_NAME_LEN, Geometry, InodeNo};

/// Result of fully resolving a path to a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDir {
    pub ino: InodeNo,
    /// Directory names from the root down to `ino`.
    pub path: Vec<String>,
}

/// Result of resolving all but the last segment of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedParent {
    /// The directory that holds (or would hold) the leaf.
    pub ino: InodeNo,
    pub path: Vec<String>,
    /// Final path segment, uninterpreted.
    pub leaf: Vec<u8>,
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|seg| !seg.is_empty()).collect()
}

/// Display form of a walked segment, capped at the storable name width.
fn path_component(seg: &str) -> String {
    let bytes = seg.as_bytes();
    let capped = &bytes[..bytes.len().min(DIR_NAME_LEN)];
    String::from_utf8_lossy(capped).into_owned()
}

fn step(
    dev: &dyn ByteDevice,
    geo: &Geometry,
    cursor: InodeNo,
    working: &mut Vec<String>,
    seg: &str,
) -> Result<InodeNo> {
    match seg {
        "." => Ok(cursor),
        ".." => {
            let parent = vdisk_dir::lookup(dev, geo, cursor, b"..")?
                .ok_or(VdiskError::NoSuchDirectory)?;
            working.pop();
            Ok(parent)
        }
        name => {
            let next = vdisk_dir::lookup(dev, geo, cursor, name.as_bytes())?
                .ok_or(VdiskError::NoSuchDirectory)?;
            if !vdisk_inode::read_inode(dev, geo, next)?.is_directory() {
                return Err(VdiskError::NoSuchDirectory);
            }
            working.push(path_component(name));
            Ok(next)
        }
    }
}

/// Consume every segment of `path`; the result names a directory.
pub fn resolve_dir(
    dev: &dyn ByteDevice,
    geo: &Geometry,
    start: InodeNo,
    start_path: &[String],
    path: &str,
) -> Result<ResolvedDir> {
    let mut cursor = start;
    let mut working = start_path.to_vec();
    for seg in segments(path) {
        cursor = step(dev, geo, cursor, &mut working, seg)?;
    }
    trace!(
        target: "vdisk::path",
        event = "resolve_dir",
        path = path,
        ino = cursor.0
    );
    Ok(ResolvedDir {
        ino: cursor,
        path: working,
    })
}

/// Consume all but the last segment; the result is the directory that
/// would contain the final-named entity, plus that leaf name.
pub fn resolve_parent(
    dev: &dyn ByteDevice,
    geo: &Geometry,
    start: InodeNo,
    start_path: &[String],
    path: &str,
) -> Result<ResolvedParent> {
    let segs = segments(path);
    let Some((leaf, dirs)) = segs.split_last() else {
        // Nothing names the leaf ("", "/", "//"…).
        return Err(VdiskError::NotFound(path.to_owned()));
    };

    let mut cursor = start;
    let mut working = start_path.to_vec();
    for seg in dirs {
        cursor = step(dev, geo, cursor, &mut working, seg)?;
    }
    trace!(
        target: "vdisk::path",
        event = "resolve_parent",
        path = path,
        dir = cursor.0
    );
    Ok(ResolvedParent {
        ino: cursor,
        path: working,
        leaf: leaf.as_bytes().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdisk_block::MemByteDevice;

    /// Build `/sub/inner` plus a regular file `/note`.
    fn build_tree() -> (MemByteDevice, Geometry, InodeNo, InodeNo, InodeNo) {
        let geo = Geometry::new(65536);
        let dev = MemByteDevice::new(geo.size_bytes() as usize);
        vdisk_alloc::clear_bitmaps(&dev, &geo).expect("clear");

        let root = vdisk_dir::create_empty_dir(&dev, &geo).expect("root");
        vdisk_dir::add_entry(&dev, &geo, root, root, b".").expect("dot");
        vdisk_dir::add_entry(&dev, &geo, root, root, b"..").expect("dotdot");

        let sub = vdisk_dir::create_empty_dir(&dev, &geo).expect("sub");
        vdisk_dir::add_entry(&dev, &geo, sub, sub, b".").expect("dot");
        vdisk_dir::add_entry(&dev, &geo, sub, root, b"..").expect("dotdot");
        vdisk_dir::add_entry(&dev, &geo, root, sub, b"sub").expect("entry");

        let inner = vdisk_dir::create_empty_dir(&dev, &geo).expect("inner");
        vdisk_dir::add_entry(&dev, &geo, inner, inner, b".").expect("dot");
        vdisk_dir::add_entry(&dev, &geo, inner, sub, b"..").expect("dotdot");
        vdisk_dir::add_entry(&dev, &geo, sub, inner, b"inner").expect("entry");

        let note = vdisk_alloc::alloc_inode(&dev, &geo).expect("alloc");
        vdisk_inode::write_inode(&dev, &geo, note, &vdisk_inode::Inode::empty_file())
            .expect("init");
        vdisk_dir::add_entry(&dev, &geo, root, note, b"note").expect("entry");

        (dev, geo, root, sub, inner)
    }

    #[test]
    fn resolve_nested_path() {
        let (dev, geo, root, _, inner) = build_tree();
        let got = resolve_dir(&dev, &geo, root, &[], "sub/inner").expect("resolve");
        assert_eq!(got.ino, inner);
        assert_eq!(got.path, vec!["sub", "inner"]);
    }

    #[test]
    fn leading_slash_and_empty_segments_are_dropped() {
        let (dev, geo, root, sub, _) = build_tree();
        let got = resolve_dir(&dev, &geo, root, &[], "/sub//").expect("resolve");
        assert_eq!(got.ino, sub);
        assert_eq!(got.path, vec!["sub"]);

        let noop = resolve_dir(&dev, &geo, root, &[], "/").expect("resolve");
        assert_eq!(noop.ino, root);
        assert!(noop.path.is_empty());
    }

    #[test]
    fn dot_and_dotdot() {
        let (dev, geo, root, sub, inner) = build_tree();
        let start_path = vec!["sub".to_owned(), "inner".to_owned()];

        let up = resolve_dir(&dev, &geo, inner, &start_path, "..").expect("resolve");
        assert_eq!(up.ino, sub);
        assert_eq!(up.path, vec!["sub"]);

        let same = resolve_dir(&dev, &geo, inner, &start_path, ".").expect("resolve");
        assert_eq!(same.ino, inner);
        assert_eq!(same.path, start_path);

        // `..` at the root stays at the root.
        let still_root = resolve_dir(&dev, &geo, root, &[], "../..").expect("resolve");
        assert_eq!(still_root.ino, root);
        assert!(still_root.path.is_empty());
    }

    #[test]
    fn missing_or_file_segments_fail() {
        let (dev, geo, root, _, _) = build_tree();
        assert!(matches!(
            resolve_dir(&dev, &geo, root, &[], "ghost"),
            Err(VdiskError::NoSuchDirectory)
        ));
        // A regular file cannot be walked through.
        assert!(matches!(
            resolve_dir(&dev, &geo, root, &[], "note"),
            Err(VdiskError::NoSuchDirectory)
        ));
        assert!(matches!(
            resolve_parent(&dev, &geo, root, &[], "note/x"),
            Err(VdiskError::NoSuchDirectory)
        ));
    }

    #[test]
    fn parent_resolution_stops_before_leaf() {
        let (dev, geo, root, sub, _) = build_tree();

        let got = resolve_parent(&dev, &geo, root, &[], "sub/newfile").expect("resolve");
        assert_eq!(got.ino, sub);
        assert_eq!(got.path, vec!["sub"]);
        assert_eq!(got.leaf, b"newfile".to_vec());

        // The leaf itself may be missing; only intermediates must exist.
        let fresh = resolve_parent(&dev, &geo, root, &[], "brand-new").expect("resolve");
        assert_eq!(fresh.ino, root);
        assert_eq!(fresh.leaf, b"brand-new".to_vec());
    }

    #[test]
    fn parent_resolution_needs_a_leaf() {
        let (dev, geo, root, _, _) = build_tree();
        assert!(matches!(
            resolve_parent(&dev, &geo, root, &[], "/"),
            Err(VdiskError::NotFound(_))
        ));
        assert!(matches!(
            resolve_parent(&dev, &geo, root, &[], ""),
            Err(VdiskError::NotFound(_))
        ));
    }

    #[test]
    fn long_segments_are_capped_in_the_working_path() {
        let (dev, geo, root, _, _) = build_tree();
        let long = vdisk_dir::create_empty_dir(&dev, &geo).expect("dir");
        vdisk_dir::add_entry(&dev, &geo, long, long, b".").expect("dot");
        vdisk_dir::add_entry(&dev, &geo, long, root, b"..").expect("dotdot");
        vdisk_dir::add_entry(&dev, &geo, root, long, b"a-very-long-directory").expect("entry");

        let got =
            resolve_dir(&dev, &geo, root, &[], "a-very-long-directory").expect("resolve");
        assert_eq!(got.ino, long);
        // Stored names are 14 bytes; the working path shows what is on disk.
        assert_eq!(got.path, vec!["a-very-long-di"]);
    }
}
