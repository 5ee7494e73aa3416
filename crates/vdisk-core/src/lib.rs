#![forbid(unsafe_code)]
//! The vdisk filesystem engine.
//!
//! One backing file is treated as a flat block device carrying a
//! UFS-like layout: two bitmap blocks, an inode table, and a data
//! region. `VirtualDisk` composes the lower layers into the file-level
//! operations the shell dispatches to: copy-in/out, extend, truncate,
//! unlink, link, mkdir, chdir, listing, and usage accounting.
//!
//! Every operation acts by reading and writing byte ranges of the
//! backing file at computed offsets; nothing is cached. Failed
//! operations are not rolled back (whatever was already written stays
//! written), but every *successful* operation leaves the volume
//! consistent: bitmaps agree with reachability, link counts agree with
//! directory entries, and a file of size `n` references exactly
//! `ceil(n / 4096)` blocks.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::debug;
use vdisk_block::{ByteDevice, FileByteDevice};
use vdisk_error::{Result, VdiskError};
use vdisk_inode::Inode;
use vdisk_types::{
    BLOCK_SIZE, ByteOffset, DIRECT_SLOTS, Geometry, InodeNo, MIN_DISK_SIZE,
};

const BLOCK_BYTES: usize = BLOCK_SIZE as usize;

// ── Report types ────────────────────────────────────────────────────────────

/// One line of `ls` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    pub ino: u16,
    pub link_count: u16,
    pub size: u32,
    pub is_directory: bool,
    pub name: String,
}

impl ListEntry {
    /// The type word `ls` prints.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        if self.is_directory { "directory" } else { "file" }
    }
}

/// Volume utilization for `info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    /// Sum of the size fields of every live inode.
    pub bytes_used: u64,
    /// Capacity of the data region.
    pub bytes_total: u64,
    pub data_blocks_used: u32,
    pub data_blocks_total: u32,
    pub inodes_used: u32,
    pub inodes_total: u32,
}

// ── Engine ──────────────────────────────────────────────────────────────────

/// A mounted virtual disk: the backing device, its derived geometry,
/// and the shell's current directory.
pub struct VirtualDisk<D: ByteDevice = FileByteDevice> {
    dev: D,
    geo: Geometry,
    cwd: InodeNo,
    path: Vec<String>,
}

impl VirtualDisk<FileByteDevice> {
    /// Open (or create) a backing file and mount it.
    ///
    /// `size_hint` is consulted only when the backing file is freshly
    /// created; an existing volume's geometry is re-derived from its
    /// length.
    pub fn open_path(path: impl AsRef<Path>, size_hint: Option<u64>) -> Result<Self> {
        let dev = FileByteDevice::open(path)?;
        Self::new(dev, size_hint)
    }
}

impl<D: ByteDevice> VirtualDisk<D> {
    /// Mount a device, formatting it on first use.
    pub fn new(dev: D, size_hint: Option<u64>) -> Result<Self> {
        let len = dev.len_bytes()?;
        let geo = if len == 0 {
            Geometry::new(size_hint.unwrap_or(MIN_DISK_SIZE))
        } else {
            Geometry::new(len)
        };
        if len < geo.size_bytes() {
            // Sentinel byte at the end fixes the file's length.
            dev.write_all_at(ByteOffset(geo.size_bytes() - 1), b"x")?;
        }

        let disk = Self {
            dev,
            geo,
            cwd: InodeNo::ROOT,
            path: Vec::new(),
        };

        // A set root bit means a prior run formatted this volume;
        // re-initializing would wipe it.
        if vdisk_alloc::is_formatted(&disk.dev, &disk.geo)? {
            debug!(
                target: "vdisk::core",
                event = "reopen",
                size = disk.geo.size_bytes()
            );
        } else {
            disk.format()?;
        }
        Ok(disk)
    }

    fn format(&self) -> Result<()> {
        vdisk_alloc::clear_bitmaps(&self.dev, &self.geo)?;
        let root = vdisk_dir::create_empty_dir(&self.dev, &self.geo)?;
        vdisk_dir::add_entry(&self.dev, &self.geo, root, root, b".")?;
        vdisk_dir::add_entry(&self.dev, &self.geo, root, root, b"..")?;
        debug!(
            target: "vdisk::core",
            event = "format",
            size = self.geo.size_bytes(),
            inodes = self.geo.n_inodes(),
            data_blocks = self.geo.n_data_blocks()
        );
        Ok(())
    }

    /// The derived volume layout.
    #[must_use]
    pub fn geometry(&self) -> &Geometry {
        &self.geo
    }

    /// Inode of the current directory.
    #[must_use]
    pub fn current_dir(&self) -> InodeNo {
        self.cwd
    }

    // ── Path helpers ────────────────────────────────────────────────────

    fn parent_of(&self, vpath: &str) -> Result<vdisk_path::ResolvedParent> {
        vdisk_path::resolve_parent(&self.dev, &self.geo, self.cwd, &self.path, vpath)
    }

    /// Resolve a path that must name an existing regular file.
    fn resolve_file(&self, vpath: &str) -> Result<(InodeNo, Inode)> {
        let parent = self.parent_of(vpath)?;
        let ino = vdisk_dir::lookup(&self.dev, &self.geo, parent.ino, &parent.leaf)?
            .ok_or_else(|| VdiskError::NotFound(leaf_name(&parent.leaf)))?;
        let inode = vdisk_inode::read_inode(&self.dev, &self.geo, ino)?;
        if inode.is_directory() {
            return Err(VdiskError::IsDirectory(leaf_name(&parent.leaf)));
        }
        Ok((ino, inode))
    }

    // ── Copy in / out ───────────────────────────────────────────────────

    /// Import a host file at `vpath` (`ucp`).
    ///
    /// Block exhaustion or the direct-slot cap stops the stream
    /// mid-file; the size recorded covers exactly the blocks written,
    /// so a partial import is a shorter-than-source but consistent
    /// file.
    pub fn copy_in(&mut self, host: impl AsRef<Path>, vpath: &str) -> Result<()> {
        let parent = self.parent_of(vpath)?;
        if !vdisk_dir::has_room(&self.dev, &self.geo, parent.ino)? {
            return Err(VdiskError::DirectoryFull);
        }
        let host_name = host.as_ref().display().to_string();
        let mut src = File::open(host.as_ref())
            .map_err(|_| VdiskError::HostRead(host_name.clone()))?;

        let ino = vdisk_alloc::alloc_inode(&self.dev, &self.geo)?;
        vdisk_inode::write_inode(&self.dev, &self.geo, ino, &Inode::empty_file())?;
        vdisk_dir::add_entry(&self.dev, &self.geo, parent.ino, ino, &parent.leaf)?;

        let mut buf = vec![0_u8; BLOCK_BYTES];
        let mut blocks = 0_usize;
        let mut tail = 0_usize;
        let stopped = loop {
            let n = match fill_block(&mut src, &mut buf) {
                Ok(n) => n,
                Err(_) => break Some(VdiskError::HostRead(host_name.clone())),
            };
            if n == 0 {
                break None;
            }
            if blocks == DIRECT_SLOTS {
                break Some(VdiskError::FileTooLarge);
            }
            let addr = match vdisk_alloc::alloc_block(&self.dev, &self.geo) {
                Ok(addr) => addr,
                Err(err) => break Some(err),
            };
            self.dev
                .write_all_at(self.geo.data_block_offset(addr), &buf[..n])?;
            vdisk_inode::write_block_slot(&self.dev, &self.geo, ino, blocks, addr)?;
            blocks += 1;
            tail = n;
        };

        // An empty import is size 0, not block arithmetic on zero blocks.
        let size = if blocks == 0 {
            0
        } else {
            ((blocks - 1) * BLOCK_BYTES + tail) as u32
        };
        vdisk_inode::write_size(&self.dev, &self.geo, ino, size)?;
        debug!(
            target: "vdisk::core",
            event = "copy_in",
            ino = ino.0,
            blocks = blocks,
            size = size,
            complete = stopped.is_none()
        );
        stopped.map_or(Ok(()), Err)
    }

    /// Export `vpath` into a host file (`dcp`).
    pub fn copy_out(&self, vpath: &str, host: impl AsRef<Path>) -> Result<()> {
        let (ino, inode) = self.resolve_file(vpath)?;
        let mut out = File::create(host.as_ref())?;
        self.read_blocks(&inode, |chunk| {
            out.write_all(chunk)?;
            Ok(())
        })?;
        debug!(
            target: "vdisk::core",
            event = "copy_out",
            ino = ino.0,
            size = inode.size
        );
        Ok(())
    }

    /// Whole contents of a regular file (`cat`).
    pub fn read_all(&self, vpath: &str) -> Result<Vec<u8>> {
        let (_, inode) = self.resolve_file(vpath)?;
        let mut bytes = Vec::with_capacity(inode.size as usize);
        self.read_blocks(&inode, |chunk| {
            bytes.extend_from_slice(chunk);
            Ok(())
        })?;
        Ok(bytes)
    }

    /// Feed each referenced block (tail trimmed) to `sink`, in order.
    fn read_blocks(
        &self,
        inode: &Inode,
        mut sink: impl FnMut(&[u8]) -> Result<()>,
    ) -> Result<()> {
        let count = inode.block_count() as usize;
        let tail = (inode.size as usize) % BLOCK_BYTES;
        let mut buf = vec![0_u8; BLOCK_BYTES];
        for (slot, addr) in inode.referenced_blocks().into_iter().enumerate() {
            let expected = if slot + 1 < count || tail == 0 {
                BLOCK_BYTES
            } else {
                tail
            };
            self.dev
                .read_exact_at(self.geo.data_block_offset(addr), &mut buf[..expected])?;
            sink(&buf[..expected])?;
        }
        Ok(())
    }

    // ── Resizing ────────────────────────────────────────────────────────

    /// Grow a file's logical size by `n` bytes (`ab`).
    ///
    /// Fresh blocks are appended uninitialized; callers must not
    /// depend on their contents.
    pub fn add_bytes(&mut self, vpath: &str, n: u32) -> Result<()> {
        let (ino, inode) = self.resolve_file(vpath)?;
        if n == 0 {
            return Ok(());
        }

        let old = inode.size;
        let count = inode.block_count() as usize;
        let tail = old % BLOCK_SIZE;
        let tail_capacity = if tail > 0 { BLOCK_SIZE - tail } else { 0 };
        let needed = n.saturating_sub(tail_capacity).div_ceil(BLOCK_SIZE) as usize;
        if count + needed > DIRECT_SLOTS {
            return Err(VdiskError::FileTooLarge);
        }

        let mut allocated = 0_usize;
        let mut stopped = None;
        for slot in 0..needed {
            match vdisk_alloc::alloc_block(&self.dev, &self.geo) {
                Ok(addr) => {
                    vdisk_inode::write_block_slot(&self.dev, &self.geo, ino, count + slot, addr)?;
                    allocated += 1;
                }
                Err(err) => {
                    stopped = Some(err);
                    break;
                }
            }
        }

        // On exhaustion the size covers exactly the blocks that exist.
        let new_size = if stopped.is_some() {
            (old + n).min(((count + allocated) as u32) * BLOCK_SIZE)
        } else {
            old + n
        };
        vdisk_inode::write_size(&self.dev, &self.geo, ino, new_size)?;
        debug!(
            target: "vdisk::core",
            event = "add_bytes",
            ino = ino.0,
            requested = n,
            new_size = new_size,
            new_blocks = allocated
        );
        stopped.map_or(Ok(()), Err)
    }

    /// Shrink a file's logical size by up to `n` bytes (`db`).
    pub fn delete_bytes(&mut self, vpath: &str, n: u32) -> Result<()> {
        let (ino, inode) = self.resolve_file(vpath)?;
        let new_size = inode.size - n.min(inode.size);
        let old_count = inode.block_count() as usize;
        let new_count = new_size.div_ceil(BLOCK_SIZE) as usize;

        for slot in new_count..old_count {
            vdisk_alloc::free_block(
                &self.dev,
                &self.geo,
                vdisk_types::BlockAddr(inode.direct[slot]),
            )?;
        }
        vdisk_inode::write_size(&self.dev, &self.geo, ino, new_size)?;
        debug!(
            target: "vdisk::core",
            event = "delete_bytes",
            ino = ino.0,
            requested = n,
            new_size = new_size,
            freed_blocks = old_count - new_count
        );
        Ok(())
    }

    // ── Links and unlink ────────────────────────────────────────────────

    /// Remove a directory entry; destroy the file at zero links (`rm`).
    pub fn unlink(&mut self, vpath: &str) -> Result<()> {
        let parent = self.parent_of(vpath)?;
        let ino = vdisk_dir::lookup(&self.dev, &self.geo, parent.ino, &parent.leaf)?
            .ok_or_else(|| VdiskError::NotFound(leaf_name(&parent.leaf)))?;
        let inode = vdisk_inode::read_inode(&self.dev, &self.geo, ino)?;
        if inode.is_directory() {
            return Err(VdiskError::IsDirectory(leaf_name(&parent.leaf)));
        }

        vdisk_dir::remove_entry(&self.dev, &self.geo, parent.ino, &parent.leaf)?;
        let links = inode.link_count.saturating_sub(1);
        vdisk_inode::write_link_count(&self.dev, &self.geo, ino, links)?;

        if links == 0 {
            for addr in inode.referenced_blocks() {
                vdisk_alloc::free_block(&self.dev, &self.geo, addr)?;
            }
            vdisk_alloc::free_inode(&self.dev, &self.geo, ino)?;
        }
        debug!(
            target: "vdisk::core",
            event = "unlink",
            ino = ino.0,
            links = links
        );
        Ok(())
    }

    /// Create a hard link to a regular file (`ln`).
    pub fn link(&mut self, target: &str, link_path: &str) -> Result<()> {
        let tparent = self.parent_of(target)?;
        let tino = vdisk_dir::lookup(&self.dev, &self.geo, tparent.ino, &tparent.leaf)?
            .ok_or_else(|| VdiskError::NotFound(leaf_name(&tparent.leaf)))?;
        if vdisk_inode::read_inode(&self.dev, &self.geo, tino)?.is_directory() {
            return Err(VdiskError::IsDirectory(leaf_name(&tparent.leaf)));
        }

        let lparent = self.parent_of(link_path)?;
        if !vdisk_dir::has_room(&self.dev, &self.geo, lparent.ino)? {
            return Err(VdiskError::DirectoryFull);
        }
        vdisk_dir::add_entry(&self.dev, &self.geo, lparent.ino, tino, &lparent.leaf)?;
        debug!(
            target: "vdisk::core",
            event = "link",
            ino = tino.0,
            dir = lparent.ino.0
        );
        Ok(())
    }

    // ── Directories ─────────────────────────────────────────────────────

    /// Create a directory at `vpath` (`mkdir`).
    pub fn mkdir(&mut self, vpath: &str) -> Result<()> {
        let parent = self.parent_of(vpath)?;
        if !vdisk_dir::has_room(&self.dev, &self.geo, parent.ino)? {
            return Err(VdiskError::DirectoryFull);
        }

        let child = vdisk_dir::create_empty_dir(&self.dev, &self.geo)?;
        vdisk_dir::add_entry(&self.dev, &self.geo, child, child, b".")?;
        vdisk_dir::add_entry(&self.dev, &self.geo, child, parent.ino, b"..")?;
        vdisk_dir::add_entry(&self.dev, &self.geo, parent.ino, child, &parent.leaf)?;
        debug!(
            target: "vdisk::core",
            event = "mkdir",
            ino = child.0,
            parent = parent.ino.0
        );
        Ok(())
    }

    /// Change the current directory (`cd`).
    ///
    /// State is assigned only from a fully successful resolution, so a
    /// bad path leaves the current directory and path untouched.
    pub fn cd(&mut self, vpath: &str) -> Result<()> {
        let resolved =
            vdisk_path::resolve_dir(&self.dev, &self.geo, self.cwd, &self.path, vpath)?;
        self.cwd = resolved.ino;
        self.path = resolved.path;
        debug!(target: "vdisk::core", event = "cd", ino = self.cwd.0);
        Ok(())
    }

    /// Entries of the current directory, in slot order (`ls`).
    pub fn list(&self) -> Result<Vec<ListEntry>> {
        let mut out = Vec::new();
        for entry in vdisk_dir::entries(&self.dev, &self.geo, self.cwd)? {
            let inode = vdisk_inode::read_inode(&self.dev, &self.geo, entry.ino)?;
            out.push(ListEntry {
                ino: entry.ino.0,
                link_count: inode.link_count,
                size: inode.size,
                is_directory: inode.is_directory(),
                name: entry.name_lossy(),
            });
        }
        Ok(out)
    }

    /// The current path as a string (`pwd`).
    #[must_use]
    pub fn pwd(&self) -> String {
        if self.path.is_empty() {
            "/".to_owned()
        } else {
            format!("/{}", self.path.join("/"))
        }
    }

    /// Volume utilization (`info`).
    pub fn usage(&self) -> Result<UsageSummary> {
        let mut bytes_used = 0_u64;
        for i in 0..self.geo.n_inodes() {
            let ino = InodeNo(i);
            if vdisk_alloc::inode_in_use(&self.dev, &self.geo, ino)? {
                bytes_used += u64::from(vdisk_inode::read_size(&self.dev, &self.geo, ino)?);
            }
        }
        Ok(UsageSummary {
            bytes_used,
            bytes_total: self.geo.data_bytes_total(),
            data_blocks_used: vdisk_alloc::used_blocks(&self.dev, &self.geo)?,
            data_blocks_total: u32::from(self.geo.n_data_blocks()),
            inodes_used: vdisk_alloc::used_inodes(&self.dev, &self.geo)?,
            inodes_total: u32::from(self.geo.n_inodes()),
        })
    }

    /// Flush the backing file (`exit`).
    pub fn sync(&self) -> Result<()> {
        self.dev.sync()
    }
}

/// Display form of a leaf name for error payloads.
fn leaf_name(leaf: &[u8]) -> String {
    String::from_utf8_lossy(leaf).into_owned()
}

/// Read until `buf` is full or the source is exhausted.
fn fill_block(src: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = src.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
