#![forbid(unsafe_code)]
//! Backing-store adapter: positioned byte I/O over one host file.
//!
//! The whole filesystem acts by reading and writing byte ranges of the
//! backing file at computed offsets; there is no cache. `ByteDevice`
//! is the only I/O seam; nothing outside this crate touches a file
//! cursor, so there is no shared seek position to corrupt.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::trace;
use vdisk_error::{Result, VdiskError};
use vdisk_types::ByteOffset;

/// Byte-addressed device with pread/pwrite semantics.
pub trait ByteDevice: Send + Sync {
    /// Current length in bytes.
    fn len_bytes(&self) -> Result<u64>;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    ///
    /// Reading past the end of the device is an integrity error.
    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()>;

    /// Write all bytes in `buf` at `offset`, extending the device if
    /// the range ends past its current length.
    fn write_all_at(&self, offset: ByteOffset, buf: &[u8]) -> Result<()>;

    /// Flush pending writes to stable storage.
    fn sync(&self) -> Result<()>;
}

/// File-backed device using `pread`/`pwrite` style I/O.
///
/// `std::os::unix::fs::FileExt` carries no shared seek position, so
/// every access names its own offset.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
}

impl FileByteDevice {
    /// Open the backing file read+write, creating it if absent.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        trace!(
            target: "vdisk::block",
            event = "open",
            path = %path.as_ref().display()
        );
        Ok(Self {
            file: Arc::new(file),
        })
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact_at(buf, offset.0).map_err(|err| {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                let len = self.file.metadata().map_or(0, |m| m.len());
                // Bytes that existed before the end of the file; capped
                // by the request, so the cast cannot truncate.
                #[allow(clippy::cast_possible_truncation)]
                let got = len.saturating_sub(offset.0).min(buf.len() as u64) as usize;
                VdiskError::ShortRead {
                    offset: offset.0,
                    wanted: buf.len(),
                    got,
                }
            } else {
                VdiskError::Io(err)
            }
        })
    }

    fn write_all_at(&self, offset: ByteOffset, buf: &[u8]) -> Result<()> {
        self.file.write_all_at(buf, offset.0)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Growable in-memory device for tests and tooling.
#[derive(Debug, Default)]
pub struct MemByteDevice {
    bytes: Mutex<Vec<u8>>,
}

impl MemByteDevice {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            bytes: Mutex::new(vec![0_u8; len]),
        }
    }
}

impl ByteDevice for MemByteDevice {
    fn len_bytes(&self) -> Result<u64> {
        Ok(self.bytes.lock().expect("mem device poisoned").len() as u64)
    }

    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        let bytes = self.bytes.lock().expect("mem device poisoned");
        let start = usize::try_from(offset.0).map_err(|_| VdiskError::ShortRead {
            offset: offset.0,
            wanted: buf.len(),
            got: 0,
        })?;
        let end = start.saturating_add(buf.len());
        if end > bytes.len() {
            return Err(VdiskError::ShortRead {
                offset: offset.0,
                wanted: buf.len(),
                got: bytes.len().saturating_sub(start).min(buf.len()),
            });
        }
        buf.copy_from_slice(&bytes[start..end]);
        Ok(())
    }

    fn write_all_at(&self, offset: ByteOffset, buf: &[u8]) -> Result<()> {
        let mut bytes = self.bytes.lock().expect("mem device poisoned");
        let start = usize::try_from(offset.0).map_err(|_| {
            VdiskError::Io(std::io::Error::other("offset exceeds address space"))
        })?;
        let end = start.saturating_add(buf.len());
        if end > bytes.len() {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}
