#![forbid(unsafe_code)]
//! Error types for vdisk.
//!
//! Defines `VdiskError` and a `Result<T>` alias used throughout the
//! workspace. Display strings double as the shell's diagnostic lines,
//! so they keep the interpreter's traditional phrasing; the carried
//! data (names, offsets, byte counts) feeds traces and callers that
//! need more than the one-liner.

use thiserror::Error;
use vdisk_types::ParseError;

/// Unified error type for all vdisk operations.
#[derive(Debug, Error)]
pub enum VdiskError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid on-disk record: {0}")]
    Parse(#[from] ParseError),

    #[error("No free i-node found (too many files)!")]
    NoFreeInode,

    #[error("No free block found (not enough free space)!")]
    NoFreeBlock,

    #[error("Directory already full!")]
    DirectoryFull,

    #[error("No such file exists!")]
    NotFound(String),

    #[error("No such directory!")]
    NoSuchDirectory,

    #[error("Target is a directory!")]
    IsDirectory(String),

    #[error("Maximum file size reached!")]
    FileTooLarge,

    #[error("Could not read the entire block!")]
    ShortRead {
        offset: u64,
        wanted: usize,
        got: usize,
    },

    #[error("Error reading file to copy!")]
    HostRead(String),
}

/// Result alias using `VdiskError`.
pub type Result<T> = std::result::Result<T, VdiskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_keep_shell_phrasing() {
        assert_eq!(
            VdiskError::NoFreeInode.to_string(),
            "No free i-node found (too many files)!"
        );
        assert_eq!(
            VdiskError::NoFreeBlock.to_string(),
            "No free block found (not enough free space)!"
        );
        assert_eq!(
            VdiskError::DirectoryFull.to_string(),
            "Directory already full!"
        );
        // Carried context never leaks into the shell's one-liners.
        assert_eq!(
            VdiskError::NotFound("ghost".to_owned()).to_string(),
            "No such file exists!"
        );
        assert_eq!(
            VdiskError::IsDirectory("d".to_owned()).to_string(),
            "Target is a directory!"
        );
        assert_eq!(
            VdiskError::HostRead("missing.txt".to_owned()).to_string(),
            "Error reading file to copy!"
        );
        assert_eq!(
            VdiskError::ShortRead {
                offset: 4096,
                wanted: 4096,
                got: 100
            }
            .to_string(),
            "Could not read the entire block!"
        );
    }

    #[test]
    fn parse_errors_convert() {
        let err: VdiskError = ParseError::InsufficientData {
            needed: 4,
            offset: 120,
            actual: 2,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Invalid on-disk record: insufficient data: need 4 bytes at offset 120, got 2"
        );
    }
}
