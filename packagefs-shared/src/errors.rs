//! Error types shared across the packagefs crates.
//!
//! One variant per failure class the filesystem can report to its caller.
//! `Fatal` conditions (rollback-of-rollback during an activation change)
//! are deliberately absent: they are logged and the volume keeps running in
//! a degraded state.

use std::io;
use thiserror::Error;

/// Result alias used throughout the packagefs crates.
pub type PackageFsResult<T> = Result<T, PackageFsError>;

/// Errors reported by packagefs operations.
#[derive(Debug, Error)]
pub enum PackageFsError {
    /// Name lookup failed, a package file is missing, or an activation item
    /// refers to a package that is not there.
    #[error("not found: {0}")]
    NotFound(String),

    /// A path component that must be a directory is not one.
    #[error("not a directory")]
    NotADirectory,

    /// A file operation was applied to a directory.
    #[error("is a directory")]
    IsADirectory,

    /// Malformed request, invalid mount parameters, or a bad ioctl layout.
    #[error("bad value: {0}")]
    BadValue(String),

    /// An activation request tried to activate an already-active package.
    #[error("name in use: {0}")]
    NameInUse(String),

    /// Any write-path operation; the filesystem is read-only.
    #[error("read-only device")]
    ReadOnlyDevice,

    /// Resource allocation failed.
    #[error("out of memory")]
    NoMemory,

    /// The parent device/inode in an activation request does not match the
    /// packages directory.
    #[error("mismatched values: {0}")]
    MismatchedValues(String),

    /// Operation intentionally not implemented.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// A package archive failed to parse or an activation file is invalid.
    #[error("bad data: {0}")]
    BadData(String),

    /// A caller-supplied buffer is too small for even one record.
    #[error("buffer overflow")]
    BufferOverflow,

    /// Underlying I/O failure.
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

impl PackageFsError {
    /// Create a `NotFound` error for a named entry.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    /// Create a `BadValue` error with a reason.
    pub fn bad_value(reason: impl Into<String>) -> Self {
        Self::BadValue(reason.into())
    }

    /// Create a `BadData` error with a reason.
    pub fn bad_data(reason: impl Into<String>) -> Self {
        Self::BadData(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = PackageFsError::not_found("bin/tool");
        assert_eq!(err.to_string(), "not found: bin/tool");

        let err = PackageFsError::NameInUse("foo-1.0-x86_64.hpkg".into());
        assert!(err.to_string().contains("foo-1.0-x86_64.hpkg"));
    }

    #[test]
    fn test_io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err: PackageFsError = io_err.into();
        assert!(matches!(err, PackageFsError::Io(_)));
    }
}
