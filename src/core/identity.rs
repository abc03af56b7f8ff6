//! Purpose: Resolve paths and open files to a name-independent identity token.
//! Exports: `FileIdentity`, `identity_of_path`, `identity_of_file`.
//! Role: Metadata probe behind rotation detection.
//! Invariants: Path probes never fail loudly; an unresolvable path is `None`.
//! Invariants: On Unix the token is `(st_dev, st_ino)` and is stable for the object's lifetime.
use std::fs::{self, File, Metadata};
use std::io;
use std::path::Path;

use serde::Serialize;

/// Identifies the storage object behind a path or handle, independent of its name.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub struct FileIdentity {
    pub dev: u64,
    pub ino: u64,
}

impl FileIdentity {
    pub fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> io::Result<Self> {
        use std::os::unix::fs::MetadataExt;
        Ok(Self::new(metadata.dev(), metadata.ino()))
    }

    #[cfg(not(unix))]
    pub fn from_metadata(_metadata: &Metadata) -> io::Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "file identity is not available on this platform",
        ))
    }
}

pub fn identity_of_path(path: &Path) -> Option<FileIdentity> {
    let metadata = fs::metadata(path).ok()?;
    FileIdentity::from_metadata(&metadata).ok()
}

pub fn identity_of_file(file: &File) -> io::Result<FileIdentity> {
    let metadata = file.metadata()?;
    FileIdentity::from_metadata(&metadata)
}
