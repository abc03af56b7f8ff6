//! Purpose: Abstract the filesystem operations the rotating file depends on.
//! Exports: `FileBackend`, `OsBackend`.
//! Role: Seam between the watcher/writer logic and the OS; tests swap in a memory backend.
//! Invariants: `path_identity` reports unresolvable paths as `None`, never as a panic.
//! Invariants: `close` is only called once the caller holds the last reference to a handle.
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

use crate::core::identity::{self, FileIdentity};

/// Filesystem capability used by `RotatingFile`.
///
/// Every method takes `&self` and a shared handle reference: handles are shared between
/// writer threads and the watcher through an `Arc`, so implementations must tolerate
/// concurrent calls on the same handle.
pub trait FileBackend: Clone + Send + Sync + 'static {
    type Handle: Send + Sync + 'static;

    /// Opens `path` for appending, creating it with `mode` when absent.
    fn open_append(&self, path: &Path, mode: u32) -> io::Result<Self::Handle>;
    fn path_identity(&self, path: &Path) -> Option<FileIdentity>;
    fn handle_identity(&self, handle: &Self::Handle) -> io::Result<FileIdentity>;

    fn write(&self, handle: &Self::Handle, buf: &[u8]) -> io::Result<usize>;
    fn write_at(&self, handle: &Self::Handle, buf: &[u8], offset: u64) -> io::Result<usize>;
    fn seek(&self, handle: &Self::Handle, pos: SeekFrom) -> io::Result<u64>;
    fn flush(&self, handle: &Self::Handle) -> io::Result<()>;
    /// Forces written data to durable storage.
    fn sync(&self, handle: &Self::Handle) -> io::Result<()>;
    fn close(&self, handle: Self::Handle) -> io::Result<()>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct OsBackend;

impl FileBackend for OsBackend {
    type Handle = File;

    fn open_append(&self, path: &Path, mode: u32) -> io::Result<File> {
        let mut options = OpenOptions::new();
        options.append(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;
        options.open(path)
    }

    fn path_identity(&self, path: &Path) -> Option<FileIdentity> {
        identity::identity_of_path(path)
    }

    fn handle_identity(&self, handle: &File) -> io::Result<FileIdentity> {
        identity::identity_of_file(handle)
    }

    fn write(&self, handle: &File, buf: &[u8]) -> io::Result<usize> {
        let mut file = handle;
        file.write(buf)
    }

    #[cfg(unix)]
    fn write_at(&self, handle: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
        use std::os::unix::fs::FileExt;
        handle.write_at(buf, offset)
    }

    #[cfg(windows)]
    fn write_at(&self, handle: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
        use std::os::windows::fs::FileExt;
        handle.seek_write(buf, offset)
    }

    #[cfg(not(any(unix, windows)))]
    fn write_at(&self, _handle: &File, _buf: &[u8], _offset: u64) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "positional writes are not available on this platform",
        ))
    }

    fn seek(&self, handle: &File, pos: SeekFrom) -> io::Result<u64> {
        let mut file = handle;
        file.seek(pos)
    }

    fn flush(&self, handle: &File) -> io::Result<()> {
        let mut file = handle;
        file.flush()
    }

    fn sync(&self, handle: &File) -> io::Result<()> {
        handle.sync_all()
    }

    #[cfg(unix)]
    fn close(&self, handle: File) -> io::Result<()> {
        use std::os::unix::io::IntoRawFd;
        let fd = handle.into_raw_fd();
        // SAFETY: `into_raw_fd` gave up ownership of `fd`, so nothing else closes or reuses it.
        let rc = unsafe { libc::close(fd) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn close(&self, handle: File) -> io::Result<()> {
        drop(handle);
        Ok(())
    }
}
