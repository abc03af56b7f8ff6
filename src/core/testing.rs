// In-memory `FileBackend` for driving the watcher and facade without touching disk.
use std::collections::{HashMap, HashSet};
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::core::backend::FileBackend;
use crate::core::identity::FileIdentity;

const MEMORY_DEV: u64 = 1;

#[derive(Clone, Default)]
pub(crate) struct MemoryBackend {
    state: Arc<Mutex<MemoryFs>>,
}

#[derive(Default)]
struct MemoryFs {
    last_ino: u64,
    last_serial: u64,
    names: HashMap<PathBuf, u64>,
    contents: HashMap<u64, Vec<u8>>,
    syncs: HashMap<u64, usize>,
    closes: HashMap<u64, Vec<Instant>>,
    closed_handles: HashSet<u64>,
    opens: usize,
    fail_open: bool,
    fail_identity: bool,
}

pub(crate) struct MemoryHandle {
    ino: u64,
    serial: u64,
}

impl MemoryBackend {
    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryFs) -> T) -> T {
        let mut state = self.state.lock().expect("memory fs lock");
        f(&mut state)
    }

    pub(crate) fn rename(&self, from: &Path, to: &Path) {
        self.with_state(|fs| {
            let ino = fs.names.remove(from).expect("rename source exists");
            fs.names.insert(to.to_path_buf(), ino);
        });
    }

    pub(crate) fn remove(&self, path: &Path) {
        self.with_state(|fs| {
            fs.names.remove(path);
        });
    }

    pub(crate) fn set_fail_open(&self, fail: bool) {
        self.with_state(|fs| fs.fail_open = fail);
    }

    pub(crate) fn set_fail_identity(&self, fail: bool) {
        self.with_state(|fs| fs.fail_identity = fail);
    }

    pub(crate) fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        self.with_state(|fs| {
            let ino = fs.names.get(path)?;
            fs.contents.get(ino).cloned()
        })
    }

    pub(crate) fn open_count(&self) -> usize {
        self.with_state(|fs| fs.opens)
    }

    pub(crate) fn sync_count(&self, identity: FileIdentity) -> usize {
        self.with_state(|fs| fs.syncs.get(&identity.ino).copied().unwrap_or_default())
    }

    pub(crate) fn close_count(&self, identity: FileIdentity) -> usize {
        self.with_state(|fs| fs.closes.get(&identity.ino).map_or(0, Vec::len))
    }

    pub(crate) fn closed_at(&self, identity: FileIdentity) -> Option<Instant> {
        self.with_state(|fs| fs.closes.get(&identity.ino)?.first().copied())
    }
}

impl MemoryFs {
    fn ensure_open(&self, handle: &MemoryHandle) -> io::Result<()> {
        if self.closed_handles.contains(&handle.serial) {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        Ok(())
    }
}

impl FileBackend for MemoryBackend {
    type Handle = MemoryHandle;

    fn open_append(&self, path: &Path, _mode: u32) -> io::Result<MemoryHandle> {
        self.with_state(|fs| {
            if fs.fail_open {
                return Err(io::Error::from_raw_os_error(libc::ENOENT));
            }
            fs.opens += 1;
            fs.last_serial += 1;
            let serial = fs.last_serial;
            if let Some(ino) = fs.names.get(path) {
                return Ok(MemoryHandle { ino: *ino, serial });
            }
            fs.last_ino += 1;
            let ino = fs.last_ino;
            fs.names.insert(path.to_path_buf(), ino);
            fs.contents.insert(ino, Vec::new());
            Ok(MemoryHandle { ino, serial })
        })
    }

    fn path_identity(&self, path: &Path) -> Option<FileIdentity> {
        self.with_state(|fs| {
            fs.names
                .get(path)
                .map(|ino| FileIdentity::new(MEMORY_DEV, *ino))
        })
    }

    fn handle_identity(&self, handle: &MemoryHandle) -> io::Result<FileIdentity> {
        self.with_state(|fs| {
            if fs.fail_identity {
                return Err(io::Error::from_raw_os_error(libc::EIO));
            }
            fs.ensure_open(handle)?;
            Ok(FileIdentity::new(MEMORY_DEV, handle.ino))
        })
    }

    fn write(&self, handle: &MemoryHandle, buf: &[u8]) -> io::Result<usize> {
        self.with_state(|fs| {
            fs.ensure_open(handle)?;
            fs.contents.entry(handle.ino).or_default().extend_from_slice(buf);
            Ok(buf.len())
        })
    }

    fn write_at(&self, handle: &MemoryHandle, buf: &[u8], offset: u64) -> io::Result<usize> {
        self.with_state(|fs| {
            fs.ensure_open(handle)?;
            let data = fs.contents.entry(handle.ino).or_default();
            let start = usize::try_from(offset)
                .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
            let end = start + buf.len();
            if data.len() < end {
                data.resize(end, 0);
            }
            data[start..end].copy_from_slice(buf);
            Ok(buf.len())
        })
    }

    fn seek(&self, handle: &MemoryHandle, pos: SeekFrom) -> io::Result<u64> {
        self.with_state(|fs| {
            fs.ensure_open(handle)?;
            let len = fs.contents.get(&handle.ino).map_or(0, Vec::len) as i64;
            let target = match pos {
                SeekFrom::Start(offset) => return Ok(offset),
                SeekFrom::End(delta) => len + delta,
                SeekFrom::Current(delta) => delta,
            };
            u64::try_from(target).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))
        })
    }

    fn flush(&self, handle: &MemoryHandle) -> io::Result<()> {
        self.with_state(|fs| fs.ensure_open(handle))
    }

    fn sync(&self, handle: &MemoryHandle) -> io::Result<()> {
        self.with_state(|fs| {
            fs.ensure_open(handle)?;
            *fs.syncs.entry(handle.ino).or_default() += 1;
            Ok(())
        })
    }

    fn close(&self, handle: MemoryHandle) -> io::Result<()> {
        self.with_state(|fs| {
            fs.ensure_open(&handle)?;
            fs.closed_handles.insert(handle.serial);
            fs.closes.entry(handle.ino).or_default().push(Instant::now());
            Ok(())
        })
    }
}
