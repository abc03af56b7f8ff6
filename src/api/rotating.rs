//! Purpose: Public append-only file handle that survives external log rotation.
//! Exports: `RotatingFile`.
//! Role: Writer facade plus lifecycle; delegates every call to the currently active handle.
//! Invariants: Each writer call loads the active handle once and never re-reads it mid-call.
//! Invariants: Writer calls never block on the watcher; only `close` joins it.
//! Invariants: The watcher owns the terminal flush-and-close; `close` waits for it.
use std::fmt;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

use crate::core::backend::{FileBackend, OsBackend};
use crate::core::error::{Error, ErrorKind};
use crate::core::options::RotatingFileOptions;
use crate::core::watcher::{Shared, Watcher};

/// An append-only file that reopens its path when the file behind it is rotated away.
///
/// A background thread polls the path every [`poll_interval`](Self::poll_interval). When the
/// path no longer resolves to the file currently open (renamed, unlinked, replaced) a new
/// file is opened at the same path and swapped in without blocking writers. The previous
/// file is synced right away and closed after the configured grace period, so writes that
/// raced with the swap still land in it.
///
/// Writes between the rotation and the next poll go to the old file. That window is bounded
/// by the poll interval, not eliminated.
///
/// `RotatingFile` is `Sync`; share it between threads with an `Arc` and write through
/// `&RotatingFile`.
pub struct RotatingFile<B: FileBackend = OsBackend> {
    shared: Arc<Shared<B>>,
    watcher: Mutex<Option<JoinHandle<io::Result<()>>>>,
}

impl RotatingFile<OsBackend> {
    /// Opens `path` for appending, creating it with `mode` if needed, with default options.
    pub fn open(path: impl AsRef<Path>, mode: u32) -> Result<Self, Error> {
        Self::open_with(path, RotatingFileOptions::new(mode))
    }

    pub fn open_with(path: impl AsRef<Path>, options: RotatingFileOptions) -> Result<Self, Error> {
        Self::open_with_backend(path, options, OsBackend)
    }
}

impl<B: FileBackend> RotatingFile<B> {
    pub fn open_with_backend(
        path: impl AsRef<Path>,
        options: RotatingFileOptions,
        backend: B,
    ) -> Result<Self, Error> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();
        let handle = backend
            .open_append(&path, options.mode)
            .map_err(|err| Error::from_io(err, &path, "failed to open file for append"))?;
        let identity = backend
            .handle_identity(&handle)
            .map_err(|err| Error::from_io(err, &path, "failed to read identity of opened file"))?;

        let shared = Arc::new(Shared::new(path, &options, backend, handle));
        let watcher = Watcher::new(Arc::clone(&shared), identity)
            .spawn()
            .map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to start watcher thread")
                    .with_path(&shared.path)
                    .with_source(err)
            })?;

        Ok(Self {
            shared,
            watcher: Mutex::new(Some(watcher)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn poll_interval(&self) -> Duration {
        self.shared.poll_interval()
    }

    /// Changes how often the path is checked. Values under 100ms are rejected and the
    /// current interval is kept. The new value applies from the next wait.
    pub fn set_poll_interval(&self, poll_interval: Duration) -> Result<(), Error> {
        self.shared.set_poll_interval(poll_interval)
    }

    /// Replaces the handler for non-fatal watcher errors (failed reopen, failed identity
    /// lookup, failed sync of a superseded file).
    ///
    /// The handler runs on the watcher thread. A slow handler delays the next poll. Calling
    /// [`close`](Self::close) from the handler only signals the watcher; the final sync and
    /// close run after the handler returns, and their errors are not reported.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        self.shared.set_error_handler(Box::new(handler));
    }

    /// Asks the watcher to reopen the path on its next tick even if the file did not change.
    pub fn request_reopen(&self) {
        self.shared.reopen_flag().store(true, Ordering::Release);
    }

    /// The flag behind [`request_reopen`](Self::request_reopen), suitable for
    /// `signal_hook::flag::register`.
    pub fn reopen_flag(&self) -> Arc<AtomicBool> {
        self.shared.reopen_flag()
    }

    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let handle = self.active()?;
        self.shared.backend.write(&handle, buf)
    }

    pub fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        let handle = self.active()?;
        self.shared.backend.write_at(&handle, buf, offset)
    }

    pub fn seek(&self, pos: SeekFrom) -> io::Result<u64> {
        let handle = self.active()?;
        self.shared.backend.seek(&handle, pos)
    }

    pub fn flush(&self) -> io::Result<()> {
        let handle = self.active()?;
        self.shared.backend.flush(&handle)
    }

    pub fn sync(&self) -> io::Result<()> {
        let handle = self.active()?;
        self.shared.backend.sync(&handle)
    }

    /// Stops the watcher and returns the result of its final sync and close of the active
    /// file. Files superseded by earlier rotations still close after their grace period.
    pub fn close(&self) -> io::Result<()> {
        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(watcher) = watcher else {
            return Err(self.closed_error());
        };
        self.shared.mark_closed();
        if watcher.thread().id() == thread::current().id() {
            // Called from the error handler: the watcher finishes the close once it returns.
            debug!(path = %self.shared.path.display(), "close requested from watcher thread");
            return Ok(());
        }
        match watcher.join() {
            Ok(result) => result,
            Err(_) => Err(Error::new(ErrorKind::Internal)
                .with_message("watcher thread panicked")
                .with_path(&self.shared.path)
                .into()),
        }
    }

    fn active(&self) -> io::Result<Arc<B::Handle>> {
        self.shared.slot.load().ok_or_else(|| self.closed_error())
    }

    fn closed_error(&self) -> io::Error {
        Error::new(ErrorKind::Closed)
            .with_message("file is closed")
            .with_path(&self.shared.path)
            .into()
    }
}

impl<B: FileBackend> Drop for RotatingFile<B> {
    fn drop(&mut self) {
        let pending = self
            .watcher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        if pending {
            if let Err(err) = self.close() {
                debug!(path = %self.shared.path.display(), error = %err, "close on drop failed");
            }
        }
    }
}

impl<B: FileBackend> fmt::Debug for RotatingFile<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotatingFile")
            .field("path", &self.shared.path)
            .field("poll_interval", &self.shared.poll_interval())
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}

impl<B: FileBackend> Write for &RotatingFile<B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        RotatingFile::write(*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        RotatingFile::flush(*self)
    }
}

impl<B: FileBackend> Write for RotatingFile<B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        RotatingFile::write(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        RotatingFile::flush(self)
    }
}

impl<B: FileBackend> Seek for &RotatingFile<B> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        RotatingFile::seek(*self, pos)
    }
}

impl<B: FileBackend> Seek for RotatingFile<B> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        RotatingFile::seek(self, pos)
    }
}

#[cfg(test)]
mod tests {
    use super::RotatingFile;
    use crate::core::backend::FileBackend;
    use crate::core::error::{Error, ErrorKind};
    use crate::core::options::RotatingFileOptions;
    use crate::core::testing::MemoryBackend;
    use std::io::{self, SeekFrom, Write};
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    fn options() -> RotatingFileOptions {
        RotatingFileOptions::new(0o644)
            .with_poll_interval(Duration::from_millis(100))
            .with_grace_period(Duration::ZERO)
    }

    fn open_memory(backend: &MemoryBackend) -> RotatingFile<MemoryBackend> {
        RotatingFile::open_with_backend("/logs/app.log", options(), backend.clone()).expect("open")
    }

    fn closed_kind(err: &io::Error) -> Option<ErrorKind> {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<Error>())
            .map(Error::kind)
    }

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        done()
    }

    #[test]
    fn poll_interval_below_floor_is_rejected_and_previous_kept() {
        let backend = MemoryBackend::default();
        let file = open_memory(&backend);

        file.set_poll_interval(Duration::from_millis(250))
            .expect("valid interval");
        let err = file
            .set_poll_interval(Duration::from_millis(99))
            .expect_err("too fast");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(file.poll_interval(), Duration::from_millis(250));
        file.close().expect("close");
    }

    #[test]
    fn open_rejects_too_fast_poll_interval() {
        let backend = MemoryBackend::default();
        let options = options().with_poll_interval(Duration::from_millis(10));
        let err = RotatingFile::open_with_backend("/logs/app.log", options, backend.clone())
            .expect_err("rejected");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(backend.open_count(), 0);
    }

    #[test]
    fn open_failure_is_classified() {
        let backend = MemoryBackend::default();
        backend.set_fail_open(true);
        let err = RotatingFile::open_with_backend("/logs/app.log", options(), backend)
            .expect_err("open fails");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.path(), Some(Path::new("/logs/app.log")));
    }

    #[test]
    fn identity_failure_at_open_is_fatal() {
        let backend = MemoryBackend::default();
        backend.set_fail_identity(true);
        let err = RotatingFile::open_with_backend("/logs/app.log", options(), backend)
            .expect_err("identity fails");
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn writer_calls_delegate_to_active_handle() {
        let backend = MemoryBackend::default();
        let mut file = open_memory(&backend);

        file.write_all(b"hello ").expect("write");
        (&file).write_all(b"world\n").expect("write through shared ref");
        assert_eq!(file.write_at(b"J", 0).expect("write_at"), 1);
        assert_eq!(file.seek(SeekFrom::End(0)).expect("seek"), 12);
        file.flush().expect("flush");
        file.sync().expect("sync");

        let path = Path::new("/logs/app.log");
        assert_eq!(backend.contents(path).as_deref(), Some(&b"Jello world\n"[..]));
        file.close().expect("close");
    }

    #[test]
    fn writes_follow_rotation() {
        let backend = MemoryBackend::default();
        let file = open_memory(&backend);
        let path = Path::new("/logs/app.log");
        let rotated = Path::new("/logs/app.log.1");
        let first = backend.path_identity(path).expect("identity");

        file.write(b"r1\n").expect("write");
        backend.rename(path, rotated);
        // The superseded handle is synced right after the swap.
        assert!(wait_until(|| backend.sync_count(first) == 1));
        file.write(b"r2\n").expect("write");

        assert_eq!(backend.contents(rotated).as_deref(), Some(&b"r1\n"[..]));
        assert_eq!(backend.contents(path).as_deref(), Some(&b"r2\n"[..]));
        file.close().expect("close");
    }

    #[test]
    fn request_reopen_is_served_by_watcher() {
        let backend = MemoryBackend::default();
        let file = open_memory(&backend);

        file.request_reopen();
        assert!(wait_until(|| backend.open_count() == 2));
        file.write(b"still fine\n").expect("write");
        file.close().expect("close");
    }

    #[test]
    fn error_handler_receives_reopen_failures() {
        let backend = MemoryBackend::default();
        let file = open_memory(&backend);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        file.set_error_handler(move |err| sink.lock().expect("lock").push(err.kind()));

        backend.set_fail_open(true);
        backend.remove(Path::new("/logs/app.log"));
        assert!(wait_until(|| seen.lock().expect("lock").len() >= 2));
        file.write(b"old handle keeps working\n").expect("write");
        file.close().expect("close");

        let seen = seen.lock().expect("lock");
        assert!(seen.iter().all(|kind| *kind == ErrorKind::Reopen));
    }

    #[test]
    fn close_from_error_handler_finishes_on_watcher() {
        let backend = MemoryBackend::default();
        let file = Arc::new(open_memory(&backend));
        let path = Path::new("/logs/app.log");
        let identity = backend.path_identity(path).expect("identity");

        let weak = Arc::downgrade(&file);
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&results);
        file.set_error_handler(move |_| {
            if let Some(file) = weak.upgrade() {
                sink.lock().expect("lock").push(file.close().is_ok());
            }
        });

        backend.set_fail_open(true);
        backend.remove(path);
        assert!(wait_until(|| backend.close_count(identity) == 1));

        assert_eq!(*results.lock().expect("lock"), vec![true]);
        let err = file.write(b"late").expect_err("closed");
        assert_eq!(closed_kind(&err), Some(ErrorKind::Closed));
        let err = file.close().expect_err("already closed");
        assert_eq!(closed_kind(&err), Some(ErrorKind::Closed));
    }

    #[test]
    fn close_is_terminal() {
        let backend = MemoryBackend::default();
        let file = open_memory(&backend);
        let identity = backend
            .path_identity(Path::new("/logs/app.log"))
            .expect("identity");

        file.close().expect("close");
        assert_eq!(backend.close_count(identity), 1);
        assert_eq!(backend.sync_count(identity), 1);

        let err = file.write(b"late").expect_err("closed");
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(closed_kind(&err), Some(ErrorKind::Closed));
        let err = file.close().expect_err("second close");
        assert_eq!(closed_kind(&err), Some(ErrorKind::Closed));
        assert_eq!(backend.close_count(identity), 1);
    }

    #[test]
    fn drop_closes_active_handle() {
        let backend = MemoryBackend::default();
        let file = open_memory(&backend);
        let identity = backend
            .path_identity(Path::new("/logs/app.log"))
            .expect("identity");
        drop(file);
        assert_eq!(backend.close_count(identity), 1);
    }
}
