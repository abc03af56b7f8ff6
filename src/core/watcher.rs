//! Purpose: Detect rotation of a watched path and swap in a fresh handle.
//! Exports: `Shared`, `Watcher`, `TickOutcome`, `ErrorHandler`.
//! Role: Background poller; the only code that replaces the active handle.
//! Invariants: A probe failure and an identity mismatch both trigger a reopen.
//! Invariants: A failed reopen leaves the active handle untouched and is retried next tick.
//! Invariants: Superseded handles are synced at once and closed only after the grace period.
//! Invariants: After close is signalled no reopen happens; the watcher closes the last handle.
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use arc_swap::ArcSwap;
use tracing::{debug, info, warn};

use crate::core::backend::FileBackend;
use crate::core::error::{Error, ErrorKind};
use crate::core::identity::FileIdentity;
use crate::core::options::{RotatingFileOptions, validate_poll_interval};
use crate::core::slot::HandleSlot;

pub(crate) type ErrorHandler = Box<dyn Fn(Error) + Send + Sync>;

/// State shared between writer calls and the watcher thread.
pub(crate) struct Shared<B: FileBackend> {
    pub(crate) path: PathBuf,
    pub(crate) mode: u32,
    pub(crate) backend: B,
    pub(crate) slot: HandleSlot<B::Handle>,
    poll_interval_ns: AtomicU64,
    grace_period: Duration,
    on_error: ArcSwap<ErrorHandler>,
    reopen_requested: Arc<AtomicBool>,
    closed: Mutex<bool>,
    wake: Condvar,
}

impl<B: FileBackend> Shared<B> {
    pub(crate) fn new(
        path: PathBuf,
        options: &RotatingFileOptions,
        backend: B,
        handle: B::Handle,
    ) -> Self {
        let noop: ErrorHandler = Box::new(|_| {});
        Self {
            path,
            mode: options.mode,
            backend,
            slot: HandleSlot::new(Arc::new(handle)),
            poll_interval_ns: AtomicU64::new(duration_to_nanos(options.poll_interval)),
            grace_period: options.grace_period,
            on_error: ArcSwap::from_pointee(noop),
            reopen_requested: Arc::new(AtomicBool::new(false)),
            closed: Mutex::new(false),
            wake: Condvar::new(),
        }
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        Duration::from_nanos(self.poll_interval_ns.load(Ordering::Relaxed))
    }

    pub(crate) fn set_poll_interval(&self, poll_interval: Duration) -> Result<(), Error> {
        validate_poll_interval(poll_interval)?;
        self.poll_interval_ns
            .store(duration_to_nanos(poll_interval), Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn set_error_handler(&self, handler: ErrorHandler) {
        self.on_error.store(Arc::new(handler));
    }

    pub(crate) fn reopen_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.reopen_requested)
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn mark_closed(&self) {
        let mut closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
        *closed = true;
        drop(closed);
        self.wake.notify_all();
    }

    /// Sleeps for `timeout` unless close is signalled first; returns whether it was.
    fn wait(&self, timeout: Duration) -> bool {
        let closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
        let (closed, _) = self
            .wake
            .wait_timeout_while(closed, timeout, |closed| !*closed)
            .unwrap_or_else(PoisonError::into_inner);
        *closed
    }

    /// Runs the caller's handler on the current thread; a slow handler delays polling.
    fn report(&self, err: Error) {
        warn!(path = %self.path.display(), error = %err, "rotating file error");
        let handler = self.on_error.load_full();
        (*handler)(err);
    }
}

fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum TickOutcome {
    Unchanged,
    Reopened,
    ReopenFailed,
    Skipped,
}

pub(crate) struct Watcher<B: FileBackend> {
    shared: Arc<Shared<B>>,
    recorded: FileIdentity,
}

impl<B: FileBackend> Watcher<B> {
    pub(crate) fn new(shared: Arc<Shared<B>>, recorded: FileIdentity) -> Self {
        Self { shared, recorded }
    }

    pub(crate) fn spawn(self) -> io::Result<JoinHandle<io::Result<()>>> {
        thread::Builder::new()
            .name("reappend-watcher".to_string())
            .spawn(move || self.run())
    }

    #[cfg(test)]
    pub(crate) fn recorded(&self) -> FileIdentity {
        self.recorded
    }

    fn run(mut self) -> io::Result<()> {
        info!(path = %self.shared.path.display(), "watcher started");
        while !self.shared.wait(self.shared.poll_interval()) {
            self.tick();
        }
        let result = self.shutdown();
        info!(path = %self.shared.path.display(), ok = result.is_ok(), "watcher stopped");
        result
    }

    pub(crate) fn tick(&mut self) -> TickOutcome {
        let forced = self.shared.reopen_requested.swap(false, Ordering::AcqRel);
        match self.shared.backend.path_identity(&self.shared.path) {
            Some(observed) if observed == self.recorded => {
                if !forced {
                    return TickOutcome::Unchanged;
                }
                debug!(path = %self.shared.path.display(), "reopen requested");
            }
            Some(observed) => {
                debug!(
                    path = %self.shared.path.display(),
                    ?observed,
                    recorded = ?self.recorded,
                    "identity changed"
                );
            }
            None => {
                debug!(path = %self.shared.path.display(), "path does not resolve");
            }
        }
        let outcome = self.reopen();
        if forced && outcome == TickOutcome::ReopenFailed {
            // The identity may still match, so keep the request pending for the next tick.
            self.shared.reopen_requested.store(true, Ordering::Release);
        }
        outcome
    }

    fn reopen(&mut self) -> TickOutcome {
        let shared = &self.shared;
        if shared.is_closed() {
            return TickOutcome::Skipped;
        }

        let handle = match shared.backend.open_append(&shared.path, shared.mode) {
            Ok(handle) => Arc::new(handle),
            Err(err) => {
                shared.report(
                    Error::new(ErrorKind::Reopen)
                        .with_message("failed to reopen file")
                        .with_path(&shared.path)
                        .with_source(err),
                );
                return TickOutcome::ReopenFailed;
            }
        };

        if let Some(previous) = shared.slot.store(Arc::clone(&handle)) {
            if let Err(err) = shared.backend.sync(&previous) {
                shared.report(
                    Error::new(ErrorKind::Io)
                        .with_message("failed to sync superseded handle")
                        .with_path(&shared.path)
                        .with_source(err),
                );
            }
            schedule_close(shared.backend.clone(), previous, shared.grace_period);
        }

        match shared.backend.handle_identity(&handle) {
            Ok(identity) => {
                info!(
                    path = %shared.path.display(),
                    previous = ?self.recorded,
                    current = ?identity,
                    "reopened file"
                );
                self.recorded = identity;
            }
            Err(err) => {
                shared.report(
                    Error::new(ErrorKind::IdentityLookup)
                        .with_message("failed to read identity of reopened file")
                        .with_path(&shared.path)
                        .with_source(err),
                );
            }
        }
        TickOutcome::Reopened
    }

    /// Flushes and closes the active handle; later writer calls see an empty slot.
    pub(crate) fn shutdown(&mut self) -> io::Result<()> {
        let Some(handle) = self.shared.slot.take() else {
            return Ok(());
        };
        let synced = self.shared.backend.sync(&handle);
        let closed = close_when_unshared(&self.shared.backend, handle);
        synced.and(closed)
    }
}

fn schedule_close<B: FileBackend>(backend: B, handle: Arc<B::Handle>, grace_period: Duration) {
    let spawned = thread::Builder::new()
        .name("reappend-close".to_string())
        .spawn(move || {
            thread::sleep(grace_period);
            if let Err(err) = close_when_unshared(&backend, handle) {
                warn!(error = %err, "failed to close superseded handle");
            }
        });
    if let Err(err) = spawned {
        warn!(error = %err, "failed to schedule deferred close; handle closes on last release");
    }
}

// A writer still holding the handle drops the last reference, which closes it.
fn close_when_unshared<B: FileBackend>(backend: &B, handle: Arc<B::Handle>) -> io::Result<()> {
    match Arc::try_unwrap(handle) {
        Ok(handle) => backend.close(handle),
        Err(_) => Ok(()),
    }
}
