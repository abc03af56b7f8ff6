//! Purpose: Append-only file handles that keep writing across external log rotation.
//! Exports: `api` (stable surface), `core` (probe, backend, options, errors), `notice`.
//! Role: Library behind the `reappend` CLI harness and for embedding in services.
//! Invariants: Rotation is detected by polling file identity, never by fs notifications.
//! Invariants: Writers never block on rotation; superseded files close after a grace period.
pub mod api;
pub mod core;
pub mod notice;

pub use api::{Error, ErrorKind, RotatingFile, RotatingFileOptions};
