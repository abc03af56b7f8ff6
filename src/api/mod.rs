//! Purpose: Define the public Rust API boundary for reappend.
//! Exports: `RotatingFile`, its options, the backend seam, identity and error types.
//! Role: Public, additive-only surface; hides the watcher and handle slot.
//! Invariants: This module is the only public path to the rotating file.
//! Invariants: Internal modules remain private and are not directly exposed.

mod rotating;

pub use crate::core::backend::{FileBackend, OsBackend};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::identity::{FileIdentity, identity_of_file, identity_of_path};
pub use crate::core::options::{
    DEFAULT_GRACE_PERIOD, DEFAULT_MODE, DEFAULT_POLL_INTERVAL, MIN_POLL_INTERVAL,
    RotatingFileOptions,
};
pub use rotating::RotatingFile;
