// Core modules implementing identity probing, handle swapping, and rotation watching.
pub mod backend;
pub mod error;
pub mod identity;
pub mod options;
pub(crate) mod slot;
#[cfg(test)]
pub(crate) mod testing;
pub(crate) mod watcher;
