// Open-time configuration for rotating files, validated before any file is touched.
use std::time::Duration;

use crate::core::error::{Error, ErrorKind};

/// Polling faster than this is rejected; use a notification-based tool for tighter latency.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);
pub const DEFAULT_MODE: u32 = 0o644;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RotatingFileOptions {
    /// Permission bits used when the path has to be created.
    pub mode: u32,
    pub poll_interval: Duration,
    /// How long a superseded handle stays open after a reopen.
    pub grace_period: Duration,
}

impl RotatingFileOptions {
    pub fn new(mode: u32) -> Self {
        Self {
            mode,
            poll_interval: DEFAULT_POLL_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        validate_poll_interval(self.poll_interval)
    }
}

impl Default for RotatingFileOptions {
    fn default() -> Self {
        Self::new(DEFAULT_MODE)
    }
}

pub(crate) fn validate_poll_interval(poll_interval: Duration) -> Result<(), Error> {
    if poll_interval < MIN_POLL_INTERVAL {
        return Err(Error::new(ErrorKind::Usage)
            .with_message(format!(
                "poll interval {poll_interval:?} is below the {MIN_POLL_INTERVAL:?} minimum"
            ))
            .with_hint("Use an interval of at least 100ms."));
    }
    Ok(())
}
