//! Purpose: Define a stable, structured schema for non-fatal stderr notices.
//! Exports: `Notice`, `notice_json`, `notice_from_error`.
//! Role: Shape watcher errors (failed reopen, failed identity lookup) for CLI diagnostics.
//! Invariants: Notices are non-fatal and never alter stdout payloads.
//! Invariants: JSON schema is stable once published; fields are additive-only.
use std::error::Error as StdError;

use serde_json::{Map, Value, json};

use crate::core::error::{Error, ErrorKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: String,
    pub time: String,
    pub cmd: String,
    pub path: String,
    pub message: String,
    pub details: Map<String, Value>,
}

pub fn notice_json(notice: &Notice) -> Value {
    json!({
        "notice": {
            "kind": notice.kind,
            "time": notice.time,
            "cmd": notice.cmd,
            "path": notice.path,
            "message": notice.message,
            "details": notice.details,
        }
    })
}

/// Turns an error delivered to a rotating file's error handler into a notice.
pub fn notice_from_error(err: &Error, cmd: &str, time: String) -> Notice {
    let kind = match err.kind() {
        ErrorKind::Reopen => "reopen_failed",
        ErrorKind::IdentityLookup => "identity_lookup_failed",
        ErrorKind::Io => "sync_failed",
        _ => "error",
    };
    let mut details = Map::new();
    details.insert("error_kind".to_string(), json!(format!("{:?}", err.kind())));
    if let Some(source) = err.source() {
        details.insert("cause".to_string(), json!(source.to_string()));
    }
    Notice {
        kind: kind.to_string(),
        time,
        cmd: cmd.to_string(),
        path: err
            .path()
            .map(|path| path.display().to_string())
            .unwrap_or_default(),
        message: err.message().unwrap_or("watcher error").to_string(),
        details,
    }
}
