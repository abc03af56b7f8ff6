//! Purpose: Hold top-level CLI command dispatch for `reappend`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Every opened `RotatingFile` is closed explicitly so close errors surface.
//! Invariants: Watcher errors become notices on stderr and never abort a command.

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use reappend::api::{FileIdentity, RotatingFile, RotatingFileOptions, identity_of_path};
use reappend::notice::notice_from_error;
use serde::Serialize;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};

use super::*;

#[derive(Serialize)]
struct IdentityReport {
    path: String,
    #[serde(flatten)]
    identity: FileIdentity,
}

pub(super) fn dispatch_command(command: Command, color_mode: ColorMode) -> Result<(), Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "reappend", &mut io::stdout());
            Ok(())
        }
        Command::Version => {
            emit_json(json!({
                "name": "reappend",
                "version": env!("CARGO_PKG_VERSION"),
            }));
            Ok(())
        }
        Command::Identity { path } => {
            let Some(identity) = identity_of_path(&path) else {
                return Err(Error::new(ErrorKind::NotFound)
                    .with_message("path does not resolve to a file")
                    .with_path(&path)
                    .with_hint("The file may be mid-rotation; retry after the writer reopens it."));
            };
            let report = IdentityReport {
                path: path.display().to_string(),
                identity,
            };
            let value = serde_json::to_value(&report).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to encode identity")
                    .with_source(err)
            })?;
            emit_json(value);
            Ok(())
        }
        Command::Write { path, open } => {
            let file = open_rotating(&path, &open, "write", color_mode)?;
            let (lines, bytes) = copy_lines(&file, io::stdin().lock())
                .map_err(|err| Error::from_io(err, &path, "failed to copy stdin"))?;
            file.close()
                .map_err(|err| Error::from_io(err, &path, "failed to close file"))?;
            emit_json(json!({
                "path": path.display().to_string(),
                "lines": lines,
                "bytes": bytes,
            }));
            Ok(())
        }
        Command::Stamp {
            path,
            count,
            every_ms,
            open,
        } => {
            let stop = Arc::new(AtomicBool::new(false));
            for signal in [SIGINT, SIGTERM] {
                signal_hook::flag::register(signal, Arc::clone(&stop)).map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to install signal handler")
                        .with_source(err)
                })?;
            }
            let file = open_rotating(&path, &open, "stamp", color_mode)?;
            let every = Duration::from_millis(every_ms);
            let mut written = 0u64;
            while written < count && !stop.load(Ordering::Relaxed) {
                let record = format!("{written:08}\n");
                (&file)
                    .write_all(record.as_bytes())
                    .map_err(|err| Error::from_io(err, &path, "failed to write record"))?;
                written += 1;
                if !every.is_zero() {
                    thread::sleep(every);
                }
            }
            file.close()
                .map_err(|err| Error::from_io(err, &path, "failed to close file"))?;
            emit_json(json!({
                "path": path.display().to_string(),
                "written": written,
                "interrupted": written < count,
            }));
            Ok(())
        }
    }
}

fn open_rotating(
    path: &Path,
    open: &OpenArgs,
    cmd: &'static str,
    color_mode: ColorMode,
) -> Result<RotatingFile, Error> {
    let options = RotatingFileOptions::new(open.mode)
        .with_poll_interval(Duration::from_millis(open.poll_interval_ms));
    let file = RotatingFile::open_with(path, options)?;
    file.set_error_handler(move |err| {
        emit_notice(&notice_from_error(&err, cmd, notice_time_now()), color_mode);
    });
    signal_hook::flag::register(SIGHUP, file.reopen_flag()).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to install SIGHUP handler")
            .with_source(err)
    })?;
    Ok(file)
}

// Each line goes out in a single write so concurrent appenders never interleave inside it.
fn copy_lines(file: &RotatingFile, mut input: impl BufRead) -> io::Result<(u64, u64)> {
    let mut line = Vec::new();
    let mut lines = 0u64;
    let mut bytes = 0u64;
    loop {
        line.clear();
        let read = input.read_until(b'\n', &mut line)?;
        if read == 0 {
            return Ok((lines, bytes));
        }
        let mut writer = file;
        writer.write_all(&line)?;
        lines += 1;
        bytes += read as u64;
    }
}
