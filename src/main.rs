//! Purpose: `reappend` CLI entry point; a harness around `RotatingFile`.
//! Role: Binary crate root; parses args, sets up tracing, runs commands.
//! Invariants: Commands emit JSON receipts on stdout; diagnostics go to stderr only.
//! Invariants: Non-interactive errors and notices are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
use std::error::Error as StdError;
use std::ffi::OsString;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};

use clap::{
    Args, CommandFactory, Parser, Subcommand, ValueEnum, ValueHint,
    error::ErrorKind as ClapErrorKind,
};
use clap_complete::aot::Shell;
use reappend::api::{Error, ErrorKind, to_exit_code};
use reappend::notice::{Notice, notice_json};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

mod command_dispatch;

fn main() {
    let exit_code = match run() {
        Ok(code) => code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

/// Returns the process exit code, or the error to report with the color mode in effect.
fn run() -> Result<i32, (Error, ColorMode)> {
    let cli = match Cli::try_parse_from(std::env::args_os().collect::<Vec<OsString>>()) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let bare = err.kind() == ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand;
                return Ok(if bare { 2 } else { 0 });
            }
            _ => {
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(clap_error_summary(&err))
                        .with_hint("Try `reappend --help`."),
                    ColorMode::Auto,
                ));
            }
        },
    };

    init_tracing();
    let color_mode = cli.color;
    command_dispatch::dispatch_command(cli.command, color_mode)
        .map(|()| 0)
        .map_err(|err| (add_io_hint(err), color_mode))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser)]
#[command(
    name = "reappend",
    version,
    about = "Append to files that survive log rotation",
    long_about = None,
    before_help = r#"Writes follow the path, not the file: when a rotation tool renames or
removes the file, the next poll reopens the path and writing continues there.
"#,
    after_help = r#"EXAMPLES
  $ my-service 2>&1 | reappend write /var/log/my-service.log
  $ reappend stamp /tmp/demo.log --count 5000 --every-ms 1
  $ reappend identity /var/log/my-service.log

SIGNALS
  SIGHUP   reopen the path on the next poll (write, stamp)
  SIGINT   stop early and close cleanly (stamp)"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Args, Clone, Debug)]
struct OpenArgs {
    #[arg(
        long,
        default_value = "644",
        value_parser = parse_mode,
        help = "Permission bits (octal) used when the file is created"
    )]
    mode: u32,
    #[arg(
        long,
        default_value_t = 1000,
        help = "How often to check the path for rotation, in milliseconds (min 100)"
    )]
    poll_interval_ms: u64,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Copy stdin lines into a rotation-safe file until EOF")]
    Write {
        #[arg(value_hint = ValueHint::FilePath)]
        path: PathBuf,
        #[command(flatten)]
        open: OpenArgs,
    },
    #[command(about = "Write zero-padded sequence records at a fixed cadence")]
    Stamp {
        #[arg(value_hint = ValueHint::FilePath)]
        path: PathBuf,
        #[arg(long, help = "Number of records to write")]
        count: u64,
        #[arg(long, default_value_t = 1, help = "Delay between records, in milliseconds")]
        every_ms: u64,
        #[command(flatten)]
        open: OpenArgs,
    },
    #[command(about = "Print the device and inode a path currently resolves to")]
    Identity {
        #[arg(value_hint = ValueHint::AnyPath)]
        path: PathBuf,
    },
    #[command(about = "Generate shell completions")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
    #[command(about = "Print version info")]
    Version,
}

fn parse_mode(value: &str) -> Result<u32, String> {
    let digits = value.strip_prefix("0o").unwrap_or(value);
    let mode = u32::from_str_radix(digits, 8)
        .map_err(|_| format!("`{value}` is not an octal permission mode"))?;
    if mode > 0o7777 {
        return Err(format!("`{value}` is out of range for a permission mode"));
    }
    Ok(mode)
}

fn add_io_hint(err: Error) -> Error {
    if err.hint().is_some() {
        return err;
    }
    match err.kind() {
        ErrorKind::Permission => err.with_hint(
            "Permission denied. Check the directory permissions or write somewhere else.",
        ),
        ErrorKind::NotFound => {
            err.with_hint("The parent directory must exist; reappend only creates the file.")
        }
        ErrorKind::Io => err.with_hint("I/O error. Check the path, filesystem, and disk space."),
        _ => err,
    }
}

// Receipts are single-line JSON so callers can parse stdout line by line.
fn emit_json(value: Value) {
    println!("{value}");
}

const RED: &str = "31";
const YELLOW: &str = "33";

fn paint(label: &str, enabled: bool, code: &str) -> String {
    if enabled {
        format!("\u{1b}[{code}m{label}\u{1b}[0m")
    } else {
        label.to_string()
    }
}

/// Writes `text` to a terminal stderr, `value` as one JSON line otherwise.
fn emit_diagnostic(color_mode: ColorMode, text: impl FnOnce(bool) -> String, value: Value) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", text(color_mode.use_color(is_tty)));
    } else {
        eprintln!("{value}");
    }
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    emit_diagnostic(color_mode, |color| error_text(err, color), error_json(err));
}

fn emit_notice(notice: &Notice, color_mode: ColorMode) {
    emit_diagnostic(
        color_mode,
        |color| {
            format!(
                "{} {} (path: {})",
                paint("notice:", color, YELLOW),
                notice.message,
                notice.path
            )
        },
        notice_json(notice),
    );
}

fn notice_time_now() -> String {
    use time::format_description::well_known::Rfc3339;
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

fn error_message(err: &Error) -> &str {
    err.message().unwrap_or(match err.kind() {
        ErrorKind::Internal => "internal error",
        ErrorKind::Usage => "usage error",
        ErrorKind::NotFound => "not found",
        ErrorKind::Permission => "permission denied",
        ErrorKind::Io => "i/o error",
        ErrorKind::Reopen => "reopen failed",
        ErrorKind::IdentityLookup => "identity lookup failed",
        ErrorKind::Closed => "file is closed",
    })
}

fn error_causes(err: &Error) -> Vec<String> {
    std::iter::successors(err.source(), |&cause| cause.source())
        .map(ToString::to_string)
        .collect()
}

fn error_json(err: &Error) -> Value {
    let mut body = json!({
        "kind": format!("{:?}", err.kind()),
        "message": error_message(err),
    });
    if let Some(hint) = err.hint() {
        body["hint"] = json!(hint);
    }
    if let Some(path) = err.path() {
        body["path"] = json!(path.display().to_string());
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        body["causes"] = json!(causes);
    }
    json!({ "error": body })
}

fn error_text(err: &Error, color: bool) -> String {
    let mut text = format!("{} {}", paint("error:", color, RED), error_message(err));
    if let Some(path) = err.path() {
        text.push_str(&format!("\n  path: {}", path.display()));
    }
    for cause in error_causes(err) {
        text.push_str(&format!("\n  caused by: {cause}"));
    }
    if let Some(hint) = err.hint() {
        text.push_str(&format!("\n{} {hint}", paint("hint:", color, YELLOW)));
    }
    text
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}
