//! Process logging bootstrap.
//!
//! # Responsibility
//! - Start size-rotated file logging once per process, optionally
//!   duplicated to stderr for the server and CLI.
//! - Capture panics as sanitized log events.
//!
//! # Invariants
//! - Re-initializing with identical options is a no-op; any differing
//!   setting is rejected.
//! - Initialization never panics.
//! - Log lines carry ids and counts, never PII or ciphertext.

use flexi_logger::{
    Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming, WriteMode,
};
use log::{error, info};
use once_cell::sync::OnceCell;
use std::any::Any;
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "relcrm";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;
const MAX_PANIC_PAYLOAD_CHARS: usize = 160;
const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

struct ActiveLogger {
    status: LoggingStatus,
    _handle: LoggerHandle,
}

/// Logging settings, usually taken from `CrmConfig`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingOptions {
    pub level: String,
    /// Absolute directory for rotated log files.
    pub log_dir: PathBuf,
    /// Mirror records at `level` to stderr as well.
    pub to_stderr: bool,
}

/// Settings of the running logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingStatus {
    pub level: &'static str,
    pub log_dir: PathBuf,
    pub to_stderr: bool,
}

/// Initializes process logging.
///
/// # Errors
/// - Unsupported level, empty or relative directory.
/// - Directory creation or logger backend failure.
/// - A conflicting earlier initialization.
pub fn init_logging(options: &LoggingOptions) -> Result<(), String> {
    let wanted = LoggingStatus {
        level: parse_level(&options.level)?,
        log_dir: absolute_dir(&options.log_dir)?,
        to_stderr: options.to_stderr,
    };

    let active = ACTIVE.get_or_try_init(|| start_logger(&wanted))?;
    ensure_compatible(&active.status, &wanted)
}

/// Settings of the active logger, if one was started.
pub fn logging_status() -> Option<LoggingStatus> {
    ACTIVE.get().map(|active| active.status.clone())
}

/// `debug` for debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn start_logger(status: &LoggingStatus) -> Result<ActiveLogger, String> {
    std::fs::create_dir_all(&status.log_dir).map_err(|err| {
        format!(
            "cannot create log directory `{}`: {err}",
            status.log_dir.display()
        )
    })?;

    let files = FileSpec::default()
        .directory(status.log_dir.as_path())
        .basename(LOG_FILE_BASENAME);
    let handle = Logger::try_with_str(status.level)
        .map_err(|err| format!("invalid log level `{}`: {err}", status.level))?
        .log_to_file(files)
        .rotate(
            Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(MAX_LOG_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .duplicate_to_stderr(stderr_duplicate(status))
        .format_for_stderr(flexi_logger::default_format)
        .start()
        .map_err(|err| format!("logger backend failed to start: {err}"))?;

    install_panic_hook();
    info!(
        "event=logging_init module=core status=ok version={} os={} level={} log_dir={} stderr={}",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        status.level,
        status.log_dir.display(),
        status.to_stderr
    );

    Ok(ActiveLogger {
        status: status.clone(),
        _handle: handle,
    })
}

fn ensure_compatible(active: &LoggingStatus, wanted: &LoggingStatus) -> Result<(), String> {
    if active == wanted {
        return Ok(());
    }
    Err(format!(
        "logging already running with level={} log_dir=`{}` stderr={}; refusing to switch to level={} log_dir=`{}` stderr={}",
        active.level,
        active.log_dir.display(),
        active.to_stderr,
        wanted.level,
        wanted.log_dir.display(),
        wanted.to_stderr
    ))
}

fn stderr_duplicate(status: &LoggingStatus) -> Duplicate {
    if !status.to_stderr {
        return Duplicate::None;
    }
    match status.level {
        "trace" => Duplicate::Trace,
        "debug" => Duplicate::Debug,
        "info" => Duplicate::Info,
        "warn" => Duplicate::Warn,
        _ => Duplicate::Error,
    }
}

fn parse_level(level: &str) -> Result<&'static str, String> {
    let wanted = level.trim().to_ascii_lowercase();
    let wanted = if wanted == "warning" { "warn" } else { wanted.as_str() };
    LEVELS
        .iter()
        .copied()
        .find(|known| *known == wanted)
        .ok_or_else(|| {
            format!(
                "unsupported log level `{wanted}`; expected one of {}",
                LEVELS.join("|")
            )
        })
}

fn absolute_dir(log_dir: &Path) -> Result<PathBuf, String> {
    if log_dir.as_os_str().is_empty() {
        return Err("log_dir must not be empty".to_string());
    }
    if log_dir.is_relative() {
        return Err(format!(
            "log_dir must be absolute, got `{}`",
            log_dir.display()
        ));
    }
    Ok(log_dir.to_path_buf())
}

fn install_panic_hook() {
    PANIC_HOOK.get_or_init(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let location = info.location().map_or_else(
                || "unknown".to_string(),
                |loc| format!("{}:{}", loc.file(), loc.line()),
            );
            error!(
                "event=panic module=core status=error location={} payload={}",
                location,
                panic_payload(info.payload())
            );
            previous(info);
        }));
    });
}

fn panic_payload(payload: &(dyn Any + Send)) -> String {
    let text = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload");
    single_line(text, MAX_PANIC_PAYLOAD_CHARS)
}

/// Flattens line breaks and caps the length at `max_chars`.
fn single_line(value: &str, max_chars: usize) -> String {
    let mut line: String = value
        .chars()
        .take(max_chars)
        .map(|ch| if matches!(ch, '\n' | '\r') { ' ' } else { ch })
        .collect();
    if value.chars().nth(max_chars).is_some() {
        line.push_str("...");
    }
    line
}

#[cfg(test)]
mod tests {
    use super::{
        absolute_dir, init_logging, logging_status, parse_level, single_line, stderr_duplicate,
        LoggingOptions, LoggingStatus,
    };
    use flexi_logger::Duplicate;
    use std::path::{Path, PathBuf};

    #[test]
    fn levels_are_case_insensitive_and_accept_warning() {
        assert_eq!(parse_level("INFO").unwrap(), "info");
        assert_eq!(parse_level(" warning ").unwrap(), "warn");
        assert!(parse_level("loud").unwrap_err().contains("trace|debug"));
    }

    #[test]
    fn relative_log_dir_is_rejected() {
        assert!(absolute_dir(Path::new("logs/dev"))
            .unwrap_err()
            .contains("absolute"));
        assert!(absolute_dir(Path::new("")).is_err());
    }

    #[test]
    fn stderr_follows_level_only_when_enabled() {
        let mut status = LoggingStatus {
            level: "warn",
            log_dir: PathBuf::from("/tmp"),
            to_stderr: true,
        };
        assert!(matches!(stderr_duplicate(&status), Duplicate::Warn));
        status.to_stderr = false;
        assert!(matches!(stderr_duplicate(&status), Duplicate::None));
    }

    #[test]
    fn single_line_flattens_and_truncates() {
        let line = single_line("line1\nline2\rline3", 8);
        assert_eq!(line, "line1 li...");
        assert_eq!(single_line("short", 8), "short");
    }

    #[test]
    fn init_is_idempotent_and_rejects_conflicts() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let options = LoggingOptions {
            level: "info".to_string(),
            log_dir: first.path().to_path_buf(),
            to_stderr: false,
        };

        init_logging(&options).unwrap();
        init_logging(&options).unwrap();

        let level_conflict = init_logging(&LoggingOptions {
            level: "debug".to_string(),
            ..options.clone()
        });
        assert!(level_conflict.unwrap_err().contains("refusing to switch"));

        let dir_conflict = init_logging(&LoggingOptions {
            log_dir: second.path().to_path_buf(),
            ..options.clone()
        });
        assert!(dir_conflict.unwrap_err().contains("refusing to switch"));

        let status = logging_status().unwrap();
        assert_eq!(status.level, "info");
        assert_eq!(status.log_dir, first.path());
    }
}
