//! Process-wide logging bootstrap.
//!
//! # Responsibility
//! - Start the rolling file logger once per process.
//! - Capture panics into the log as sanitized one-line events.
//!
//! # Invariants
//! - Repeating `init_logging` with the same level and directory is a no-op.
//! - A second call with a different level or directory is rejected.
//! - Initialization reports failures as errors and never panics.
//! - Log lines carry metadata only: IDs, counts, states. Never titles or notes.

use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info};
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "timebox";
const ROTATE_AT_BYTES: u64 = 10 * 1024 * 1024;
const KEEP_LOG_FILES: usize = 5;
const PANIC_PAYLOAD_LIMIT: usize = 160;

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

struct ActiveLogger {
    level: &'static str,
    dir: PathBuf,
    _handle: LoggerHandle,
}

impl ActiveLogger {
    fn ensure_same(&self, level: &'static str, dir: &Path) -> Result<(), String> {
        if self.dir != dir {
            return Err(format!(
                "logging already initialized at `{}`; refusing to switch to `{}`",
                self.dir.display(),
                dir.display()
            ));
        }
        if self.level != level {
            return Err(format!(
                "logging already initialized with level `{}`; refusing to switch to `{level}`",
                self.level
            ));
        }
        Ok(())
    }
}

/// Starts file logging under `log_dir` at `level`.
///
/// # Errors
/// - Unknown level names.
/// - Blank or relative `log_dir`, or a directory that cannot be created.
/// - Conflicting re-initialization, or a logger backend failure.
pub fn init_logging(level: &str, log_dir: &str) -> Result<(), String> {
    let level = parse_level(level)?;
    let dir = absolute_dir(log_dir)?;

    if let Some(active) = ACTIVE.get() {
        return active.ensure_same(level, &dir);
    }

    let active = ACTIVE.get_or_try_init(|| start_logger(level, &dir))?;
    active.ensure_same(level, &dir)
}

/// `(level, log_dir)` of the running logger, if any.
pub fn logging_status() -> Option<(&'static str, PathBuf)> {
    ACTIVE.get().map(|active| (active.level, active.dir.clone()))
}

/// `debug` for debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

pub(crate) fn parse_level(level: &str) -> Result<&'static str, String> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(format!(
            "unsupported log level `{other}`; expected trace|debug|info|warn|error"
        )),
    }
}

fn absolute_dir(log_dir: &str) -> Result<PathBuf, String> {
    let trimmed = log_dir.trim();
    if trimmed.is_empty() {
        return Err("log_dir cannot be empty".to_string());
    }
    let path = PathBuf::from(trimmed);
    if !path.is_absolute() {
        return Err(format!("log_dir must be an absolute path, got `{trimmed}`"));
    }
    Ok(path)
}

fn start_logger(level: &'static str, dir: &Path) -> Result<ActiveLogger, String> {
    std::fs::create_dir_all(dir)
        .map_err(|err| format!("failed to create log directory `{}`: {err}", dir.display()))?;

    let handle = Logger::try_with_str(level)
        .map_err(|err| format!("invalid log level `{level}`: {err}"))?
        .log_to_file(
            FileSpec::default()
                .directory(dir)
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(ROTATE_AT_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(KEEP_LOG_FILES),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(|err| format!("failed to start logger: {err}"))?;

    install_panic_hook();

    info!(
        "event=app_start module=core status=ok platform={} version={}",
        std::env::consts::OS,
        env!("CARGO_PKG_VERSION")
    );
    info!(
        "event=logging_init module=core status=ok level={level} log_dir={}",
        dir.display()
    );

    Ok(ActiveLogger {
        level,
        dir: dir.to_path_buf(),
        _handle: handle,
    })
}

fn install_panic_hook() {
    if PANIC_HOOK.set(()).is_err() {
        return;
    }

    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = if let Some(message) = info.payload().downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = info.payload().downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_string()
        };
        error!(
            "event=panic_captured module=core status=error location={location} payload={}",
            one_line(&payload, PANIC_PAYLOAD_LIMIT)
        );
        previous(info);
    }));
}

/// Flattens newlines and caps `value` at `limit` chars.
fn one_line(value: &str, limit: usize) -> String {
    let flat = value.replace(['\n', '\r'], " ");
    if flat.chars().count() <= limit {
        return flat;
    }
    let mut capped: String = flat.chars().take(limit).collect();
    capped.push_str("...");
    capped
}

#[cfg(test)]
mod tests {
    use super::{absolute_dir, init_logging, logging_status, one_line, parse_level};

    #[test]
    fn level_names_are_normalized() {
        assert_eq!(parse_level("INFO").expect("INFO"), "info");
        assert_eq!(parse_level(" warning ").expect("warning"), "warn");
        assert!(parse_level("verbose").is_err());
    }

    #[test]
    fn relative_log_dir_is_rejected() {
        let err = absolute_dir("logs/dev").expect_err("relative path must fail");
        assert!(err.contains("absolute"));
        assert!(absolute_dir("   ").is_err());
    }

    #[test]
    fn panic_payload_is_flattened_and_capped() {
        assert_eq!(one_line("a\nb", 10), "a b");
        let capped = one_line("line1\nline2\rline3", 8);
        assert_eq!(capped, "line1 li...");
    }

    #[test]
    fn second_init_must_match_the_first() {
        let first = tempfile::tempdir().expect("tempdir");
        let second = tempfile::tempdir().expect("tempdir");
        let first_dir = first.path().to_str().expect("utf-8 path").to_string();
        let second_dir = second.path().to_str().expect("utf-8 path").to_string();

        init_logging("info", &first_dir).expect("first init");
        init_logging("INFO", &first_dir).expect("same config is idempotent");

        let level_err = init_logging("debug", &first_dir).expect_err("level conflict");
        assert!(level_err.contains("refusing to switch"));
        let dir_err = init_logging("info", &second_dir).expect_err("dir conflict");
        assert!(dir_err.contains("refusing to switch"));

        let (level, dir) = logging_status().expect("logger active");
        assert_eq!(level, "info");
        assert_eq!(dir, first.path());
    }
}
