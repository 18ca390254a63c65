//! Support for structured logging.

use std::{
    io::IsTerminal,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

use crate::common::*;

/// The filter we use when `RUST_LOG` isn't set.
const DEFAULT_FILTER: &str = "csvsnap=info,warn";

/// How many rotated log files to keep around.
const MAX_LOG_FILES: usize = 5;

/// What log format we should use.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum LogFormat {
    /// Pretty, compact logs for humans.
    #[default]
    Indented,
    /// Single-line log entries with all fields on each line.
    Flat,
    /// JSON records.
    Json,
}

/// Keeps the background log file writer running. Log lines still buffered
/// when this is dropped get flushed.
#[must_use]
pub struct LogGuard(Option<WorkerGuard>);

impl LogFormat {
    /// Install a global subscriber which writes this format to `stderr`, and
    /// also writes flat logs to a daily-rotated `log_file` if we have one.
    ///
    /// Fails if a subscriber has already been installed.
    pub fn init(self, log_file: Option<&Path>) -> Result<LogGuard> {
        let filter = env_filter()?;
        let ansi = std::io::stderr().is_terminal();
        let stderr_layer = match self {
            LogFormat::Indented => fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_ansi(ansi)
                .with_target(false)
                .boxed(),
            LogFormat::Flat => fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .boxed(),
            LogFormat::Json => fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(std::io::stderr)
                .boxed(),
        };

        let (file_layer, guard) = match log_file {
            Some(path) => {
                let (writer, guard) = tracing_appender::non_blocking(file_appender(path)?);
                let layer = fmt::layer().with_writer(writer).with_ansi(false);
                (Some(layer), Some(guard))
            }
            None => (None, None),
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .with(file_layer)
            .try_init()
            .map_err(|err| format_err!("could not initialize logging: {}", err))?;
        Ok(LogGuard(guard))
    }
}

/// Open a log file at `path` which rotates daily and keeps the last
/// [`MAX_LOG_FILES`] days.
fn file_appender(path: &Path) -> Result<RollingFileAppender> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| format_err!("log file {} has no usable file name", path.display()))?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_owned(),
        _ => PathBuf::from("."),
    };
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file_name)
        .max_log_files(MAX_LOG_FILES)
        .build(&dir)
        .with_context(|| format!("could not open log file {}", path.display()))
}

/// Build our filter from `RUST_LOG`, or use [`DEFAULT_FILTER`].
fn env_filter() -> Result<EnvFilter> {
    match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(&directives)
            .with_context(|| format!("invalid RUST_LOG {:?}", directives)),
        _ => Ok(EnvFilter::new(DEFAULT_FILTER)),
    }
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "indented" => Ok(LogFormat::Indented),
            "flat" => Ok(LogFormat::Flat),
            "json" => Ok(LogFormat::Json),
            _ => Err(format_err!("unknown log format: {}", s)),
        }
    }
}

#[test]
fn parses_log_formats() {
    assert_eq!("flat".parse::<LogFormat>().unwrap(), LogFormat::Flat);
    assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
    assert!("pretty".parse::<LogFormat>().is_err());
}

#[test]
fn log_files_are_created_next_to_the_given_path() {
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let mut appender = file_appender(&dir.path().join("serve.log")).unwrap();
    appender.write_all(b"hello\n").unwrap();
    appender.flush().unwrap();

    let names = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    assert_eq!(names.len(), 1);
    assert!(names[0].starts_with("serve.log"));
}

#[test]
fn log_paths_need_a_file_name() {
    assert!(file_appender(Path::new("/")).is_err());
}
