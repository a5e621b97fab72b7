//! Tracing subscriber setup
//!
//! Console logs always go to stderr: stdout carries agent output and, in MCP
//! mode, the JSON-RPC stream. With `[logging] directory` set, a rolling text
//! log (and optionally a JSON log) is written there as well. Secrets in log
//! lines are masked unless `redact = false`.

use clap::ValueEnum;
use lastagent_core::{LogRotation, LoggingSettings};
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::io;
use std::path::Path;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const LOG_ENV: &str = "LASTAGENT_LOG";
pub const LOG_FORMAT_ENV: &str = "LASTAGENT_LOG_FORMAT";

/// Level for the log files when no filter is set in the environment
const FILE_LOG_LEVEL: &str = "info";
const LOG_FILE_PREFIX: &str = "lastagent";
const MAX_LOG_FILES: usize = 5;
const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    /// Explicit flag, else `LASTAGENT_LOG_FORMAT`, else text
    pub fn resolve(flag: Option<LogFormat>) -> Self {
        flag.or_else(|| {
            std::env::var(LOG_FORMAT_ENV)
                .ok()
                .and_then(|v| LogFormat::from_str(v.trim(), true).ok())
        })
        .unwrap_or_default()
    }
}

/// Filter from `LASTAGENT_LOG`, then `RUST_LOG`, then `default_level`
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Keeps the background file writers alive; logs are flushed when dropped
#[must_use = "file logs stop when the guard is dropped"]
#[derive(Debug, Default)]
pub struct LogGuard {
    _workers: Vec<WorkerGuard>,
}

type BoxedLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>;

/// Install the global subscriber; a second call is a no-op
pub fn init(format: LogFormat, default_level: &str, settings: &LoggingSettings) -> LogGuard {
    let redact = settings.redact;
    let stderr = Redacting::new(io::stderr, redact);
    let mut layers: Vec<BoxedLayer> = vec![match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_writer(stderr)
            .with_filter(env_filter(default_level))
            .boxed(),
        LogFormat::Text => fmt::layer()
            .with_target(false)
            .with_writer(stderr)
            .with_filter(env_filter(default_level))
            .boxed(),
    }];

    let mut guard = LogGuard::default();
    if let Some(dir) = settings.resolved_directory() {
        match file_appender(&dir, settings.rotation, "log") {
            Ok(appender) => {
                let (writer, worker) = tracing_appender::non_blocking(appender);
                guard._workers.push(worker);
                layers.push(
                    fmt::layer()
                        .with_ansi(false)
                        .with_writer(Redacting::new(writer, redact))
                        .with_filter(env_filter(FILE_LOG_LEVEL))
                        .boxed(),
                );
            }
            Err(e) => eprintln!("file logging disabled: {}", e),
        }

        if settings.json_file {
            match file_appender(&dir, settings.rotation, "json") {
                Ok(appender) => {
                    let (writer, worker) = tracing_appender::non_blocking(appender);
                    guard._workers.push(worker);
                    layers.push(
                        fmt::layer()
                            .json()
                            .with_current_span(true)
                            .with_writer(Redacting::new(writer, redact))
                            .with_filter(env_filter(FILE_LOG_LEVEL))
                            .boxed(),
                    );
                }
                Err(e) => eprintln!("JSON file logging disabled: {}", e),
            }
        }
    }

    if let Err(e) = tracing_subscriber::registry().with(layers).try_init() {
        eprintln!("logging already initialised: {}", e);
    }
    guard
}

/// Rolling `lastagent.<date>.<suffix>` files in `dir`, created if missing
pub fn file_appender(
    dir: &Path,
    rotation: LogRotation,
    suffix: &str,
) -> Result<RollingFileAppender, tracing_appender::rolling::InitError> {
    let rotation = match rotation {
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Never => Rotation::NEVER,
    };
    RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(suffix)
        .max_log_files(MAX_LOG_FILES)
        .build(dir)
}

/// Mask credentials in one formatted log line.
///
/// Values of fields whose name mentions a password, key, token, secret or
/// authorization are replaced, as are bearer tokens anywhere in the text.
pub fn redact(line: &str) -> Cow<'_, str> {
    static PATTERNS: OnceLock<Option<(Regex, Regex)>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        let bearer = Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9._~+/=-]+").ok()?;
        let field = Regex::new(concat!(
            r#"(?i)([\w-]*(?:password|passwd|api[_-]?key|token|secret|authorization)"#,
            r#"[\w-]*"?(?:\x1b\[[0-9;]*m)*\s*[=:](?:\x1b\[[0-9;]*m)*\s*)"#,
            r#"("(?:[^"\\]|\\.)*"|[^\s,}"\x1b]+)"#,
        ))
        .ok()?;
        Some((bearer, field))
    });
    let Some((bearer, field)) = patterns else {
        return Cow::Borrowed(line);
    };

    let line = bearer.replace_all(line, format!("Bearer {}", REDACTED).as_str());
    let masked = match field.replace_all(&line, |caps: &Captures| {
        if caps[2].starts_with('"') {
            format!("{}\"{}\"", &caps[1], REDACTED)
        } else {
            format!("{}{}", &caps[1], REDACTED)
        }
    }) {
        Cow::Owned(owned) => Some(owned),
        Cow::Borrowed(_) => None,
    };
    masked.map_or(line, Cow::Owned)
}

/// [`MakeWriter`] that masks secrets before they reach `inner`
#[derive(Debug, Clone)]
pub struct Redacting<M> {
    inner: M,
    enabled: bool,
}

impl<M> Redacting<M> {
    pub fn new(inner: M, enabled: bool) -> Self {
        Self { inner, enabled }
    }
}

impl<'a, M: MakeWriter<'a>> MakeWriter<'a> for Redacting<M> {
    type Writer = RedactingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new(self.inner.make_writer(), self.enabled)
    }
}

/// Writer half of [`Redacting`]; each `write` carries one formatted event
#[derive(Debug)]
pub struct RedactingWriter<W> {
    inner: W,
    enabled: bool,
}

impl<W> RedactingWriter<W> {
    pub fn new(inner: W, enabled: bool) -> Self {
        Self { inner, enabled }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: io::Write> io::Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.enabled {
            return self.inner.write(buf);
        }
        let text = String::from_utf8_lossy(buf);
        self.inner.write_all(redact(&text).as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
