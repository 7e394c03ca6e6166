//! Shared logging utilities for TelOAV binaries.
//!
//! Installs a `tracing` subscriber with three sinks: a size-rotated log file,
//! stderr, and an in-memory ring buffer of recent lines ([`RecentLogs`]) that
//! the discovery scheduler copies into every cycle snapshot.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context as LayerContext;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "teloav=info,teloav_discovery=info";
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Number of lines kept by [`RecentLogs`].
pub const RECENT_LOG_CAPACITY: usize = 100;

/// Logging configuration shared by TelOAV binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
    pub tui_mode: bool,
}

/// Initialize tracing with a rolling file writer, stderr output and the
/// recent-lines buffer. Returns the buffer handle.
///
/// The file sink is skipped (with a note on stderr) when the log directory
/// cannot be created, e.g. on a read-only container filesystem.
pub fn init_logging(config: LogConfig<'_>) -> Result<RecentLogs> {
    let recent = RecentLogs::new(RECENT_LOG_CAPACITY);

    let writer = ensure_logs_dir().and_then(|dir| SharedRollingWriter::new(dir, config.app_name));
    let file_layer = match writer {
        Ok(writer) => Some(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(build_filter()),
        ),
        Err(e) => {
            eprintln!("File logging disabled: {:#}", e);
            None
        }
    };

    let console_filter = if config.verbose {
        build_filter()
    } else if config.tui_mode {
        EnvFilter::new("warn")
    } else {
        build_filter()
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(RecentLogsLayer::new(recent.clone()).with_filter(build_filter()))
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(recent)
}

/// Resolve the log filter.
///
/// Priority:
/// 1) RUST_LOG
/// 2) LOGLEVEL (DEBUG | INFO | WARNING | ERROR | CRITICAL)
/// 3) built-in default
pub fn build_filter() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = std::env::var("LOGLEVEL")
        .ok()
        .and_then(|value| level_from_name(&value));
    match level {
        Some(level) => EnvFilter::new(format!("teloav={level},teloav_discovery={level}")),
        None => EnvFilter::new(DEFAULT_LOG_FILTER),
    }
}

fn level_from_name(name: &str) -> Option<&'static str> {
    match name.trim().to_ascii_uppercase().as_str() {
        "DEBUG" => Some("debug"),
        "INFO" => Some("info"),
        "WARNING" | "WARN" => Some("warn"),
        "ERROR" | "CRITICAL" => Some("error"),
        _ => None,
    }
}

/// Get the TelOAV home directory: ~/.teloav
pub fn teloav_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("TELOAV_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .map(|home| home.join(".teloav"))
        .unwrap_or_else(|| PathBuf::from(".").join(".teloav"))
}

/// Get the logs directory: ~/.teloav/logs
pub fn logs_dir() -> PathBuf {
    teloav_home().join("logs")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

// ============================================================================
// Recent log lines
// ============================================================================

/// One captured log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub time: DateTime<Local>,
    pub level: Level,
    pub message: String,
}

/// Bounded ring buffer of recent log lines, shared between the tracing layer
/// and whoever renders them. Oldest lines are dropped first.
#[derive(Debug, Clone)]
pub struct RecentLogs {
    inner: Arc<Mutex<VecDeque<LogLine>>>,
    capacity: usize,
}

impl RecentLogs {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, line: LogLine) {
        // A poisoned lock only means a panic happened mid-push; the buffer is still usable.
        let mut lines = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Copy of the buffered lines, oldest first.
    pub fn snapshot(&self) -> Vec<LogLine> {
        let lines = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `tracing` layer feeding a [`RecentLogs`] buffer.
pub struct RecentLogsLayer {
    logs: RecentLogs,
}

impl RecentLogsLayer {
    pub fn new(logs: RecentLogs) -> Self {
        Self { logs }
    }
}

impl<S: Subscriber> Layer<S> for RecentLogsLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: LayerContext<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.logs.push(LogLine {
            time: Local::now(),
            level: *event.metadata().level(),
            message: visitor.finish(),
        });
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields
        } else {
            format!("{} {}", self.message, self.fields)
        }
    }

    fn push_field(&mut self, name: &str, value: &dyn std::fmt::Display) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={}", name, value);
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.push_field(field.name(), &value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{:?}", value);
        if field.name() == "message" {
            self.message = rendered;
        } else {
            self.push_field(field.name(), &rendered);
        }
    }
}

// ============================================================================
// Rolling file writer
// ============================================================================

struct RollingFileAppender {
    dir: PathBuf,
    base_name: String,
    max_files: usize,
    max_size: u64,
    file: Option<File>,
    current_size: u64,
}

impl RollingFileAppender {
    fn new(dir: PathBuf, base_name: &str, max_files: usize, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let mut appender = Self {
            dir,
            base_name: sanitize_name(base_name),
            max_files: max_files.max(1),
            max_size,
            file: None,
            current_size: 0,
        };
        let (file, size) = appender.open_current_file()?;
        appender.file = Some(file);
        appender.current_size = size;
        if appender.current_size > appender.max_size {
            appender.rotate()?;
        }
        Ok(appender)
    }

    fn open_current_file(&self) -> io::Result<(File, u64)> {
        let path = self.current_path();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok((file, size))
    }

    fn current_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.base_name))
    }

    fn rotated_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.log.{}", self.base_name, index))
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }

        self.rotate_files()?;

        let (file, size) = self.open_current_file()?;
        self.file = Some(file);
        self.current_size = size;
        Ok(())
    }

    fn rotate_files(&self) -> io::Result<()> {
        let max_index = self.max_files.saturating_sub(1);
        if max_index == 0 {
            return Ok(());
        }

        let oldest = self.rotated_path(max_index);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }

        for idx in (1..max_index).rev() {
            let src = self.rotated_path(idx);
            if src.exists() {
                fs::rename(&src, self.rotated_path(idx + 1))?;
            }
        }

        let current = self.current_path();
        if current.exists() {
            fs::rename(current, self.rotated_path(1))?;
        }

        Ok(())
    }
}

impl Write for RollingFileAppender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.current_size + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file unavailable"))?;
        let bytes = file.write(buf)?;
        self.current_size += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

#[derive(Clone)]
struct SharedRollingWriter {
    inner: Arc<Mutex<RollingFileAppender>>,
}

impl SharedRollingWriter {
    fn new(dir: PathBuf, base_name: &str) -> Result<Self> {
        let appender = RollingFileAppender::new(dir, base_name, MAX_LOG_FILES, MAX_LOG_FILE_SIZE)
            .with_context(|| format!("Failed to open log file for {}", base_name))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(appender)),
        })
    }
}

struct SharedRollingWriterGuard {
    inner: Arc<Mutex<RollingFileAppender>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedRollingWriter {
    type Writer = SharedRollingWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedRollingWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedRollingWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.flush()
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn line(message: &str) -> LogLine {
        LogLine {
            time: Local::now(),
            level: Level::INFO,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_recent_logs_drops_oldest() {
        let logs = RecentLogs::new(3);
        for i in 0..5 {
            logs.push(line(&format!("line {}", i)));
        }
        let lines = logs.snapshot();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].message, "line 2");
        assert_eq!(lines[2].message, "line 4");
    }

    #[test]
    fn test_layer_captures_message_and_fields() {
        let logs = RecentLogs::new(10);
        let subscriber = tracing_subscriber::registry().with(RecentLogsLayer::new(logs.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(endpoint = "opc.tcp://a", "No nodes discovered");
        });

        let lines = logs.snapshot();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].level, Level::WARN);
        assert_eq!(lines[0].message, "No nodes discovered endpoint=opc.tcp://a");
    }

    #[test]
    fn test_level_from_name() {
        assert_eq!(level_from_name("warning"), Some("warn"));
        assert_eq!(level_from_name("CRITICAL"), Some("error"));
        assert_eq!(level_from_name("verbose"), None);
    }

    #[test]
    fn test_rolling_appender_rotates() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("logs");
        let mut appender =
            RollingFileAppender::new(dir.clone(), "teloav discovery", 3, 16).unwrap();
        appender.write_all(b"0123456789").unwrap();
        appender.write_all(b"0123456789").unwrap();
        appender.flush().unwrap();

        assert!(dir.join("teloav_discovery.log").exists());
        assert!(dir.join("teloav_discovery.log.1").exists());
    }
}
