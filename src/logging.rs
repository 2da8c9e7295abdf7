//! Logging setup
//!
//! One `tracing` subscriber carries every sink:
//! - a timestamped line per event, appended to a rotated file under
//!   [`DEFAULT_LOG_DIR`] (or written to the terminal with `-l`)
//! - [`TallyLayer`], which records warnings and errors for the exit code
//! - [`SyslogLayer`], which forwards errors to the system log

use crate::runtime::Tally;
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use tracing::field::{Field, Visit};
use tracing::{warn, Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Directory holding the log file
pub const DEFAULT_LOG_DIR: &str = "/var/log/wg-provision";

/// Name of the log file inside the log directory
pub const LOG_FILE_NAME: &str = "wg-provision.log";

/// Size above which the log file is rotated before opening
pub const MAX_LOG_SIZE: u64 = 1024 * 1024;

/// Number of rotated files kept (`.1` is the newest)
pub const KEEP_ROTATED: usize = 5;

/// Where and how much to log
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Log to the terminal instead of the file (`-l`)
    pub terminal: bool,
    /// Only warnings and errors (`-q`)
    pub quiet: bool,
    /// Trace every executed command (`-d`)
    pub debug: bool,
    /// Directory of the log file
    pub log_dir: PathBuf,
    /// Tag used for the system log
    pub syslog_tag: String,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            terminal: false,
            quiet: false,
            debug: false,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            syslog_tag: crate::APP_NAME.to_string(),
        }
    }
}

impl LogOptions {
    /// Default filter directive for the selected verbosity
    pub fn level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` overrides the level chosen by `-q`/`-d`. When the log file
/// cannot be opened, events go to stderr and a warning is logged.
pub fn init(options: &LogOptions, tally: &Tally) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(options.level()));

    let (file, file_error) = if options.terminal {
        (None, None)
    } else {
        match open_log_file(&options.log_dir) {
            Ok(file) => (Some(file), None),
            Err(e) => (None, Some(e)),
        }
    };

    subscriber(options, tally, filter, file).try_init()?;

    if let Some(e) = file_error {
        warn!(
            dir = %options.log_dir.display(),
            "Cannot open log file, logging to stderr: {}",
            e
        );
    }
    Ok(())
}

/// Build the subscriber around one output: the log file when given,
/// stderr otherwise
///
/// `filter` applies to the output only. Warnings and errors always reach
/// the tally and the system log, whatever the filter says.
pub fn subscriber(
    options: &LogOptions,
    tally: &Tally,
    filter: EnvFilter,
    file: Option<File>,
) -> impl Subscriber + Send + Sync + 'static {
    let output: Box<dyn Layer<Registry> + Send + Sync> = match file {
        Some(file) => fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_target(false)
            .boxed(),
        None => fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(output.with_filter(filter))
        .with(TallyLayer::new(tally.clone()))
        .with(SyslogLayer::new(options.syslog_tag.clone(), LoggerCommand))
}

/// Open the log file for appending, rotating it first when it is too large
pub fn open_log_file(dir: &Path) -> io::Result<File> {
    fs::create_dir_all(dir)?;
    let path = dir.join(LOG_FILE_NAME);
    rotate(&path, MAX_LOG_SIZE, KEEP_ROTATED)?;
    OpenOptions::new().create(true).append(true).open(path)
}

/// Shift `path` to `path.1`, `path.1` to `path.2` and so on when `path`
/// exceeds `max_size`; the file beyond `keep` is dropped
pub fn rotate(path: &Path, max_size: u64, keep: usize) -> io::Result<()> {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if size <= max_size || keep == 0 {
        return Ok(());
    }

    let numbered = |n: usize| {
        let mut name = path.as_os_str().to_owned();
        name.push(format!(".{}", n));
        PathBuf::from(name)
    };

    let oldest = numbered(keep);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..keep).rev() {
        let from = numbered(n);
        if from.exists() {
            fs::rename(&from, numbered(n + 1))?;
        }
    }
    fs::rename(path, numbered(1))
}

/// Records WARN and ERROR events into a [`Tally`]
pub struct TallyLayer {
    tally: Tally,
}

impl TallyLayer {
    /// Create a layer feeding `tally`
    pub fn new(tally: Tally) -> Self {
        Self { tally }
    }
}

impl<S: Subscriber> Layer<S> for TallyLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        match *event.metadata().level() {
            Level::ERROR => self.tally.error(),
            Level::WARN => self.tally.warn(),
            _ => {}
        }
    }
}

/// Destination for messages forwarded to the system log
pub trait SyslogSink: Send + Sync + 'static {
    /// Send one error message; failures are ignored
    fn send(&self, tag: &str, message: &str);
}

/// Sends messages with the `logger` utility
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggerCommand;

impl SyslogSink for LoggerCommand {
    fn send(&self, tag: &str, message: &str) {
        let _ = Command::new("logger")
            .args(["-t", tag, "-p", "user.err", "--", message])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}

/// Forwards ERROR events to a [`SyslogSink`]
pub struct SyslogLayer<K> {
    tag: String,
    sink: K,
}

impl<K: SyslogSink> SyslogLayer<K> {
    /// Create a layer tagging messages with `tag`
    pub fn new(tag: impl Into<String>, sink: K) -> Self {
        Self {
            tag: tag.into(),
            sink,
        }
    }
}

impl<S: Subscriber, K: SyslogSink> Layer<S> for SyslogLayer<K> {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::ERROR {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.sink.send(&self.tag, &visitor.finish());
    }
}

/// Flattens an event into `message key=value ...`
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
            self.fields.trim_start().to_string()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
