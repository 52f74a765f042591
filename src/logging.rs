//! Log backend: `env_logger` writing `<timestamp> [<LEVEL>]: <message>` lines to
//! stdout and to an append-only log file.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Local;
use env_logger::{Target, WriteStyle};
use log::LevelFilter;

use crate::error::BootstrapError;

const RETRY_FOR: Duration = Duration::from_secs(30);
const RETRY_EVERY: Duration = Duration::from_millis(100);

/// One log line, without the trailing newline.
pub fn format_line(level: log::Level, message: &dyn std::fmt::Display) -> String {
    format!(
        "{} [{level}]: {message}",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    )
}

/// Tees every write to stdout and appends it to `path`.
///
/// The file is opened per write so rotation by an outside tool is picked up.
/// A busy or unwritable file is retried until `retry_for` has passed, then the
/// bytes are dropped for the file only. Retrying blocks the logging thread, so
/// once a window has run out the sink tries each following line only once until
/// a write succeeds again.
pub struct LogSink {
    path: PathBuf,
    retry_for: Duration,
    retry_every: Duration,
    failing: bool,
}

impl LogSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            retry_for: RETRY_FOR,
            retry_every: RETRY_EVERY,
            failing: false,
        }
    }

    pub fn with_retry(mut self, retry_for: Duration, retry_every: Duration) -> Self {
        self.retry_for = retry_for;
        self.retry_every = retry_every;
        self
    }

    fn append(&self, buf: &[u8]) -> io::Result<()> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(buf)
    }

    /// `true` when the bytes reached the file.
    fn append_with_retry(&mut self, buf: &[u8]) -> bool {
        let deadline = Instant::now() + self.retry_for;
        loop {
            if self.append(buf).is_ok() {
                self.failing = false;
                return true;
            }
            if self.failing || Instant::now() >= deadline {
                self.failing = true;
                return false;
            }
            std::thread::sleep(self.retry_every);
        }
    }
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = io::stdout().write_all(buf);
        self.append_with_retry(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()
    }
}

/// Install the global logger. `RUST_LOG` overrides the default `info` level.
pub fn init(log_file: &Path) -> Result<(), BootstrapError> {
    if let Some(parent) = log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| BootstrapError::CreateDirectory {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format(|buf, record| writeln!(buf, "{}", format_line(record.level(), record.args())))
        .write_style(WriteStyle::Never)
        .target(Target::Pipe(Box::new(LogSink::new(log_file))))
        .init();
    Ok(())
}
