/// Host logging
/// Every supervisor event and every line the backend prints goes to two places:
/// - the tracing subscriber (console)
/// - a persistent, timestamped log file in the per-user data directory,
///   which is the only trace left when the app was launched from the GUI shell
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app::HOST_LOG_FILE;

/// Lines returned by `HostLog::tail` unless asked otherwise
pub const DEFAULT_TAIL_LINES: usize = 800;

/// Local time for every line and the session header
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Install the console subscriber. `RUST_LOG` overrides the INFO default.
/// Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Handle to the persistent host log; cheap to clone
#[derive(Debug, Clone)]
pub struct HostLog {
    path: Arc<PathBuf>,
    write_lock: Arc<Mutex<()>>,
}

impl HostLog {
    pub fn new(path: PathBuf) -> Self {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        Self {
            path: Arc::new(path),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Log file with the standard name inside `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(HOST_LOG_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self, message: &str) {
        info!("{}", message);
        self.append(None, message);
    }

    pub fn warn(&self, message: &str) {
        warn!("{}", message);
        self.append(Some("WARN"), message);
    }

    pub fn error(&self, message: &str) {
        error!("{}", message);
        self.append(Some("ERROR"), message);
    }

    /// Appends a timestamped line; write failures are swallowed
    fn append(&self, level: Option<&str>, message: &str) {
        let _guard = self.write_lock.lock();
        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_path())
        {
            let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT);
            let _ = match level {
                Some(level) => writeln!(file, "[{}] {}: {}", timestamp, level, message),
                None => writeln!(file, "[{}] {}", timestamp, message),
            };
        }
    }

    /// Truncates the file and writes a session header
    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.path.as_path())
        {
            let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT);
            let _ = writeln!(file, "=== companio host log started at {} ===", timestamp);
        }
    }

    /// The last `max_lines` lines of the log
    pub fn tail(&self, max_lines: usize) -> String {
        match fs::read_to_string(self.path.as_path()) {
            Ok(contents) => {
                let lines: Vec<&str> = contents.lines().collect();
                if lines.len() > max_lines {
                    let start_index = lines.len() - max_lines;
                    let mut result = format!("... (showing last {} lines)\n", max_lines);
                    result.push_str(&lines[start_index..].join("\n"));
                    result
                } else {
                    contents
                }
            }
            Err(e) => format!("Failed to read logs: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_are_timestamped_and_levelled() {
        let dir = tempfile::tempdir().unwrap();
        let log = HostLog::in_dir(dir.path());
        log.info("backend starting");
        log.error("backend exploded");

        let contents = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('[') && lines[0].ends_with("] backend starting"));
        assert!(lines[1].ends_with("ERROR: backend exploded"));
    }

    #[test]
    fn test_tail_limits_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = HostLog::in_dir(dir.path());
        for i in 0..10 {
            log.info(&format!("line {}", i));
        }

        let tail = log.tail(3);
        assert!(tail.starts_with("... (showing last 3 lines)"));
        assert!(tail.ends_with("line 9"));
        assert!(!tail.contains("line 6"));
    }

    #[test]
    fn test_clear_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let log = HostLog::in_dir(dir.path());
        log.info("old session");
        log.clear();

        let contents = fs::read_to_string(log.path()).unwrap();
        assert!(contents.starts_with("=== companio host log started at"));
        assert!(!contents.contains("old session"));
    }

    #[test]
    fn test_header_and_lines_share_the_clock() {
        let dir = tempfile::tempdir().unwrap();
        let log = HostLog::in_dir(dir.path());
        log.clear();
        log.info("first line");

        let contents = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        let header_ts = lines[0]
            .trim_start_matches("=== companio host log started at ")
            .trim_end_matches(" ===");
        let line_ts = &lines[1][1..lines[1].find(']').unwrap()];

        let header = chrono::NaiveDateTime::parse_from_str(header_ts, TIMESTAMP_FORMAT).unwrap();
        let line = chrono::NaiveDateTime::parse_from_str(line_ts, TIMESTAMP_FORMAT).unwrap();
        assert!(line >= header);
        assert!((line - header).num_seconds() < 5);
    }
}
