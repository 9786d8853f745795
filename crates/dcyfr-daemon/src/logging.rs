// crates/dcyfr-daemon/src/logging.rs
// The daemon's observable rotating log file, plus tracing setup for stderr
//
// Diagnostics go through tracing as usual; the rotating daemon.log is a
// separate, stable contract written by the supervisor's event listeners,
// one record per line: `[ISO-8601] LEVEL <message>`.

use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

/// Append-only log file with size-triggered rotation into `.1`..`.N`
/// siblings. Only the supervisor writes here; all failures are non-fatal.
#[derive(Debug)]
pub struct LogFile {
    path: PathBuf,
    max_bytes: u64,
    max_files: usize,
}

impl LogFile {
    pub fn new(path: PathBuf, max_bytes: u64, max_files: usize) -> Self {
        Self {
            path,
            max_bytes,
            max_files: max_files.max(1),
        }
    }

    pub fn info(&self, message: &str) {
        self.append(LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.append(LogLevel::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.append(LogLevel::Error, message);
    }

    pub fn append(&self, level: LogLevel, message: &str) {
        let line = format!("[{}] {} {}\n", Utc::now().to_rfc3339(), level.as_str(), message);
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = result {
            tracing::debug!("Failed to append to {}: {}", self.path.display(), e);
        }
    }

    /// Rotate when the live file has reached the size limit. Called from the
    /// heartbeat; failures are swallowed.
    pub fn rotate_if_needed(&self) {
        let size = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(_) => return,
        };
        if size < self.max_bytes {
            return;
        }
        if let Err(e) = self.rotate() {
            tracing::warn!("Log rotation failed: {}", e);
        }
    }

    fn numbered(&self, i: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}", i));
        PathBuf::from(name)
    }

    fn rotate(&self) -> std::io::Result<()> {
        // Drop the oldest, shift the rest up, then move the live file to .1.
        let oldest = self.numbered(self.max_files);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for i in (1..self.max_files).rev() {
            let from = self.numbered(i);
            if from.exists() {
                fs::rename(&from, self.numbered(i + 1))?;
            }
        }
        fs::rename(&self.path, self.numbered(1))?;
        fs::write(&self.path, b"")?;
        tracing::debug!("Rotated {}", self.path.display());
        Ok(())
    }
}

/// Install the stderr tracing subscriber for a CLI invocation.
pub fn init_tracing(level: Level) -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn log_in(temp: &TempDir, max_bytes: u64) -> LogFile {
        LogFile::new(temp.path().join("daemon.log"), max_bytes, 3)
    }

    #[test]
    fn test_append_format() {
        let temp = TempDir::new().unwrap();
        let log = log_in(&temp, 1024 * 1024);
        log.info("daemon started");

        let content = fs::read_to_string(temp.path().join("daemon.log")).unwrap();
        assert!(content.starts_with('['));
        assert!(content.contains("] INFO daemon started"));
        assert!(content.ends_with('\n'));
    }

    #[test]
    fn test_no_rotation_below_limit() {
        let temp = TempDir::new().unwrap();
        let log = log_in(&temp, 1024 * 1024);
        log.info("small");
        log.rotate_if_needed();
        assert!(!temp.path().join("daemon.log.1").exists());
    }

    #[test]
    fn test_rotation_preserves_last_bytes() {
        let temp = TempDir::new().unwrap();
        let log = log_in(&temp, 1);
        log.info("the final record");

        let before = fs::read_to_string(temp.path().join("daemon.log")).unwrap();
        log.rotate_if_needed();

        let rotated = fs::read_to_string(temp.path().join("daemon.log.1")).unwrap();
        assert_eq!(rotated, before);
        let fresh = fs::read_to_string(temp.path().join("daemon.log")).unwrap();
        assert!(fresh.is_empty());
    }

    #[test]
    fn test_rotation_shifts_chain() {
        let temp = TempDir::new().unwrap();
        let log = log_in(&temp, 1);

        log.info("first");
        log.rotate_if_needed();
        log.info("second");
        log.rotate_if_needed();

        let one = fs::read_to_string(temp.path().join("daemon.log.1")).unwrap();
        let two = fs::read_to_string(temp.path().join("daemon.log.2")).unwrap();
        assert!(one.contains("second"));
        assert!(two.contains("first"));
    }

    #[test]
    fn test_rotation_drops_oldest() {
        let temp = TempDir::new().unwrap();
        let log = log_in(&temp, 1);

        for i in 0..5 {
            log.info(&format!("record {}", i));
            log.rotate_if_needed();
        }

        // max_files = 3: .1 .2 .3 exist, nothing older survives
        assert!(temp.path().join("daemon.log.1").exists());
        assert!(temp.path().join("daemon.log.3").exists());
        assert!(!temp.path().join("daemon.log.4").exists());

        let three = fs::read_to_string(temp.path().join("daemon.log.3")).unwrap();
        assert!(three.contains("record 2"));
    }
}
