//! Per-launch log files, their retention, and in-memory output capture.
use crate::config::SupervisorConfig;
use crate::error::Error;
use crate::server::EventBus;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::VecDeque;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;
use tokio::io::AsyncWriteExt;

const FILE_TIMESTAMP: &str = "%Y%m%d_%H%M%S_%3f";
const LINE_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S";

/// One captured output line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub server: String,
    pub line: String,
}

/// File name of a log started at `at`: `<server>_<YYYYmmdd_HHMMSS_mmm>.log`.
pub fn log_file_name(server: &str, at: DateTime<Local>) -> String {
    format!("{}_{}.log", server, at.format(FILE_TIMESTAMP))
}

/// Server name encoded in a log file name, if the name is one of ours.
///
/// Accepts the timestamp with or without the millisecond suffix. Parsing
/// from the right keeps `demo` and `demo_extra` apart.
pub fn server_of_log_file(file_name: &str) -> Option<&str> {
    let stem = file_name.strip_suffix(".log")?;
    for len in [19, 15] {
        let Some(split) = stem.len().checked_sub(len) else {
            continue;
        };
        if split < 2 || !stem.is_char_boundary(split) {
            continue;
        }
        let (head, stamp) = stem.split_at(split);
        if let Some(server) = head.strip_suffix('_') {
            if is_file_timestamp(stamp) {
                return Some(server);
            }
        }
    }
    None
}

fn is_file_timestamp(stamp: &str) -> bool {
    let bytes = stamp.as_bytes();
    bytes.iter().enumerate().all(|(i, b)| match i {
        8 | 15 => *b == b'_',
        _ => b.is_ascii_digit(),
    })
}

/// A log file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileEntry {
    pub path: PathBuf,
    pub server: String,
    pub modified: SystemTime,
}

/// Outcome of one rotation pass.
#[derive(Debug, Default)]
pub struct RotationReport {
    pub removed: Vec<PathBuf>,
    /// Files that could not be deleted. Never fatal.
    pub failures: Vec<Error>,
}

impl RotationReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Bounds the number of log files per server and in total.
#[derive(Debug, Clone)]
pub struct LogRotator {
    dir: PathBuf,
    per_server_cap: usize,
    global_cap: usize,
}

impl LogRotator {
    pub fn new(dir: impl Into<PathBuf>, per_server_cap: usize, global_cap: usize) -> Self {
        Self {
            dir: dir.into(),
            per_server_cap,
            global_cap,
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(&config.log_dir, config.per_server_log_cap, config.global_log_cap)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for a new log of `server` started at `at`.
    pub fn log_path(&self, server: &str, at: DateTime<Local>) -> PathBuf {
        self.dir.join(log_file_name(server, at))
    }

    /// Log files on disk, oldest first, optionally for one server.
    pub fn list(&self, server: Option<&str>) -> Vec<LogFileEntry> {
        match self.scan() {
            Ok(mut entries) => {
                entries.retain(|e| server.is_none_or(|s| e.server == s));
                entries
            }
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "Failed to list log files");
                Vec::new()
            }
        }
    }

    /// Newest log file of `server`.
    pub fn latest(&self, server: &str) -> Option<PathBuf> {
        self.list(Some(server)).pop().map(|e| e.path)
    }

    /// Delete the oldest files until `server` has at most the per-server cap
    /// and the directory at most the global cap.
    ///
    /// Age is modification time; the timestamp in the name breaks ties. Call
    /// after creating the new log so it counts toward the caps and, being
    /// newest, survives.
    #[tracing::instrument(skip(self))]
    pub fn rotate(&self, server: &str) -> RotationReport {
        let mut report = RotationReport::default();

        match self.scan() {
            Ok(entries) => {
                let own: Vec<LogFileEntry> = entries.into_iter().filter(|e| e.server == server).collect();
                let excess = own.len().saturating_sub(self.per_server_cap);
                self.delete(&own[..excess], &mut report);
            }
            Err(e) => report.failures.push(e),
        }

        match self.scan() {
            Ok(entries) => {
                let excess = entries.len().saturating_sub(self.global_cap);
                self.delete(&entries[..excess], &mut report);
            }
            Err(e) => report.failures.push(e),
        }

        if !report.removed.is_empty() {
            tracing::debug!(removed = report.removed.len(), "Rotated log files");
        }
        for failure in &report.failures {
            tracing::warn!(error = %failure, "Log rotation incomplete");
        }
        report
    }

    fn delete(&self, entries: &[LogFileEntry], report: &mut RotationReport) {
        for entry in entries {
            match fs::remove_file(&entry.path) {
                Ok(()) => report.removed.push(entry.path.clone()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => report.failures.push(Error::RotationFailure(format!(
                    "{}: {}",
                    entry.path.display(),
                    e
                ))),
            }
        }
    }

    fn scan(&self) -> Result<Vec<LogFileEntry>, Error> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::RotationFailure(format!(
                    "Failed to read {}: {}",
                    self.dir.display(),
                    e
                )));
            }
        };

        let mut entries: Vec<LogFileEntry> = read_dir
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let file_name = entry.file_name();
                let server = server_of_log_file(file_name.to_str()?)?.to_string();
                let metadata = entry.metadata().ok().filter(|m| m.is_file())?;
                Some(LogFileEntry {
                    path: entry.path(),
                    server,
                    modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                })
            })
            .collect();

        entries.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
        Ok(entries)
    }
}

/// Bounded ring of the most recent output lines of one server.
#[derive(Debug)]
pub struct LogBuffer {
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    pub fn push(&self, line: String) {
        if self.capacity == 0 {
            return;
        }
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// The last `max` lines (all when `None`), oldest first.
    pub fn recent(&self, max: Option<usize>) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = max.map_or(0, |m| lines.len().saturating_sub(m));
        lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Where a server's output goes: its log file, its ring buffer, and log subscribers.
pub struct LogSink {
    server: String,
    path: Option<PathBuf>,
    file: tokio::sync::Mutex<Option<tokio::fs::File>>,
    buffer: Arc<LogBuffer>,
    events: EventBus,
    timestamps: bool,
}

impl LogSink {
    /// Create (or append to) the log file at `path`.
    ///
    /// A file that cannot be opened is logged and skipped; output still
    /// reaches the buffer and subscribers.
    pub async fn create(
        server: &str,
        path: &Path,
        buffer: Arc<LogBuffer>,
        events: EventBus,
        timestamps: bool,
    ) -> Self {
        if let Some(dir) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to create log directory");
            }
        }

        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
        {
            Ok(file) => Some(file),
            Err(e) => {
                tracing::warn!(server, path = %path.display(), error = %e, "Failed to open log file");
                None
            }
        };

        Self {
            server: server.to_string(),
            path: file.as_ref().map(|_| path.to_path_buf()),
            file: tokio::sync::Mutex::new(file),
            buffer,
            events,
            timestamps,
        }
    }

    /// A sink with no file, for processes the supervisor did not spawn.
    pub fn detached(server: &str, buffer: Arc<LogBuffer>, events: EventBus, timestamps: bool) -> Self {
        Self {
            server: server.to_string(),
            path: None,
            file: tokio::sync::Mutex::new(None),
            buffer,
            events,
            timestamps,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record one line.
    pub async fn emit(&self, line: &str) {
        let line = if self.timestamps {
            format!("[{}] {}", Local::now().format(LINE_TIMESTAMP), line)
        } else {
            line.to_string()
        };

        {
            let mut file = self.file.lock().await;
            if let Some(f) = file.as_mut() {
                let written = async {
                    f.write_all(line.as_bytes()).await?;
                    f.write_all(b"\n").await?;
                    f.flush().await
                }
                .await;
                if let Err(e) = written {
                    tracing::warn!(server = %self.server, error = %e, "Log file write failed, continuing without it");
                    *file = None;
                }
            }
        }

        self.buffer.push(line.clone());
        self.events.publish_log(LogLine {
            server: self.server.clone(),
            line,
        });
    }
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("server", &self.server)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
