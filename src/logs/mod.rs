/// Per-service log ring buffer with pub/sub, optional file mirroring with
/// rotation, and level-aware queries.

pub mod filter;
pub mod manager;

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

pub use filter::LogFilter;
pub use manager::LogManager;

const DEFAULT_CAPACITY: usize = 1000;
const ROTATE_AT_BYTES: u64 = 1024 * 1024;
const ROTATE_BACKUPS: u32 = 2;
const SUBSCRIBER_CAPACITY: usize = 100;
const SUBSCRIBER_SEND_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Infers a level from a line's content. Known success/status phrases are
    /// checked before generic keyword matching so a banner like "No errors
    /// found" isn't misclassified as an error.
    pub fn infer(line: &str) -> LogLevel {
        let lower = line.to_lowercase();

        const OVERRIDE_INFO: &[&str] = &[
            "no errors found",
            "0 errors",
            "error: none",
            "warning: none",
            "compiled successfully",
        ];
        if OVERRIDE_INFO.iter().any(|p| lower.contains(p)) {
            return LogLevel::Info;
        }

        if lower.contains("error") || lower.contains("panic") || lower.contains("fatal") {
            LogLevel::Error
        } else if lower.contains("warn") {
            LogLevel::Warn
        } else if lower.contains("debug") {
            LogLevel::Debug
        } else {
            LogLevel::Info
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub service: String,
    pub message: String,
    pub level: LogLevel,
    pub timestamp: SystemTime,
    pub is_stderr: bool,
}

struct Subscriber {
    sender: std::sync::mpsc::SyncSender<LogEntry>,
}

pub struct LogBuffer {
    service: String,
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
    subscribers: Mutex<Vec<Subscriber>>,
    filter: Option<LogFilter>,
    mirror: Option<Mutex<MirrorFile>>,
}

struct MirrorFile {
    path: PathBuf,
    file: File,
    written: u64,
}

impl LogBuffer {
    pub fn new(service: impl Into<String>) -> Self {
        Self::with_capacity(service, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(service: impl Into<String>, capacity: usize) -> Self {
        Self {
            service: service.into(),
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            subscribers: Mutex::new(Vec::new()),
            filter: None,
            mirror: None,
        }
    }

    pub fn with_filter(mut self, filter: LogFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_mirror_file(mut self, path: PathBuf) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.mirror = Some(Mutex::new(MirrorFile { path, file, written }));
        Ok(self)
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Appends a line, dropping it silently if the filter excludes it.
    pub fn push(&self, message: impl Into<String>, is_stderr: bool) {
        let message = message.into();
        if let Some(filter) = &self.filter {
            if filter.excludes(&message) {
                return;
            }
        }

        let entry = LogEntry {
            service: self.service.clone(),
            level: LogLevel::infer(&message),
            message,
            timestamp: SystemTime::now(),
            is_stderr,
        };

        {
            let mut entries = self.entries.lock().unwrap();
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }

        if let Some(mirror) = &self.mirror {
            let mut mirror = mirror.lock().unwrap();
            let _ = mirror.write_line(&entry);
        }

        self.broadcast(entry);
    }

    fn broadcast(&self, entry: LogEntry) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|sub| match sub.sender.send_timeout(entry.clone(), SUBSCRIBER_SEND_TIMEOUT) {
            Ok(()) => true,
            Err(std::sync::mpsc::SendTimeoutError::Timeout(_)) => true,
            Err(std::sync::mpsc::SendTimeoutError::Disconnected(_)) => false,
        });
    }

    pub fn subscribe(&self) -> std::sync::mpsc::Receiver<LogEntry> {
        let (sender, receiver) = std::sync::mpsc::sync_channel(SUBSCRIBER_CAPACITY);
        self.subscribers.lock().unwrap().push(Subscriber { sender });
        receiver
    }

    pub fn get_recent(&self, limit: usize) -> Vec<LogEntry> {
        let entries = self.entries.lock().unwrap();
        entries.iter().rev().take(limit).rev().cloned().collect()
    }

    pub fn get_since(&self, since: SystemTime) -> Vec<LogEntry> {
        let entries = self.entries.lock().unwrap();
        entries.iter().filter(|e| e.timestamp >= since).cloned().collect()
    }

    pub fn get_by_level(&self, level: LogLevel) -> Vec<LogEntry> {
        let entries = self.entries.lock().unwrap();
        entries.iter().filter(|e| e.level == level).cloned().collect()
    }

    pub fn contains_pattern(&self, pattern: &str) -> bool {
        let entries = self.entries.lock().unwrap();
        entries.iter().any(|e| e.message.contains(pattern))
    }

    pub fn contains_pattern_regex(&self, regex: &regex::Regex) -> bool {
        let entries = self.entries.lock().unwrap();
        entries.iter().any(|e| regex.is_match(&e.message))
    }

    /// Matches of `pattern` with up to `context` lines before/after each hit,
    /// newest matches first, capped to `limit` matches (default 50 at the
    /// caller, `context` clamped to [0, 10]).
    pub fn get_logs_with_context(&self, pattern: &str, context: usize, limit: usize) -> Vec<Vec<LogEntry>> {
        let context = context.min(10);
        let entries = self.entries.lock().unwrap();
        let snapshot: Vec<&LogEntry> = entries.iter().collect();

        let mut windows = Vec::new();
        for (i, entry) in snapshot.iter().enumerate() {
            if entry.message.contains(pattern) {
                let start = i.saturating_sub(context);
                let end = (i + context + 1).min(snapshot.len());
                let window: Vec<LogEntry> = snapshot[start..end].iter().map(|e| (*e).clone()).collect();
                windows.push(window);
            }
        }
        windows.reverse();
        windows.truncate(limit);
        windows
    }
}

impl MirrorFile {
    fn write_line(&mut self, entry: &LogEntry) -> std::io::Result<()> {
        let line = format!(
            "{} [{:?}] {}\n",
            humantime::format_rfc3339_seconds(entry.timestamp),
            entry.level,
            entry.message
        );
        self.file.write_all(line.as_bytes())?;
        self.written += line.len() as u64;
        if self.written >= ROTATE_AT_BYTES {
            self.rotate()?;
        }
        Ok(())
    }

    fn rotate(&mut self) -> std::io::Result<()> {
        for i in (1..ROTATE_BACKUPS).rev() {
            let from = backup_path(&self.path, i);
            let to = backup_path(&self.path, i + 1);
            if from.exists() {
                let _ = std::fs::rename(&from, &to);
            }
        }
        let first_backup = backup_path(&self.path, 1);
        let _ = std::fs::rename(&self.path, &first_backup);
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

fn backup_path(path: &PathBuf, index: u32) -> PathBuf {
    let mut name = path.clone().into_os_string();
    name.push(format!(".{}", index));
    PathBuf::from(name)
}

pub type SharedLogBuffer = Arc<LogBuffer>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_drops_oldest_past_capacity() {
        let buffer = LogBuffer::with_capacity("svc", 3);
        for i in 0..5 {
            buffer.push(format!("line {}", i), false);
        }
        let recent = buffer.get_recent(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].message, "line 2");
        assert_eq!(recent[2].message, "line 4");
    }

    #[test]
    fn level_inference_prefers_known_success_phrases() {
        assert_eq!(LogLevel::infer("No errors found"), LogLevel::Info);
        assert_eq!(LogLevel::infer("thread panicked at src/main.rs"), LogLevel::Error);
        assert_eq!(LogLevel::infer("WARN: deprecated flag"), LogLevel::Warn);
    }

    #[test]
    fn subscribers_receive_pushed_entries() {
        let buffer = LogBuffer::new("svc");
        let rx = buffer.subscribe();
        buffer.push("hello", false);
        let entry = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(entry.message, "hello");
    }

    #[test]
    fn get_logs_with_context_returns_newest_match_first() {
        let buffer = LogBuffer::new("svc");
        for i in 0..5 {
            buffer.push(format!("line {}", i), false);
        }
        buffer.push("needle here".to_string(), false);
        buffer.push("line 6".to_string(), false);
        buffer.push("needle again".to_string(), false);

        let windows = buffer.get_logs_with_context("needle", 1, 50);
        assert_eq!(windows.len(), 2);
        assert!(windows[0][0].message.contains("needle again") || windows[0].iter().any(|e| e.message.contains("needle again")));
    }

    #[test]
    fn filtered_lines_are_dropped_before_storage() {
        let filter = LogFilter::new(vec!["^noise".to_string()], true);
        let buffer = LogBuffer::new("svc").with_filter(filter);
        buffer.push("noise: heartbeat", false);
        buffer.push("real message", false);
        let recent = buffer.get_recent(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].message, "real message");
    }
}
