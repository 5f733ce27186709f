/// Keeps one `LogBuffer` per (project directory, service name) pair and
/// offers merged, cross-service views.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use super::{LogBuffer, LogEntry, LogFilter, LogLevel};

pub struct LogManager {
    buffers: Mutex<HashMap<(String, String), Arc<LogBuffer>>>,
    filter_config: Option<(Vec<String>, bool)>,
}

impl LogManager {
    pub fn new() -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            filter_config: None,
        }
    }

    /// Every buffer created from now on gets its own `LogFilter` built from
    /// these settings (a `RegexSet` is cheap to rebuild but not `Clone`, so
    /// the config is stored rather than a shared filter instance).
    pub fn with_filter_config(exclude: Vec<String>, include_builtins: bool) -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            filter_config: Some((exclude, include_builtins)),
        }
    }

    /// Returns the buffer for `(project, service)`, creating it idempotently
    /// on first use.
    pub fn buffer_for(&self, project: &str, service: &str) -> Arc<LogBuffer> {
        let mut buffers = self.buffers.lock().unwrap();
        let key = (project.to_string(), service.to_string());
        buffers
            .entry(key)
            .or_insert_with(|| {
                let mut buffer = LogBuffer::new(service);
                if let Some((exclude, include_builtins)) = &self.filter_config {
                    buffer = buffer.with_filter(LogFilter::new(exclude.clone(), *include_builtins));
                }
                Arc::new(buffer)
            })
            .clone()
    }

    pub fn all_logs(&self, project: &str) -> Vec<LogEntry> {
        let buffers = self.buffers.lock().unwrap();
        let mut merged: Vec<LogEntry> = buffers
            .iter()
            .filter(|((p, _), _)| p == project)
            .flat_map(|(_, buf)| buf.get_recent(usize::MAX))
            .collect();
        merged.sort_by_key(|e| e.timestamp);
        merged
    }

    pub fn all_logs_since(&self, project: &str, since: SystemTime) -> Vec<LogEntry> {
        let buffers = self.buffers.lock().unwrap();
        let mut merged: Vec<LogEntry> = buffers
            .iter()
            .filter(|((p, _), _)| p == project)
            .flat_map(|(_, buf)| buf.get_since(since))
            .collect();
        merged.sort_by_key(|e| e.timestamp);
        merged
    }

    pub fn all_logs_by_level(&self, project: &str, level: LogLevel) -> Vec<LogEntry> {
        let buffers = self.buffers.lock().unwrap();
        let mut merged: Vec<LogEntry> = buffers
            .iter()
            .filter(|((p, _), _)| p == project)
            .flat_map(|(_, buf)| buf.get_by_level(level))
            .collect();
        merged.sort_by_key(|e| e.timestamp);
        merged
    }

    /// Merges `get_logs_with_context` results across every service in
    /// `project`, newest match first.
    pub fn all_logs_with_context(
        &self,
        project: &str,
        pattern: &str,
        context: usize,
        limit: usize,
    ) -> Vec<Vec<LogEntry>> {
        let buffers = self.buffers.lock().unwrap();
        let mut windows: Vec<Vec<LogEntry>> = buffers
            .iter()
            .filter(|((p, _), _)| p == project)
            .flat_map(|(_, buf)| buf.get_logs_with_context(pattern, context, limit))
            .collect();
        windows.sort_by_key(|w| std::cmp::Reverse(w.last().map(|e| e.timestamp)));
        windows.truncate(limit);
        windows
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_for_is_idempotent() {
        let manager = LogManager::new();
        let a = manager.buffer_for("proj", "api");
        let b = manager.buffer_for("proj", "api");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn all_logs_merges_across_services_in_timestamp_order() {
        let manager = LogManager::new();
        let api = manager.buffer_for("proj", "api");
        let db = manager.buffer_for("proj", "db");
        api.push("api started", false);
        db.push("db started", false);
        api.push("api ready", false);

        let merged = manager.all_logs("proj");
        assert_eq!(merged.len(), 3);
        let services: Vec<&str> = merged.iter().map(|e| e.service.as_str()).collect();
        assert!(services.contains(&"api"));
        assert!(services.contains(&"db"));
    }

    #[test]
    fn all_logs_are_scoped_to_project() {
        let manager = LogManager::new();
        manager.buffer_for("proj-a", "api").push("a", false);
        manager.buffer_for("proj-b", "api").push("b", false);
        assert_eq!(manager.all_logs("proj-a").len(), 1);
        assert_eq!(manager.all_logs("proj-b").len(), 1);
    }
}
