/// Serialises start/stop/restart operations per service so two callers can't
/// race on the same process, with a bounded wait for an in-flight operation
/// and a timeout around the operation itself.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const LOCK_WAIT: Duration = Duration::from_secs(5);
const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Idle,
    Starting,
    Stopping,
    Restarting,
}

#[derive(Debug, Clone)]
pub struct OperationResult {
    pub success: bool,
    pub error: Option<String>,
    pub duration: Duration,
}

struct ServiceLock {
    mutex: Mutex<OperationState>,
}

pub struct OperationManager {
    locks: Mutex<HashMap<String, Arc<ServiceLock>>>,
}

impl OperationManager {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, service: &str) -> Arc<ServiceLock> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(service.to_string())
            .or_insert_with(|| {
                Arc::new(ServiceLock {
                    mutex: Mutex::new(OperationState::Idle),
                })
            })
            .clone()
    }

    pub fn state_of(&self, service: &str) -> OperationState {
        let lock = self.lock_for(service);
        *lock.mutex.lock().unwrap()
    }

    /// Runs `op` under `service`'s lock, tagged with `entering_state` while
    /// it runs. Waits up to `LOCK_WAIT` for a concurrent operation to finish
    /// before giving up; bounds `op` itself to `timeout` (default 30s).
    pub fn execute_operation<F>(
        &self,
        service: &str,
        entering_state: OperationState,
        timeout: Option<Duration>,
        op: F,
    ) -> OperationResult
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let lock = self.lock_for(service);
        let deadline = Instant::now() + LOCK_WAIT;

        let mut guard = loop {
            match lock.mutex.try_lock() {
                Ok(guard) => break guard,
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(_) => {
                    return OperationResult {
                        success: false,
                        error: Some(format!("'{}' is busy with another operation", service)),
                        duration: Duration::ZERO,
                    };
                }
            }
        };

        *guard = entering_state;
        drop(guard);

        let started = Instant::now();
        let timeout = timeout.unwrap_or(DEFAULT_OP_TIMEOUT);
        let result = run_with_timeout(op, timeout);
        let duration = started.elapsed();

        let mut guard = lock.mutex.lock().unwrap();
        *guard = OperationState::Idle;
        drop(guard);

        match result {
            Ok(()) => OperationResult {
                success: true,
                error: None,
                duration,
            },
            Err(e) => OperationResult {
                success: false,
                error: Some(e.to_string()),
                duration,
            },
        }
    }

    /// Fans `op` out across `services` concurrently; each still goes through
    /// its own per-service lock, so a service already mid-operation is
    /// skipped rather than double-started.
    pub fn execute_bulk_operation<F>(
        self: &Arc<Self>,
        services: Vec<String>,
        entering_state: OperationState,
        timeout: Option<Duration>,
        op: F,
    ) -> HashMap<String, OperationResult>
    where
        F: Fn(&str) -> Result<()> + Send + Sync + 'static,
    {
        let op = Arc::new(op);
        let handles: Vec<_> = services
            .into_iter()
            .map(|service| {
                let manager = self.clone();
                let op = op.clone();
                std::thread::spawn(move || {
                    let service_for_closure = service.clone();
                    let result = manager.execute_operation(&service, entering_state, timeout, move || {
                        op(&service_for_closure)
                    });
                    (service, result)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|_| {
                ("unknown".to_string(), OperationResult {
                    success: false,
                    error: Some("operation thread panicked".to_string()),
                    duration: Duration::ZERO,
                })
            }))
            .collect()
    }
}

impl Default for OperationManager {
    fn default() -> Self {
        Self::new()
    }
}

fn run_with_timeout<F>(op: F, timeout: Duration) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(op());
    });
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => Err(anyhow!("operation timed out after {:?}", timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_operation_returns_idle_state_afterwards() {
        let manager = OperationManager::new();
        let result = manager.execute_operation("api", OperationState::Starting, None, || Ok(()));
        assert!(result.success);
        assert_eq!(manager.state_of("api"), OperationState::Idle);
    }

    #[test]
    fn failing_operation_surfaces_its_error() {
        let manager = OperationManager::new();
        let result = manager.execute_operation("api", OperationState::Starting, None, || Err(anyhow!("boom")));
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("boom"));
    }

    #[test]
    fn slow_operation_times_out() {
        let manager = OperationManager::new();
        let result = manager.execute_operation(
            "api",
            OperationState::Starting,
            Some(Duration::from_millis(50)),
            || {
                std::thread::sleep(Duration::from_millis(500));
                Ok(())
            },
        );
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[test]
    fn bulk_operation_runs_each_service_independently() {
        let manager = Arc::new(OperationManager::new());
        let services = vec!["api".to_string(), "worker".to_string()];
        let results = manager.execute_bulk_operation(services, OperationState::Starting, None, |_name| Ok(()));
        assert_eq!(results.len(), 2);
        assert!(results.values().all(|r| r.success));
    }
}
