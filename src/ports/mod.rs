/// Port allocator: tracks in-use ports per project, offers reservation
/// leases, and detects stale owners.
///
/// Conceptually one allocator per project, implemented as an explicitly-owned,
/// shareable registry rather than an implicit global singleton — callers
/// construct one `PortAllocator` per project and pass it around (or wrap it
/// in an `Arc` for concurrent detection).

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::net::{TcpListener, ToSocketAddrs};
use std::sync::Mutex;

const PROBE_START: u16 = 3000;
const PROBE_END: u16 = 65535;

struct PortOwner {
    port: u16,
    #[allow(dead_code)]
    service_name: String,
    pid: Option<u32>,
}

pub struct PortAllocator {
    project: String,
    /// (service_name) -> assigned port, for idempotency within one run.
    assignments: Mutex<HashMap<String, u16>>,
    owners: Mutex<Vec<PortOwner>>,
}

impl PortAllocator {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            assignments: Mutex::new(HashMap::new()),
            owners: Mutex::new(Vec::new()),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Assigns a port for `service_name`. If `is_explicit`, `preferred` is
    /// mandatory and a foreign conflict is an error (after stale owners for
    /// this project are reaped). Otherwise, `preferred` is tried first and
    /// the allocator probes upward on conflict, flagging the result so the
    /// caller can offer to persist the new value.
    pub fn assign_port(
        &self,
        service_name: &str,
        preferred: u16,
        is_explicit: bool,
    ) -> Result<(u16, bool)> {
        {
            let assignments = self.assignments.lock().unwrap();
            if let Some(&existing) = assignments.get(service_name) {
                return Ok((existing, false));
            }
        }

        self.reap_stale_owners();

        let assigned = if is_explicit {
            if !self.is_port_available(preferred) {
                return Err(anyhow!(
                    "port {} is explicitly requested by '{}' but already in use",
                    preferred,
                    service_name
                ));
            }
            preferred
        } else if self.is_port_available(preferred) {
            preferred
        } else {
            self.find_free_port_from(preferred.max(PROBE_START))?
        };

        let should_update_manifest = !is_explicit && assigned != preferred;

        {
            let mut assignments = self.assignments.lock().unwrap();
            assignments.insert(service_name.to_string(), assigned);
        }
        {
            let mut owners = self.owners.lock().unwrap();
            owners.push(PortOwner {
                port: assigned,
                service_name: service_name.to_string(),
                pid: Some(std::process::id()),
            });
        }

        Ok((assigned, should_update_manifest))
    }

    fn find_free_port_from(&self, start: u16) -> Result<u16> {
        for candidate in start..=PROBE_END {
            if self.is_port_available(candidate) {
                return Ok(candidate);
            }
        }
        Err(anyhow!("no free port found starting from {}", start))
    }

    pub fn is_port_available(&self, port: u16) -> bool {
        let assignments = self.assignments.lock().unwrap();
        if assignments.values().any(|&p| p == port) {
            return false;
        }
        drop(assignments);
        is_port_bindable(port)
    }

    /// Drops bookkeeping for ports whose owning PID is no longer alive.
    /// A real stale-owner check also needs cross-process visibility (a
    /// lockfile or OS-level port owner lookup); within one run we only
    /// track ports this process itself has assigned, so staleness here
    /// degrades to "assignments made by a now-dead child of this process".
    fn reap_stale_owners(&self) {
        use sysinfo::{PidExt, System, SystemExt};
        let mut owners = self.owners.lock().unwrap();
        let mut system = System::new();
        system.refresh_processes();
        owners.retain(|owner| match owner.pid {
            Some(pid) => system.process(sysinfo::Pid::from_u32(pid)).is_some(),
            None => true,
        });
    }
}

fn is_port_bindable(port: u16) -> bool {
    format!("localhost:{}", port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .map(|addr| TcpListener::bind(addr).is_ok())
        .unwrap_or(false)
}

/// A held OS listener used to close the TOCTOU window between "chosen the
/// port" and "child actually binds".
pub struct PortReservation {
    listener: Option<TcpListener>,
    port: u16,
}

impl PortReservation {
    pub fn reserve(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .map_err(|e| anyhow!("failed to reserve port {}: {}", port, e))?;
        let bound_port = listener.local_addr()?.port();
        Ok(Self {
            listener: Some(listener),
            port: bound_port,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn release(mut self) {
        self.listener.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_is_idempotent_within_a_run() {
        let allocator = PortAllocator::new("proj");
        let (p1, _) = allocator.assign_port("api", 9100, false).unwrap();
        let (p2, _) = allocator.assign_port("api", 9999, false).unwrap();
        assert_eq!(p1, p2);
    }

    #[test]
    fn concurrent_assignment_never_hands_out_duplicate_ports() {
        let allocator = std::sync::Arc::new(PortAllocator::new("proj"));
        let mut handles = Vec::new();
        for i in 0..8 {
            let allocator = allocator.clone();
            handles.push(std::thread::spawn(move || {
                allocator
                    .assign_port(&format!("svc-{}", i), 9200, false)
                    .unwrap()
                    .0
            }));
        }
        let ports: Vec<u16> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let mut sorted = ports.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), ports.len());
    }

    #[test]
    fn explicit_conflict_with_self_assignment_is_not_an_error() {
        let allocator = PortAllocator::new("proj");
        let (p, _) = allocator.assign_port("api", 9300, true).unwrap();
        assert_eq!(p, 9300);
    }

    #[test]
    fn reservation_round_trips() {
        let reservation = PortReservation::reserve(0).unwrap();
        assert!(reservation.port() > 0);
        reservation.release();
    }
}
