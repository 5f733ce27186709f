/// In-memory registry of running service processes, keyed by service name.
/// Mutex-guarded rather than wrapped in a single giant orchestrator lock, so
/// a lookup for one service never blocks on another service's bookkeeping.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

use crate::runtime::ServiceRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    Child,
    Container,
}

pub struct ServiceProcess {
    pub runtime: ServiceRuntime,
    pub pid: Option<u32>,
    pub container_id: Option<String>,
    pub kind: ProcessKind,
    pub started_at: SystemTime,
}

pub struct ServiceRegistry {
    processes: Mutex<HashMap<String, ServiceProcess>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            processes: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, process: ServiceProcess) {
        let mut processes = self.processes.lock().unwrap();
        processes.insert(process.runtime.name.clone(), process);
    }

    pub fn remove(&self, name: &str) -> Option<ServiceProcess> {
        self.processes.lock().unwrap().remove(name)
    }

    pub fn pid_of(&self, name: &str) -> Option<u32> {
        self.processes.lock().unwrap().get(name).and_then(|p| p.pid)
    }

    pub fn container_id_of(&self, name: &str) -> Option<String> {
        self.processes.lock().unwrap().get(name).and_then(|p| p.container_id.clone())
    }

    pub fn port_of(&self, name: &str) -> Option<u16> {
        self.processes.lock().unwrap().get(name).map(|p| p.runtime.port).filter(|&p| p != 0)
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.processes.lock().unwrap().contains_key(name)
    }

    pub fn running_services(&self) -> Vec<String> {
        self.processes.lock().unwrap().keys().cloned().collect()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{HealthCheckProfile, Protocol};
    use std::collections::HashMap as StdHashMap;
    use std::path::PathBuf;

    fn dummy_runtime(name: &str) -> ServiceRuntime {
        ServiceRuntime {
            name: name.to_string(),
            language: "rust".to_string(),
            framework: None,
            package_manager: None,
            command: "true".to_string(),
            args: vec![],
            working_dir: PathBuf::from("."),
            port: 0,
            protocol: Protocol::Process,
            env: StdHashMap::new(),
            health_check: HealthCheckProfile::default(),
            r#type: Protocol::Process,
            mode: None,
            should_update_manifest: false,
            container_image: None,
        }
    }

    #[test]
    fn register_then_lookup_round_trips() {
        let registry = ServiceRegistry::new();
        registry.register(ServiceProcess {
            runtime: dummy_runtime("api"),
            pid: Some(1234),
            container_id: None,
            kind: ProcessKind::Child,
            started_at: SystemTime::now(),
        });
        assert!(registry.is_running("api"));
        assert_eq!(registry.pid_of("api"), Some(1234));
    }

    #[test]
    fn remove_clears_the_entry() {
        let registry = ServiceRegistry::new();
        registry.register(ServiceProcess {
            runtime: dummy_runtime("api"),
            pid: Some(1),
            container_id: None,
            kind: ProcessKind::Child,
            started_at: SystemTime::now(),
        });
        registry.remove("api");
        assert!(!registry.is_running("api"));
    }
}
