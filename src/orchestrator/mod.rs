/// Ties every module together: resolves each service's `ServiceRuntime`,
/// launches services level by level per the dependency graph, gates each
/// level on its predecessors becoming healthy, and tears everything down on
/// failure or on request.

pub mod stopper;

use anyhow::{anyhow, Context, Result};
use futures::future::join_all;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::container::{ContainerRuntime, DockerRuntime};
use crate::env_composer::{resolve_environment, ServiceEndpoint};
use crate::graph::DependencyGraph;
use crate::health::HealthChecker;
use crate::logs::LogManager;
use crate::manifest::Manifest;
use crate::ports::PortAllocator;
use crate::process_controller::{self, ProcessController};
use crate::registry::{ProcessKind, ServiceProcess, ServiceRegistry};
use crate::runtime::{detect_runtime, ServiceRuntime};

const LEVEL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub struct Orchestrator {
    manifest: Manifest,
    manifest_root: PathBuf,
    graph: DependencyGraph,
    ports: PortAllocator,
    registry: ServiceRegistry,
    logs: LogManager,
    health: HealthChecker,
    process_controller: Box<dyn ProcessController>,
    container_runtime: Option<Box<dyn ContainerRuntime>>,
}

impl Orchestrator {
    pub fn new(manifest: Manifest, manifest_root: PathBuf) -> Result<Self> {
        manifest.validate()?;
        let graph = DependencyGraph::from_manifest(&manifest);
        if let Some(cycle) = graph.detect_cycles() {
            return Err(anyhow!("dependency cycle detected: {}", cycle.join(" -> ")));
        }

        let ports = PortAllocator::new(manifest.name.clone());
        let logs = match &manifest.logs {
            Some(cfg) => LogManager::with_filter_config(cfg.filters.exclude.clone(), cfg.filters.include_builtins),
            None => LogManager::new(),
        };

        let container_runtime: Option<Box<dyn ContainerRuntime>> = if manifest.services.values().any(|s| s.is_container()) {
            Some(Box::new(DockerRuntime::connect().context("starting a service declares an image but Docker is unreachable")?))
        } else {
            None
        };

        Ok(Self {
            manifest,
            manifest_root,
            graph,
            ports,
            registry: ServiceRegistry::new(),
            logs,
            health: HealthChecker::new(),
            process_controller: process_controller::platform_controller(),
            container_runtime,
        })
    }

    /// Launches every service the manifest declares, level by level, gating
    /// each level on the previous one's services reporting healthy. Tears
    /// down everything already started if any level fails.
    pub async fn start_all(&self) -> Result<()> {
        let names: Vec<String> = self.manifest.services.keys().cloned().collect();
        self.start_services(&names).await
    }

    /// Launches `names` plus everything they transitively depend on.
    pub async fn start_services(&self, names: &[String]) -> Result<()> {
        let subgraph = self.graph.filter_by_services(names);
        let levels = subgraph.topological_sort()?;

        for level in &levels {
            let runnable: Vec<&String> = level.iter().filter(|n| self.manifest.services.contains_key(*n)).collect();
            if runnable.is_empty() {
                continue;
            }

            let launches = runnable.iter().map(|name| self.launch_one(name));
            let results = tokio::time::timeout(LEVEL_TIMEOUT, join_all(launches))
                .await
                .map_err(|_| anyhow!("level {:?} did not come up within {:?}", runnable, LEVEL_TIMEOUT))?;

            for result in results {
                if let Err(e) = result {
                    self.stop_all().await;
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    async fn launch_one(&self, name: &str) -> Result<()> {
        let service = self
            .manifest
            .services
            .get(name)
            .ok_or_else(|| anyhow!("unknown service '{}'", name))?;

        let runtime = detect_runtime(name, service, &self.manifest_root, &self.ports)
            .with_context(|| format!("failed to detect a runtime for '{}'", name))?;

        if let Some(image) = &runtime.container_image {
            self.launch_container(name, &runtime, image).await?;
        } else {
            self.launch_process(name, &runtime)?;
        }

        let pid = self.registry.pid_of(name);
        let log_buffer = self.logs.buffer_for(&self.manifest.name, name);
        self.health
            .perform_health_check(&runtime.health_check, pid, Some(&log_buffer))
            .with_context(|| format!("'{}' did not become healthy", name))?;

        Ok(())
    }

    async fn launch_container(&self, name: &str, runtime: &ServiceRuntime, image: &str) -> Result<()> {
        let driver = self
            .container_runtime
            .as_ref()
            .ok_or_else(|| anyhow!("'{}' declares a container image but no container runtime is available", name))?;

        let ports = self.manifest.services[name]
            .ports
            .iter()
            .filter_map(|raw| crate::manifest::parse_port_spec(raw, true).ok())
            .collect::<Vec<_>>();

        let container_id = driver.start(name, image, &ports, &runtime.env).await?;

        self.registry.register(ServiceProcess {
            runtime: runtime.clone(),
            pid: None,
            container_id: Some(container_id),
            kind: ProcessKind::Container,
            started_at: SystemTime::now(),
        });

        Ok(())
    }

    fn launch_process(&self, name: &str, runtime: &ServiceRuntime) -> Result<()> {
        let peers = self.peer_endpoints(name);
        let service = &self.manifest.services[name];
        let env = resolve_environment(service, &runtime.env, &runtime.working_dir, &peers);

        let log_buffer = self.logs.buffer_for(&self.manifest.name, name);

        let mut command = tokio::process::Command::new(&runtime.command);
        command
            .args(&runtime.args)
            .current_dir(&runtime.working_dir)
            .envs(&env)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn '{}' ({})", name, runtime.command))?;

        let pid = child
            .id()
            .ok_or_else(|| anyhow!("'{}' exited before its PID could be read", name))?;

        if let Some(stdout) = child.stdout.take() {
            spawn_log_reader(stdout, log_buffer.clone(), false);
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_log_reader(stderr, log_buffer, true);
        }

        // Reap the child's exit status in the background so it never lingers
        // as a zombie; the registry tracks it by PID, not by this handle.
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        self.registry.register(ServiceProcess {
            runtime: runtime.clone(),
            pid: Some(pid),
            container_id: None,
            kind: ProcessKind::Child,
            started_at: SystemTime::now(),
        });

        Ok(())
    }

    fn peer_endpoints(&self, launching: &str) -> Vec<ServiceEndpoint> {
        self.registry
            .running_services()
            .into_iter()
            .filter(|n| n != launching)
            .filter_map(|n| {
                let port = self.registry.port_of(&n)?;
                Some(ServiceEndpoint {
                    name: n,
                    host: "127.0.0.1".to_string(),
                    port,
                })
            })
            .collect()
    }

    pub async fn stop_service(&self, name: &str) -> Result<()> {
        let Some(process) = self.registry.remove(name) else {
            return Ok(());
        };

        match process.kind {
            ProcessKind::Child => {
                if let Some(pid) = process.pid {
                    stopper::stop_service_graceful(self.process_controller.as_ref(), pid)?;
                }
            }
            ProcessKind::Container => {
                if let (Some(driver), Some(container_id)) = (&self.container_runtime, &process.container_id) {
                    driver.stop(container_id).await?;
                }
            }
        }

        Ok(())
    }

    pub async fn stop_all(&self) {
        let names = self.registry.running_services();
        for name in names {
            let _ = self.stop_service(&name).await;
        }
    }

    pub fn logs(&self) -> &LogManager {
        &self.logs
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }
}

fn spawn_log_reader<R>(reader: R, buffer: Arc<crate::logs::LogBuffer>, is_stderr: bool)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        use tokio::io::{AsyncBufReadExt, BufReader};
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            buffer.push(line, is_stderr);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_with_two_independent_services() -> Manifest {
        let yaml = r#"
name: demo
services:
  one:
    project: .
    command: "true"
  two:
    project: .
    command: "true"
"#;
        Manifest::from_yaml(yaml).unwrap()
    }

    #[test]
    fn construction_rejects_cyclic_manifests() {
        let yaml = r#"
name: demo
services:
  a:
    project: .
    uses: [b]
  b:
    project: .
    uses: [a]
"#;
        let manifest = Manifest::from_yaml(yaml).unwrap();
        let result = Orchestrator::new(manifest, PathBuf::from("."));
        assert!(result.is_err());
    }

    #[test]
    fn construction_succeeds_for_independent_services() {
        let manifest = manifest_with_two_independent_services();
        let orchestrator = Orchestrator::new(manifest, PathBuf::from("."));
        assert!(orchestrator.is_ok());
    }
}
