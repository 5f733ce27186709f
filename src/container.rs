/// Container runtime driver: starts, stops, and tails logs for services
/// that declare an `image` rather than a language to run from source.
/// Generalised from a Docker-specific manager into a trait so the
/// orchestrator doesn't hard-code bollard, plus the default bollard-backed
/// implementation.

use anyhow::{anyhow, Context, Result};
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;

use crate::manifest::PortSpec;

#[async_trait::async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn start(&self, name: &str, image: &str, ports: &[PortSpec], env: &HashMap<String, String>) -> Result<String>;
    async fn stop(&self, container_id: &str) -> Result<()>;
    async fn restart(&self, container_id: &str) -> Result<()>;
    async fn remove(&self, container_id: &str) -> Result<()>;
    async fn is_running(&self, container_id: &str) -> Result<bool>;

    /// Streams log lines until the container stops logging or the stream
    /// errors. `on_line` receives `(text, is_stderr)`. Boxed rather than
    /// generic so the trait stays object-safe for `Box<dyn ContainerRuntime>`.
    async fn tail_logs(&self, container_id: &str, on_line: Box<dyn FnMut(String, bool) + Send>) -> Result<()>;
}

pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self> {
        let client = Docker::connect_with_local_defaults().context("failed to connect to the local Docker daemon")?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn start(
        &self,
        name: &str,
        image: &str,
        ports: &[PortSpec],
        env: &HashMap<String, String>,
    ) -> Result<String> {
        self.ensure_image(image).await?;

        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        for spec in ports {
            let container_key = format!("{}/{}", spec.container, spec.protocol);
            exposed_ports.insert(container_key.clone(), HashMap::new());
            if let Some(host_port) = spec.host {
                port_bindings.insert(
                    container_key,
                    Some(vec![PortBinding {
                        host_ip: spec.bind_ip.clone(),
                        host_port: Some(host_port.to_string()),
                    }]),
                );
            }
        }

        let env_list: Vec<String> = env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();

        let config = Config {
            image: Some(image.to_string()),
            env: Some(env_list),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };

        let created = self
            .client
            .create_container(Some(options), config)
            .await
            .with_context(|| format!("failed to create container for service '{}'", name))?;

        self.client
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .with_context(|| format!("failed to start container '{}'", created.id))?;

        Ok(created.id)
    }

    async fn stop(&self, container_id: &str) -> Result<()> {
        self.client
            .stop_container(container_id, Some(StopContainerOptions { t: 10 }))
            .await
            .with_context(|| format!("failed to stop container '{}'", container_id))?;
        Ok(())
    }

    async fn restart(&self, container_id: &str) -> Result<()> {
        self.client
            .restart_container(container_id, None)
            .await
            .with_context(|| format!("failed to restart container '{}'", container_id))?;
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        self.client
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .with_context(|| format!("failed to remove container '{}'", container_id))?;
        Ok(())
    }

    async fn is_running(&self, container_id: &str) -> Result<bool> {
        let inspect = self
            .client
            .inspect_container(container_id, None)
            .await
            .with_context(|| format!("failed to inspect container '{}'", container_id))?;
        Ok(inspect.state.and_then(|s| s.running).unwrap_or(false))
    }

    async fn tail_logs(&self, container_id: &str, mut on_line: Box<dyn FnMut(String, bool) + Send>) -> Result<()> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            tail: "all".to_string(),
            ..Default::default()
        };

        let mut stream = self.client.logs(container_id, Some(options));
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bollard::container::LogOutput::StdOut { message }) => {
                    on_line(String::from_utf8_lossy(&message).into_owned(), false);
                }
                Ok(bollard::container::LogOutput::StdErr { message }) => {
                    on_line(String::from_utf8_lossy(&message).into_owned(), true);
                }
                Ok(_) => {}
                Err(e) => return Err(anyhow!("log stream for '{}' failed: {}", container_id, e)),
            }
        }
        Ok(())
    }
}

impl DockerRuntime {
    async fn ensure_image(&self, image: &str) -> Result<()> {
        use bollard::image::CreateImageOptions;

        if self.client.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            progress.with_context(|| format!("failed to pull image '{}'", image))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_spec_protocol_formats_as_bollard_expects() {
        let spec = crate::manifest::port_spec::parse_port_spec("8080:80", true).unwrap();
        let key = format!("{}/{}", spec.container, spec.protocol);
        assert_eq!(key, "80/tcp");
    }
}
