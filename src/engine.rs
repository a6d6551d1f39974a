//! Container engine abstraction and its Docker implementation.
//!
//! The orchestrator talks to containers only through [`ContainerEngine`],
//! so the pipeline can run against a fake in tests. The real
//! implementation drives the Docker daemon over bollard.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecOptions};
use bollard::models::{HostConfig, PortBinding};
use futures_util::StreamExt;

use crate::hardening::SecuritySpec;
use crate::mounts::MountMode;

/// Failure talking to the container engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("container '{name}' not found")]
    NotFound { name: String },

    #[error("engine call failed: {reason}")]
    Call { reason: String },
}

impl EngineError {
    fn from_docker(name: &str, err: DockerError) -> Self {
        match err {
            DockerError::DockerResponseServerError {
                status_code: 404, ..
            } => EngineError::NotFound {
                name: name.to_string(),
            },
            other => EngineError::Call {
                reason: other.to_string(),
            },
        }
    }
}

/// One host path bound into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host: String,
    pub container: String,
    pub mode: MountMode,
}

impl BindMount {
    fn as_bind(&self) -> String {
        format!("{}:{}:{}", self.host, self.container, self.mode.as_str())
    }
}

/// Everything the engine needs to create one session container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Initial process; the terminal server is exec'd in later.
    pub command: Vec<String>,
    /// Loopback host port published for the terminal.
    pub host_port: u16,
    /// Port the terminal server listens on inside the container.
    pub internal_port: u16,
    pub binds: Vec<BindMount>,
    pub labels: BTreeMap<String, String>,
    pub security: SecuritySpec,
}

/// The container operations the session pipeline needs.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Registry digests recorded for a local image. Empty for images that
    /// were built locally and never pushed.
    async fn image_repo_digests(&self, image: &str) -> Result<Vec<String>, EngineError>;

    async fn create(&self, spec: &ContainerSpec) -> Result<(), EngineError>;

    async fn start(&self, name: &str) -> Result<(), EngineError>;

    async fn stop(&self, name: &str) -> Result<(), EngineError>;

    async fn remove(&self, name: &str) -> Result<(), EngineError>;

    /// Run a command inside a running container. Returns the exit code,
    /// or `None` when detached.
    async fn exec(
        &self,
        name: &str,
        cmd: Vec<String>,
        detach: bool,
    ) -> Result<Option<i64>, EngineError>;

    /// Host ports currently published by running containers.
    async fn published_host_ports(&self) -> Result<Vec<u16>, EngineError>;
}

/// [`ContainerEngine`] backed by the local Docker daemon.
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    pub fn connect() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| EngineError::Call {
            reason: e.to_string(),
        })?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn image_repo_digests(&self, image: &str) -> Result<Vec<String>, EngineError> {
        let inspect = self
            .docker
            .inspect_image(image)
            .await
            .map_err(|e| EngineError::from_docker(image, e))?;
        Ok(inspect.repo_digests.unwrap_or_default())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<(), EngineError> {
        let port_key = format!("{}/tcp", spec.internal_port);

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(port_key.clone(), HashMap::new());

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            port_key,
            Some(vec![PortBinding {
                host_ip: Some("127.0.0.1".to_string()),
                host_port: Some(spec.host_port.to_string()),
            }]),
        );

        let binds: Vec<String> = spec.binds.iter().map(BindMount::as_bind).collect();

        let mut host_config = HostConfig {
            port_bindings: Some(port_bindings),
            binds: if binds.is_empty() { None } else { Some(binds) },
            ..Default::default()
        };

        let mut user = None;
        match &spec.security {
            SecuritySpec::Hardened(h) => {
                host_config.readonly_rootfs = Some(h.read_only_rootfs);
                host_config.cap_drop = Some(h.cap_drop.clone());
                host_config.memory = Some(h.memory_bytes);
                host_config.nano_cpus = Some(h.nano_cpus);
                if h.no_new_privileges {
                    host_config.security_opt = Some(vec!["no-new-privileges:true".to_string()]);
                }
                let mut tmpfs = HashMap::new();
                for (target, options) in &h.tmpfs {
                    tmpfs.insert(target.clone(), options.clone());
                }
                for m in &h.tmpfs_mounts {
                    tmpfs.insert(
                        m.target.clone(),
                        format!("size={},mode=0{:o}", m.size_bytes, m.mode),
                    );
                }
                host_config.tmpfs = Some(tmpfs);
                user = Some(h.user.clone());
            }
            SecuritySpec::Legacy(l) => {
                if l.host_ipc {
                    host_config.ipc_mode = Some("host".to_string());
                }
            }
        }

        let config = ContainerConfig {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            user,
            exposed_ports: Some(exposed_ports),
            labels: Some(spec.labels.clone().into_iter().collect()),
            host_config: Some(host_config),
            ..Default::default()
        };

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| EngineError::from_docker(&spec.name, e))?;
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| EngineError::from_docker(name, e))
    }

    async fn stop(&self, name: &str) -> Result<(), EngineError> {
        self.docker
            .stop_container(name, Some(StopContainerOptions { t: 5 }))
            .await
            .map_err(|e| EngineError::from_docker(name, e))
    }

    async fn remove(&self, name: &str) -> Result<(), EngineError> {
        self.docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| EngineError::from_docker(name, e))
    }

    async fn exec(
        &self,
        name: &str,
        cmd: Vec<String>,
        detach: bool,
    ) -> Result<Option<i64>, EngineError> {
        let exec = self
            .docker
            .create_exec(
                name,
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdout: Some(!detach),
                    attach_stderr: Some(!detach),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| EngineError::from_docker(name, e))?;

        let results = self
            .docker
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| EngineError::from_docker(name, e))?;

        if detach {
            return Ok(None);
        }
        if let bollard::exec::StartExecResults::Attached { mut output, .. } = results {
            while output.next().await.is_some() {}
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| EngineError::from_docker(name, e))?;
        Ok(inspect.exit_code)
    }

    async fn published_host_ports(&self) -> Result<Vec<u16>, EngineError> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await
            .map_err(|e| EngineError::Call {
                reason: e.to_string(),
            })?;

        let mut ports = Vec::new();
        for container in containers {
            for port in container.ports.unwrap_or_default() {
                if let Some(public) = port.public_port {
                    ports.push(public);
                }
            }
        }
        Ok(ports)
    }
}
