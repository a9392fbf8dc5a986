//! `DockerClient`: the seam between the janitor, the environment adapter, and the
//! Docker Engine API. The real implementation wraps `bollard::Docker` directly against
//! the Engine API; tests use an in-memory fake instead of a real daemon so the janitor's
//! and environment adapter's own logic stays covered without a Docker socket available.

use async_trait::async_trait;
use bollard::query_parameters::{
    ListContainersOptionsBuilder, ListNetworksOptions, PruneNetworksOptions, PruneVolumesOptions,
    RemoveContainerOptionsBuilder, StopContainerOptionsBuilder,
};
use bollard::secret::{NetworkConnectRequest, NetworkCreateRequest, NetworkDisconnectRequest};
use bollard::Docker;

use crate::error::DockerEnvError;

#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
}

#[derive(Debug, Clone)]
pub struct NetworkSummary {
    pub id: String,
    pub name: String,
    pub containers: Vec<String>,
}

#[async_trait]
pub trait DockerClient: Send + Sync {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, DockerEnvError>;
    async fn stop_container(&self, id: &str) -> Result<(), DockerEnvError>;
    async fn unpause_container(&self, id: &str) -> Result<(), DockerEnvError>;
    async fn remove_container(&self, id: &str) -> Result<(), DockerEnvError>;
    async fn list_networks(&self) -> Result<Vec<NetworkSummary>, DockerEnvError>;
    async fn disconnect_container(&self, network_id: &str, container_id: &str) -> Result<(), DockerEnvError>;
    async fn remove_network(&self, id: &str) -> Result<(), DockerEnvError>;
    async fn prune_networks(&self) -> Result<(), DockerEnvError>;
    async fn prune_volumes(&self) -> Result<(), DockerEnvError>;
    async fn network_exists(&self, name: &str) -> Result<bool, DockerEnvError>;
    async fn create_bridge_network(&self, name: &str) -> Result<(), DockerEnvError>;
    async fn connect_network(&self, network: &str, container: &str) -> Result<(), DockerEnvError>;
}

pub struct BollardClient {
    docker: Docker,
}

impl BollardClient {
    pub fn connect() -> Result<Self, DockerEnvError> {
        Ok(Self {
            docker: Docker::connect_with_local_defaults()?,
        })
    }

    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }
}

fn container_state(c: &bollard::models::ContainerSummary) -> String {
    c.state.clone().map(|s| s.to_string()).unwrap_or_default()
}

fn container_name(c: &bollard::models::ContainerSummary) -> String {
    c.names
        .as_ref()
        .and_then(|n| n.first())
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default()
}

#[async_trait]
impl DockerClient for BollardClient {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, DockerEnvError> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptionsBuilder::new().all(true).build()))
            .await?;
        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.clone().unwrap_or_default(),
                name: container_name(&c),
                image: c.image.clone().unwrap_or_default(),
                state: container_state(&c),
            })
            .collect())
    }

    async fn stop_container(&self, id: &str) -> Result<(), DockerEnvError> {
        self.docker
            .stop_container(id, Some(StopContainerOptionsBuilder::new().t(5).build()))
            .await?;
        Ok(())
    }

    async fn unpause_container(&self, id: &str) -> Result<(), DockerEnvError> {
        self.docker.unpause_container(id).await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), DockerEnvError> {
        self.docker
            .remove_container(id, Some(RemoveContainerOptionsBuilder::new().v(true).force(true).build()))
            .await?;
        Ok(())
    }

    async fn list_networks(&self) -> Result<Vec<NetworkSummary>, DockerEnvError> {
        let networks = self.docker.list_networks(None::<ListNetworksOptions>).await?;
        Ok(networks
            .into_iter()
            .map(|n| NetworkSummary {
                id: n.id.clone().unwrap_or_default(),
                name: n.name.clone().unwrap_or_default(),
                containers: n
                    .containers
                    .map(|m| m.keys().cloned().collect())
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn disconnect_container(&self, network_id: &str, container_id: &str) -> Result<(), DockerEnvError> {
        self.docker
            .disconnect_network(
                network_id,
                NetworkDisconnectRequest {
                    container: Some(container_id.to_string()),
                    force: Some(true),
                },
            )
            .await?;
        Ok(())
    }

    async fn remove_network(&self, id: &str) -> Result<(), DockerEnvError> {
        self.docker.remove_network(id).await?;
        Ok(())
    }

    async fn prune_networks(&self) -> Result<(), DockerEnvError> {
        self.docker.prune_networks(None::<PruneNetworksOptions>).await?;
        Ok(())
    }

    async fn prune_volumes(&self) -> Result<(), DockerEnvError> {
        self.docker.prune_volumes(None::<PruneVolumesOptions>).await?;
        Ok(())
    }

    async fn network_exists(&self, name: &str) -> Result<bool, DockerEnvError> {
        Ok(self.list_networks().await?.iter().any(|n| n.name == name))
    }

    async fn create_bridge_network(&self, name: &str) -> Result<(), DockerEnvError> {
        self.docker
            .create_network(NetworkCreateRequest {
                name: name.to_string(),
                driver: Some("bridge".to_string()),
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    async fn connect_network(&self, network: &str, container: &str) -> Result<(), DockerEnvError> {
        self.docker
            .connect_network(
                network,
                NetworkConnectRequest {
                    container: Some(container.to_string()),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub mod tests_support {
    use super::*;

    /// A `DockerClient` that reports nothing and accepts every mutation — used by unit
    /// tests that only need a value to construct a `Janitor`/environment handle with, not
    /// a real daemon interaction.
    pub struct NoopClient;

    #[async_trait]
    impl DockerClient for NoopClient {
        async fn list_containers(&self) -> Result<Vec<ContainerSummary>, DockerEnvError> {
            Ok(Vec::new())
        }
        async fn stop_container(&self, _id: &str) -> Result<(), DockerEnvError> {
            Ok(())
        }
        async fn unpause_container(&self, _id: &str) -> Result<(), DockerEnvError> {
            Ok(())
        }
        async fn remove_container(&self, _id: &str) -> Result<(), DockerEnvError> {
            Ok(())
        }
        async fn list_networks(&self) -> Result<Vec<NetworkSummary>, DockerEnvError> {
            Ok(Vec::new())
        }
        async fn disconnect_container(&self, _network_id: &str, _container_id: &str) -> Result<(), DockerEnvError> {
            Ok(())
        }
        async fn remove_network(&self, _id: &str) -> Result<(), DockerEnvError> {
            Ok(())
        }
        async fn prune_networks(&self) -> Result<(), DockerEnvError> {
            Ok(())
        }
        async fn prune_volumes(&self) -> Result<(), DockerEnvError> {
            Ok(())
        }
        async fn network_exists(&self, _name: &str) -> Result<bool, DockerEnvError> {
            Ok(false)
        }
        async fn create_bridge_network(&self, _name: &str) -> Result<(), DockerEnvError> {
            Ok(())
        }
        async fn connect_network(&self, _network: &str, _container: &str) -> Result<(), DockerEnvError> {
            Ok(())
        }
    }
}
