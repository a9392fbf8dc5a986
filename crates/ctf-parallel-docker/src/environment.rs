//! Docker Environment Adapter: brings up one attempt's isolated challenge stack and
//! attaches the solver sandbox to it.
//!
//! `compose up`/`compose down` shell out to the `docker compose` CLI plugin via
//! `tokio::process::Command` — there is no single-container Engine API call that
//! reproduces compose's merge/build/interpolation semantics, matching the approach the
//! original Python takes with `subprocess`. Network creation/removal and the
//! solver-sandbox attach go through `bollard` directly, since those operations have a
//! clean Engine API call.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ctf_parallel_common::challenge::Challenge;
use ctf_parallel_common::compose::{self, PortMap};
use ctf_parallel_common::ports::PortAllocator;

use crate::client::DockerClient;
use crate::error::DockerEnvError;

/// Server-description wording the solver places in its challenge prompt. **Critical
/// invariant:** never references `localhost`, never the
/// external port — only the service alias and the internal port, since the solver runs as
/// a peer container on the same bridge.
pub fn server_description(challenge: &Challenge) -> String {
    if !challenge.is_netcat_style() {
        format!(
            "The challenge service is accessible via `curl http://{}:{}`.",
            challenge.server_alias, challenge.internal_port
        )
    } else {
        format!(
            "The challenge service is accessible via `connect_start {} {}`.",
            challenge.server_alias, challenge.internal_port
        )
    }
}

pub struct EnvironmentHandle {
    pub port_map: PortMap,
    pub server_description: String,
    rewritten_compose_path: PathBuf,
    network_name: String,
}

impl EnvironmentHandle {
    pub fn port_map(&self) -> &PortMap {
        &self.port_map
    }
}

pub struct DockerEnvironmentAdapter {
    docker: Arc<dyn DockerClient>,
    allocator: PortAllocator,
}

impl DockerEnvironmentAdapter {
    pub fn new(docker: Arc<dyn DockerClient>, allocator: PortAllocator) -> Self {
        Self { docker, allocator }
    }

    pub async fn start(
        &self,
        challenge: &Challenge,
        suffix: &str,
        solver_container: &str,
        dynamic_ports: bool,
    ) -> Result<EnvironmentHandle, DockerEnvError> {
        let network_name = format!("ctfnet-{suffix}");
        let source_compose = challenge.compose_path();
        let rewritten_compose_path = source_compose
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!(
                "docker-compose-{suffix}-{}.yml",
                std::process::id()
            ));

        let mut port_map: PortMap = HashMap::new();
        if dynamic_ports {
            port_map.insert(challenge.internal_port, self.allocator.allocate_one()?);
            compose::rewrite(
                &source_compose,
                &rewritten_compose_path,
                suffix,
                &network_name,
                &mut port_map,
                &self.allocator,
            )?;
        } else {
            std::fs::copy(&source_compose, &rewritten_compose_path)?;
        }

        if !self.docker.network_exists(&network_name).await? {
            self.docker.create_bridge_network(&network_name).await?;
        }

        compose_up(&rewritten_compose_path).await?;

        self.docker.connect_network(&network_name, solver_container).await?;

        Ok(EnvironmentHandle {
            port_map,
            server_description: server_description(challenge),
            rewritten_compose_path,
            network_name,
        })
    }

    pub async fn close(&self, handle: &EnvironmentHandle) -> Result<(), DockerEnvError> {
        if let Err(e) = compose_down(&handle.rewritten_compose_path).await {
            log::warn!("compose down failed (continuing cleanup): {e}");
        }
        if let Err(e) = self.docker.remove_network(&handle.network_name).await {
            log::warn!("network removal failed (swallowed): {e}");
        }

        let _ = std::fs::remove_file(&handle.rewritten_compose_path);
        Ok(())
    }
}

async fn compose_up(compose_path: &Path) -> Result<(), DockerEnvError> {
    run_compose(compose_path, &["up", "-d", "--force-recreate"]).await
}

async fn compose_down(compose_path: &Path) -> Result<(), DockerEnvError> {
    run_compose(compose_path, &["down"]).await
}

async fn run_compose(compose_path: &Path, args: &[&str]) -> Result<(), DockerEnvError> {
    let output = tokio::process::Command::new("docker")
        .arg("compose")
        .arg("-f")
        .arg(compose_path)
        .args(args)
        .output()
        .await?;

    if !output.status.success() {
        return Err(DockerEnvError::ComposeCli(format!(
            "docker compose {:?} exited with {}: {}",
            args,
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chall(category: &str) -> Challenge {
        Challenge {
            challenge_id: "pwn_example".into(),
            repo_path: "/tmp/chall".into(),
            category: category.into(),
            name: "Example".into(),
            description: String::new(),
            internal_port: 9999,
            server_alias: "chall".into(),
            files: vec![],
        }
    }

    #[test]
    fn server_description_never_mentions_localhost_or_external_port() {
        for category in ["pwn", "web", "misc", "rev", "crypto", "forensics"] {
            let c = chall(category);
            let desc = server_description(&c);
            assert!(!desc.contains("localhost"));
            assert!(desc.contains(&c.server_alias));
            assert!(desc.contains(&c.internal_port.to_string()));
        }
    }

    #[test]
    fn web_and_misc_use_curl_others_use_connect_start() {
        assert!(server_description(&chall("web")).contains("curl"));
        assert!(server_description(&chall("misc")).contains("curl"));
        assert!(server_description(&chall("pwn")).contains("connect_start"));
        assert!(server_description(&chall("rev")).contains("connect_start"));
    }
}
