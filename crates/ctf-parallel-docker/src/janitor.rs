//! Docker Janitor: bounded-concurrency sweep/cleanup, grounded on
//! a reverse-order async teardown pattern: stop, then force-remove, then disconnect
//! and remove networks, swallowing and logging every failure along the way.
//!
//! All operations are best-effort: errors are logged and swallowed. The
//! janitor must never block the scheduler indefinitely, so every operation runs under a
//! per-operation timeout.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{stream, StreamExt};

use crate::client::DockerClient;

const CONTAINER_CONCURRENCY: usize = 10;
const NETWORK_CONCURRENCY: usize = 5;
const OP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Janitor {
    docker: Arc<dyn DockerClient>,
    llm_server_image: String,
}

impl Janitor {
    pub fn new(docker: Arc<dyn DockerClient>, llm_server_image: String) -> Self {
        Self {
            docker,
            llm_server_image,
        }
    }

    async fn with_timeout<F, T>(fut: F)
    where
        F: std::future::Future<Output = Result<T, crate::error::DockerEnvError>>,
    {
        match tokio::time::timeout(OP_TIMEOUT, fut).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => log::warn!("docker janitor operation failed (swallowed): {e}"),
            Err(_) => log::warn!("docker janitor operation timed out after {OP_TIMEOUT:?} (swallowed)"),
        }
    }

    async fn teardown_container(docker: &Arc<dyn DockerClient>, c: &crate::client::ContainerSummary) {
        let state = c.state.to_lowercase();
        if state == "running" {
            Self::with_timeout(docker.stop_container(&c.id)).await;
        } else if state == "paused" {
            Self::with_timeout(docker.unpause_container(&c.id)).await;
            Self::with_timeout(docker.stop_container(&c.id)).await;
        }
        // exited/dead (and anything else): proceed directly to force-remove.
        Self::with_timeout(docker.remove_container(&c.id)).await;
    }

    async fn teardown_network(docker: &Arc<dyn DockerClient>, n: &crate::client::NetworkSummary) {
        for container_id in &n.containers {
            Self::with_timeout(docker.disconnect_container(&n.id, container_id)).await;
        }
        Self::with_timeout(docker.remove_network(&n.id)).await;
    }

    fn is_cleanup_target_network(&self, name: &str) -> bool {
        name.starts_with("ctfnet") || name.ends_with("_default") || name.starts_with("tmp_ctfnet")
    }

    /// Remove everything except the long-lived LLM-server container; remove every
    /// `ctfnet*`/`*_default`/`tmp_ctfnet*` network; prune unused networks and volumes.
    pub async fn initial_sweep(&self) {
        log::info!("docker janitor: running initial sweep");
        let containers = match self.docker.list_containers().await {
            Ok(c) => c,
            Err(e) => {
                log::warn!("initial_sweep: failed to list containers (swallowed): {e}");
                Vec::new()
            }
        };
        let targets: Vec<_> = containers
            .into_iter()
            .filter(|c| !c.image.contains(&self.llm_server_image))
            .collect();

        stream::iter(targets.into_iter().map(|c| {
            let docker = self.docker.clone();
            async move { Self::teardown_container(&docker, &c).await }
        }))
        .buffer_unordered(CONTAINER_CONCURRENCY)
        .collect::<Vec<_>>()
        .await;

        let networks = match self.docker.list_networks().await {
            Ok(n) => n,
            Err(e) => {
                log::warn!("initial_sweep: failed to list networks (swallowed): {e}");
                Vec::new()
            }
        };
        let targets: Vec<_> = networks
            .into_iter()
            .filter(|n| self.is_cleanup_target_network(&n.name))
            .collect();

        stream::iter(targets.into_iter().map(|n| {
            let docker = self.docker.clone();
            async move { Self::teardown_network(&docker, &n).await }
        }))
        .buffer_unordered(NETWORK_CONCURRENCY)
        .collect::<Vec<_>>()
        .await;

        Self::with_timeout(self.docker.prune_networks()).await;
        Self::with_timeout(self.docker.prune_volumes()).await;
    }

    /// Remove the one container and any networks belonging to one terminated attempt.
    /// `session_name` is `swe_{execution_id}_{instance_id}_{challenge_id}_try{try_number}`.
    pub async fn per_attempt_cleanup(&self, session_name: &str, execution_id: &str) {
        let Some((instance_id, challenge_id, try_number)) = parse_session_name(session_name) else {
            log::warn!("per_attempt_cleanup: could not parse session name {session_name}");
            return;
        };

        let container_name = format!("{execution_id}-parallel-{instance_id}-{challenge_id}-try{try_number}");
        if let Ok(containers) = self.docker.list_containers().await {
            if let Some(target) = containers.iter().find(|c| c.name == container_name) {
                Self::teardown_container(&self.docker, target).await;
            }
        }

        if let Ok(networks) = self.docker.list_networks().await {
            for n in networks.iter().filter(|n| {
                (n.name.contains(execution_id) && n.name.contains(&instance_id.to_string()))
                    || (n.name.contains(&challenge_id) && n.name.contains(&format!("try{try_number}")))
            }) {
                Self::teardown_network(&self.docker, n).await;
            }
        }
    }

    /// Remove every container/network belonging to one run of the engine.
    pub async fn final_sweep(&self, execution_id: &str) {
        log::info!("docker janitor: running final sweep for {execution_id}");
        let prefix = format!("{execution_id}-parallel-");
        if let Ok(containers) = self.docker.list_containers().await {
            let targets: Vec<_> = containers
                .into_iter()
                .filter(|c| c.name.contains(&prefix))
                .collect();
            stream::iter(targets.into_iter().map(|c| {
                let docker = self.docker.clone();
                async move { Self::teardown_container(&docker, &c).await }
            }))
            .buffer_unordered(CONTAINER_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;
        }

        if let Ok(networks) = self.docker.list_networks().await {
            let targets: Vec<_> = networks
                .into_iter()
                .filter(|n| n.name.contains(execution_id))
                .collect();
            stream::iter(targets.into_iter().map(|n| {
                let docker = self.docker.clone();
                async move { Self::teardown_network(&docker, &n).await }
            }))
            .buffer_unordered(NETWORK_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;
        }

        Self::with_timeout(self.docker.prune_networks()).await;
    }
}

/// Recovers `(instance_id, challenge_id, try_number)` from
/// `swe_{execution_id}_{instance_id}_{challenge_id}_try{try_number}`. `execution_id`
/// itself may contain underscores, so this anchors off the trailing `_try{n}` suffix and
/// the `instance_id` field (the first numeric token after the `swe_` prefix is
/// ambiguous in general, but `execution_id` never starts with a digit in practice since
/// it's built from a hostname, which this parser relies on).
fn parse_session_name(session_name: &str) -> Option<(u32, String, u32)> {
    let rest = session_name.strip_prefix("swe_")?;
    let (head, try_part) = rest.rsplit_once("_try")?;
    let try_number: u32 = try_part.parse().ok()?;

    let mut parts = head.splitn(2, |c: char| c == '_');
    let _execution_prefix_start = parts.next()?;
    // Walk from the right instead: split on the last underscore-delimited run that
    // parses as a number immediately followed by the challenge_id.
    let segments: Vec<&str> = head.split('_').collect();
    for i in 1..segments.len() {
        if let Ok(instance_id) = segments[i].parse::<u32>() {
            let challenge_id = segments[i + 1..].join("_");
            if !challenge_id.is_empty() {
                return Some((instance_id, challenge_id, try_number));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_session_name_back_into_components() {
        let session = "swe_host-42-99999_7_pwn_foo_try2";
        let (instance_id, challenge_id, try_number) = parse_session_name(session).unwrap();
        assert_eq!(instance_id, 7);
        assert_eq!(challenge_id, "pwn_foo");
        assert_eq!(try_number, 2);
    }

    #[test]
    fn cleanup_target_network_matching() {
        let j = Janitor::new(
            Arc::new(crate::client::tests_support::NoopClient),
            "llm-server".into(),
        );
        assert!(j.is_cleanup_target_network("ctfnet-abc"));
        assert!(j.is_cleanup_target_network("tmp_ctfnet_x"));
        assert!(j.is_cleanup_target_network("myapp_default"));
        assert!(!j.is_cleanup_target_network("bridge"));
    }
}
