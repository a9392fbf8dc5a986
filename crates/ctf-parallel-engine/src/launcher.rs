//! Worker Launcher: build the solver command line for one attempt, bring up its
//! Docker environment, run it under `session::run_supervised`, and reclaim its
//! resources on termination via the Janitor.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use ctf_parallel_common::challenge::{Attempt, AttemptState, Challenge};
use ctf_parallel_common::compose::PortMap;
use ctf_parallel_common::config::{ModelProvider, RunConfig};
use ctf_parallel_docker::{DockerEnvironmentAdapter, Janitor};

use crate::error::AttemptError;
use crate::session;

/// An attempt-private copy of the challenge descriptor, augmented with the
/// server description and port mapping C9 computed for this attempt. The solver
/// reads this file via `--data_path` instead of the dataset's shared `challenge.json`.
#[derive(Debug, Serialize)]
struct AttemptChallengeData<'a> {
    #[serde(flatten)]
    challenge: &'a Challenge,
    server_description: String,
    port_map: PortMap,
}

pub struct WorkerLauncher {
    docker: Arc<DockerEnvironmentAdapter>,
    janitor: Arc<Janitor>,
    config: Arc<RunConfig>,
}

impl WorkerLauncher {
    pub fn new(docker: Arc<DockerEnvironmentAdapter>, janitor: Arc<Janitor>, config: Arc<RunConfig>) -> Self {
        Self { docker, janitor, config }
    }

    /// Runs one attempt to completion: brings up the challenge stack, spawns the
    /// solver, waits for it (or for `cancel`), tears everything down, and returns the
    /// terminal `AttemptState`.
    /// `forced_state`, when set before `cancel` fires, is the Supervisor's verdict
    /// (`TimedOut`/`Stuck`) for why it killed the session; absent a setter, a
    /// cancellation defaults to `Stuck`.
    pub async fn run_attempt(
        &self,
        mut attempt: Attempt,
        challenge: Challenge,
        writeup: Option<String>,
        cancel: CancellationToken,
        forced_state: Arc<Mutex<Option<AttemptState>>>,
    ) -> Attempt {
        attempt.state = AttemptState::Running;

        let suffix = attempt.suffix();
        let container_name = attempt.container_name();

        let handle = match self
            .docker
            .start(
                &challenge,
                &suffix,
                &container_name,
                self.config.docker.enable_dynamic_ports,
            )
            .await
        {
            Ok(h) => h,
            Err(e) => {
                let err = AttemptError::from(e);
                log::warn!("{container_name}: {err}");
                attempt.state = classify_error(&err);
                return attempt;
            }
        };

        let data_path = self.config.execution.output_dir.join(format!(
            "attempt_data/{}_{}_try{}.json",
            attempt.instance_id, attempt.challenge_id, attempt.try_number
        ));
        if let Err(e) = write_attempt_data(&data_path, &challenge, &handle).await {
            log::warn!("failed to write attempt-private challenge data for {container_name}: {e}");
        }

        let status_path = attempt.status_path(&self.config.execution.log_dir);
        let log_path = Some(self.config.execution.log_dir.join(format!(
            "{}_parallel_{}_{}_try{}.log",
            attempt.execution_id, attempt.instance_id, attempt.challenge_id, attempt.try_number
        )));

        let cmd = self.build_command(&attempt, &challenge, &data_path, &container_name, writeup.as_deref());

        let outcome = session::run_supervised(cmd, status_path, log_path, cancel).await;

        if let Err(e) = self.docker.close(&handle).await {
            log::warn!("docker environment teardown failed for {container_name} (swallowed): {e}");
        }
        if self.config.execution.cleanup_per_attempt {
            self.janitor
                .per_attempt_cleanup(&attempt.session_name(), &attempt.execution_id)
                .await;
        }

        attempt.state = match outcome {
            Ok(session::SessionOutcome::Success) => AttemptState::SuccessCompleted,
            Ok(session::SessionOutcome::Failed) => AttemptState::FailedCompleted,
            Ok(session::SessionOutcome::DockerError) => AttemptState::DockerError,
            Ok(session::SessionOutcome::Killed) => {
                forced_state.lock().unwrap().unwrap_or(AttemptState::Stuck)
            }
            Err(e) => {
                let err = AttemptError::from(e);
                log::warn!("{container_name}: {err}");
                classify_error(&err)
            }
        };
        attempt
    }

    fn build_command(
        &self,
        attempt: &Attempt,
        challenge: &Challenge,
        data_path: &std::path::Path,
        container_name: &str,
        writeup: Option<&str>,
    ) -> tokio::process::Command {
        let model = &self.config.model;
        let swe = &self.config.swe_agent;
        let trajectory_path = self
            .config
            .execution
            .output_dir
            .join(format!("trajectories/{}/try{}", self.config.dataset.name, attempt.try_number));

        let mut cmd = tokio::process::Command::new(&swe.solver_command);
        cmd.arg("--model_name").arg(&model.model_name)
            .arg("--ctf")
            .arg("--image_name").arg(&self.config.docker.image_name)
            .arg("--data_path").arg(data_path)
            .arg("--repo_path").arg(&challenge.repo_path)
            .arg("--config_file").arg(&swe.config_file)
            .arg("--per_instance_step_limit").arg(model.per_instance_step_limit.to_string())
            .arg("--trajectory_path").arg(&trajectory_path)
            .arg("--temperature").arg(model.temperature.to_string())
            .arg("--top_p").arg(model.top_p.to_string())
            .arg("--container_name").arg(container_name);

        if let Some(host_url) = &model.host_url {
            cmd.arg("--host_url").arg(host_url);
        }
        if self.config.docker.enable_dynamic_ports {
            cmd.arg("--enable_dynamic_ports");
        }
        if swe.allow_dirty_repo {
            cmd.arg("--allow_dirty_repo");
        }
        if let Some(text) = writeup {
            cmd.arg("--writeup").arg(shell_single_quote(text));
        }

        inject_credentials(&mut cmd, model.provider);
        cmd
    }
}

/// Every `AttemptError` variant maps to `DockerError` except a spawn failure, which the
/// session's own process never started for and so carries no docker-side cleanup to flag.
fn classify_error(err: &AttemptError) -> AttemptState {
    match err {
        AttemptError::Environment(_) => AttemptState::DockerError,
        AttemptError::Spawn(_) => AttemptState::FailedCompleted,
    }
}

async fn write_attempt_data(
    path: &std::path::Path,
    challenge: &Challenge,
    handle: &ctf_parallel_docker::EnvironmentHandle,
) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let data = AttemptChallengeData {
        challenge,
        server_description: handle.server_description.clone(),
        port_map: handle.port_map().clone(),
    };
    let text = serde_json::to_string_pretty(&data)?;
    tokio::fs::write(path, text).await
}

fn inject_credentials(cmd: &mut tokio::process::Command, provider: ModelProvider) {
    if provider.is_aws() {
        cmd.env("ISENGARD_PRODUCTION_ACCOUNT", "true");
        for var in ["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY", "AWS_SESSION_TOKEN"] {
            if let Ok(val) = std::env::var(var) {
                cmd.env(var, val);
            }
        }
    }
    if provider.is_openai_compatible() {
        for var in ["OPENAI_API_KEY", "OPENAI_API_BASE_URL"] {
            if let Ok(val) = std::env::var(var) {
                cmd.env(var, val);
            }
        }
    }
}

/// Single-quotes `text` for the solver's own argv-encoding convention. No shell
/// parses this string — the engine spawns the child directly — but the
/// solver's argument parser still expects the `'"'"'`-escaped form on its command line.
fn shell_single_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r#"'"'"'"#))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_single_quote_escapes_embedded_quotes() {
        assert_eq!(shell_single_quote("use a 'format' string"), r#"'use a '"'"'format'"'"' string'"#);
    }

    #[test]
    fn shell_single_quote_wraps_plain_text() {
        assert_eq!(shell_single_quote("plain text"), "'plain text'");
    }
}

