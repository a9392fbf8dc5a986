use thiserror::Error;

/// Attempt-scoped; never unwinds past the Scheduler — the Supervisor folds
/// every variant into a terminal `AttemptState` and logs it instead.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("docker environment setup failed: {0}")]
    Environment(#[from] ctf_parallel_docker::DockerEnvError),
    #[error("failed to spawn solver process: {0}")]
    Spawn(#[from] std::io::Error),
}
