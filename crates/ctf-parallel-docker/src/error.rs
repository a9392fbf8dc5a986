use thiserror::Error;

use ctf_parallel_common::error::{ComposeError, PortError};

/// Attempt-scoped; raised by the docker environment adapter and janitor.
/// Never unwinds past the Scheduler.
#[derive(Debug, Error)]
pub enum DockerEnvError {
    #[error(transparent)]
    Compose(#[from] ComposeError),
    #[error(transparent)]
    Port(#[from] PortError),
    #[error("docker compose invocation failed: {0}")]
    ComposeCli(String),
    #[error(transparent)]
    Bollard(#[from] bollard::errors::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
