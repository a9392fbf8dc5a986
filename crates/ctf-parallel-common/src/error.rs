use thiserror::Error;

/// Fatal to the run. Only these unwind to the process boundary.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing credential {0} for the configured model backend")]
    MissingCredential(&'static str),
    #[error("start_try ({start_try}) must be <= try_times ({try_times})")]
    InvalidTryRange { start_try: u32, try_times: u32 },
    #[error("parallel_tasks must be >= 1, got {0}")]
    InvalidParallelism(u32),
    #[error("dataset file not found: {0}")]
    MissingDataset(String),
    #[error("failed to parse run configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to read run configuration from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Attempt-scoped; absorbed into the attempt's terminal state, never unwinds past the Scheduler.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("service '{0}' not found in compose manifest")]
    NoSuchService(String),
    #[error("malformed port spec: {0}")]
    MalformedPortSpec(String),
    #[error("compose manifest is not a YAML mapping at its top level")]
    NotAMapping,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Attempt-scoped. Raised by port allocation.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("no free ports found in range {start}-{end} after scanning the whole range")]
    NoFreePorts { start: u16, end: u16 },
}

/// Attempt-scoped; raised by the model client abstraction.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("context window exceeded")]
    ContextWindowExceeded,
    #[error("cost limit exceeded: instance_cost={instance_cost:.4} total_cost={total_cost:.4}")]
    CostLimitExceeded {
        instance_cost: f64,
        total_cost: f64,
    },
    #[error("model backend request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("model backend returned a malformed response: {0}")]
    MalformedResponse(String),
    #[error("exhausted retries ({attempts}) querying the model backend: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<ModelError>,
    },
}
