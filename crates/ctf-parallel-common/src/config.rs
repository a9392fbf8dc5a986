//! Run configuration: a single YAML file with sections `dataset`,
//! `execution`, `model`, `docker`, `environment`, `swe_agent`. Unknown fields are
//! rejected at load time.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetConfig {
    pub name: String,
    pub dataset_path: PathBuf,
    #[serde(default = "default_start")]
    pub start: u32,
    #[serde(default)]
    pub end: u32,
    pub writeup_path: Option<PathBuf>,
    /// Supplements the hard-coded benchmark-size success-rate denominators in the
    /// source (`intercode_ctf=91`, `cybench=40`, `nyu_ctf=192`).
    pub expected_total: Option<u32>,
}

fn default_start() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionConfig {
    #[serde(default = "default_try_times")]
    pub try_times: u32,
    #[serde(default = "default_start")]
    pub start_try: u32,
    #[serde(default = "default_parallel_tasks")]
    pub parallel_tasks: u32,
    #[serde(default = "default_delay_between_submissions")]
    pub delay_between_submissions_secs: f64,
    #[serde(default = "default_max_wait_time")]
    pub max_wait_time_secs: u64,
    #[serde(default = "default_true")]
    pub cleanup_on_start: bool,
    #[serde(default = "default_true")]
    pub cleanup_per_attempt: bool,
    #[serde(default = "default_true")]
    pub cleanup_on_exit: bool,
    pub output_dir: PathBuf,
    pub log_dir: PathBuf,
}

fn default_try_times() -> u32 {
    1
}
fn default_parallel_tasks() -> u32 {
    4
}
fn default_delay_between_submissions() -> f64 {
    1.0
}
fn default_max_wait_time() -> u64 {
    3600
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelProvider {
    OpenAi,
    Anthropic,
    BedrockAnthropic,
    BedrockConverse,
    Ollama,
    Together,
    Replay,
    Human,
    InstantEmptySubmit,
}

impl ModelProvider {
    pub fn is_aws(self) -> bool {
        matches!(self, ModelProvider::BedrockAnthropic | ModelProvider::BedrockConverse)
    }

    pub fn is_openai_compatible(self) -> bool {
        matches!(self, ModelProvider::OpenAi)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    pub provider: ModelProvider,
    pub model_name: String,
    #[serde(default)]
    pub host_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_rate")]
    pub rate_in: f64,
    #[serde(default = "default_rate")]
    pub rate_out: f64,
    #[serde(default)]
    pub per_instance_cost_limit: f64,
    #[serde(default)]
    pub total_cost_limit: f64,
    #[serde(default)]
    pub duplicate_response_guard: bool,
    #[serde(default = "default_per_instance_step_limit")]
    pub per_instance_step_limit: u32,
}

fn default_temperature() -> f64 {
    0.0
}
fn default_top_p() -> f64 {
    1.0
}
fn default_rate() -> f64 {
    0.0
}
fn default_per_instance_step_limit() -> u32 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DockerConfig {
    #[serde(default = "default_true")]
    pub enable_dynamic_ports: bool,
    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,
    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,
    pub image_name: String,
    pub llm_server_image: String,
}

fn default_port_range_start() -> u16 {
    10000
}
fn default_port_range_end() -> u16 {
    20000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentConfig {
    #[serde(default = "default_docker_start_up_delay")]
    pub docker_start_up_delay_secs: f64,
    #[serde(default = "default_model_max_retries")]
    pub model_max_retries: u32,
    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,
}

fn default_docker_start_up_delay() -> f64 {
    1.0
}
fn default_model_max_retries() -> u32 {
    10
}
fn default_action_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweAgentConfig {
    /// Path to the solver's entrypoint executable. The solver itself is an opaque
    /// child process (out of scope); only its invocation is this repo's concern.
    pub solver_command: PathBuf,
    pub config_file: PathBuf,
    #[serde(default)]
    pub allow_dirty_repo: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub dataset: DatasetConfig,
    pub execution: ExecutionConfig,
    pub model: ModelConfig,
    pub docker: DockerConfig,
    #[serde(default)]
    pub environment: EnvironmentConfig,
    pub swe_agent: SweAgentConfig,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            docker_start_up_delay_secs: default_docker_start_up_delay(),
            model_max_retries: default_model_max_retries(),
            action_timeout_secs: default_action_timeout(),
        }
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: RunConfig = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks try range, parallelism, dataset presence, then credentials, in that
    /// order, returning on the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.execution.start_try < 1 || self.execution.start_try > self.execution.try_times {
            return Err(ConfigError::InvalidTryRange {
                start_try: self.execution.start_try,
                try_times: self.execution.try_times,
            });
        }
        if self.execution.parallel_tasks < 1 {
            return Err(ConfigError::InvalidParallelism(self.execution.parallel_tasks));
        }
        if !self.dataset.dataset_path.exists() {
            return Err(ConfigError::MissingDataset(
                self.dataset.dataset_path.display().to_string(),
            ));
        }
        self.validate_credentials()?;
        Ok(())
    }

    fn validate_credentials(&self) -> Result<(), ConfigError> {
        if self.model.provider.is_aws() {
            for var in ["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY", "AWS_SESSION_TOKEN"] {
                if std::env::var(var).is_err() {
                    return Err(ConfigError::MissingCredential(var));
                }
            }
        }
        if self.model.provider.is_openai_compatible() {
            if std::env::var("OPENAI_API_KEY").is_err() {
                return Err(ConfigError::MissingCredential("OPENAI_API_KEY"));
            }
        }
        Ok(())
    }
}
