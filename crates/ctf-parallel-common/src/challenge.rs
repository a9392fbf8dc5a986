//! Challenge and attempt descriptors plus the challenge-index loader.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Immutable once loaded. `challenge_id`'s prefix before the first `_` names the CTF
/// subdomain (`web`, `pwn`, `rev`, `crypto`, `misc`, `forensics`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Challenge {
    pub challenge_id: String,
    pub repo_path: PathBuf,
    pub category: String,
    pub name: String,
    pub description: String,
    pub internal_port: u16,
    pub server_alias: String,
    #[serde(default)]
    pub files: Vec<String>,
}

impl Challenge {
    /// `category + "_" + alnum_filtered(name)`, matching `InstanceBuilder` in the source
    /// solver harness. Non-alphanumeric characters are dropped, not replaced.
    pub fn instance_id(&self) -> String {
        let filtered: String = self.name.chars().filter(|c| c.is_alphanumeric()).collect();
        format!("{}_{}", self.category, filtered)
    }

    pub fn challenge_json_path(&self) -> PathBuf {
        self.repo_path.join("challenge.json")
    }

    pub fn compose_path(&self) -> PathBuf {
        self.repo_path.join("docker-compose.yml")
    }

    /// `true` for categories that talk over a raw TCP socket rather than HTTP.
    pub fn is_netcat_style(&self) -> bool {
        !matches!(self.category.as_str(), "web" | "misc")
    }
}

/// One writeup hint. Only `task_writeup` is interpreted by this engine; any other fields
/// a dataset carries pass through untouched via `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Writeup {
    pub task_writeup: String,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

pub type WriteupIndex = HashMap<String, Vec<Writeup>>;

/// `[ChallengeDescriptor]` plus the optional writeup index, as returned by `load`.
pub struct ChallengeIndex {
    pub challenges: Vec<Challenge>,
    pub writeups: WriteupIndex,
}

/// Parse a JSON object keyed by `challenge_id`, apply 1-based inclusive `[start, end]`
/// slicing, and optionally load a writeup mapping. `end == 0` means "to the last entry".
pub fn load(
    dataset_path: &Path,
    start: u32,
    end: u32,
    writeup_path: Option<&Path>,
) -> Result<ChallengeIndex, ConfigError> {
    let text = std::fs::read_to_string(dataset_path).map_err(|source| ConfigError::Io {
        path: dataset_path.display().to_string(),
        source,
    })?;
    let by_id: HashMap<String, Challenge> = serde_json::from_str(&text)?;

    // Deterministic order: the dataset's JSON key order isn't guaranteed by the format,
    // but serde_json's default map preserves insertion order unless the "preserve_order"
    // feature is absent; sort by challenge_id so slicing is reproducible regardless.
    let mut ids: Vec<&String> = by_id.keys().collect();
    ids.sort();

    let total = ids.len() as u32;
    let start = start.max(1);
    let end = if end == 0 { total } else { end.min(total) };

    let mut challenges = Vec::new();
    if start <= end {
        for id in ids
            .into_iter()
            .skip((start - 1) as usize)
            .take((end - start + 1) as usize)
        {
            challenges.push(by_id.get(id).expect("id came from this map").clone());
        }
    }

    let writeups = match writeup_path {
        Some(p) => {
            let text = std::fs::read_to_string(p).map_err(|source| ConfigError::Io {
                path: p.display().to_string(),
                source,
            })?;
            serde_json::from_str(&text)?
        }
        None => WriteupIndex::new(),
    };

    Ok(ChallengeIndex {
        challenges,
        writeups,
    })
}

/// States form Pending < Running < (any terminal); terminal states are monotone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptState {
    Pending,
    Running,
    SuccessCompleted,
    FailedCompleted,
    TimedOut,
    Stuck,
    DockerError,
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, AttemptState::Pending | AttemptState::Running)
    }
}

/// Created per (challenge × try). The naming conventions below are
/// load-bearing because downstream collators and the janitor parse them back out of
/// container/session/status-file names.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub instance_id: u32,
    pub challenge_id: String,
    pub try_number: u32,
    pub execution_id: String,
    pub state: AttemptState,
}

impl Attempt {
    pub fn new(instance_id: u32, challenge_id: String, try_number: u32, execution_id: String) -> Self {
        Self {
            instance_id,
            challenge_id,
            try_number,
            execution_id,
            state: AttemptState::Pending,
        }
    }

    pub fn container_name(&self) -> String {
        format!(
            "{}-parallel-{}-{}-try{}",
            self.execution_id, self.instance_id, self.challenge_id, self.try_number
        )
    }

    pub fn session_name(&self) -> String {
        format!(
            "swe_{}_{}_{}_try{}",
            self.execution_id, self.instance_id, self.challenge_id, self.try_number
        )
    }

    /// Suffix used for the compose rewrite and the private network name; derived
    /// from the same components as `container_name`/`session_name` so the three stay
    /// consistent and are each recoverable by the janitor's name-pattern matching.
    pub fn suffix(&self) -> String {
        format!(
            "{}-{}-{}-try{}",
            self.execution_id, self.instance_id, self.challenge_id, self.try_number
        )
    }

    pub fn network_name(&self) -> String {
        format!("ctfnet-{}", self.suffix())
    }

    pub fn status_path(&self, logs_dir: &Path) -> PathBuf {
        logs_dir
            .join(format!("status_{}", self.execution_id))
            .join(format!(
                "{}_{}_try{}.txt",
                self.instance_id, self.challenge_id, self.try_number
            ))
    }
}
