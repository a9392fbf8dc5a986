//! Prediction & Trajectory I/O: `all_preds.jsonl` and `<instance_id>.traj` layout.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub instance_id: String,
    pub model_patch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_category: Option<String>,
}

impl PredictionRecord {
    pub fn is_success(&self) -> bool {
        self.model_patch.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelStats {
    pub tokens_sent: u64,
    pub tokens_received: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TrajectoryInfo {
    pub model_stats: ModelStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Trajectory {
    pub history: Vec<HistoryEntry>,
    pub trajectory: Vec<serde_json::Value>,
    pub info: TrajectoryInfo,
}

/// Appends one line to `all_preds.jsonl`, flushing and `sync_data`-ing before returning
/// since this file is the cross-process rendezvous collators poll.
pub async fn append_prediction(run_dir: &Path, record: &PredictionRecord) -> std::io::Result<()> {
    let path = run_dir.join("all_preds.jsonl");
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    file.sync_data().await?;
    Ok(())
}

pub async fn write_trajectory(run_dir: &Path, instance_id: &str, trajectory: &Trajectory) -> std::io::Result<()> {
    let path = run_dir.join(format!("{instance_id}.traj"));
    let contents = serde_json::to_string_pretty(trajectory)?;
    tokio::fs::write(path, contents).await
}

/// Reads `all_preds.jsonl` and, per `instance_id`, selects the first record whose
/// `model_patch` is non-null; otherwise the first record seen. Logs a warning for any
/// successful record whose `.traj` file is missing (data-integrity warning, not an
/// error.
pub fn read_canonical_predictions(run_dir: &Path) -> std::io::Result<HashMap<String, PredictionRecord>> {
    let path = run_dir.join("all_preds.jsonl");
    let text = std::fs::read_to_string(path)?;

    let mut canonical: HashMap<String, PredictionRecord> = HashMap::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let record: PredictionRecord = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("skipping malformed prediction line: {e}");
                continue;
            }
        };
        match canonical.get(&record.instance_id) {
            None => {
                canonical.insert(record.instance_id.clone(), record);
            }
            Some(existing) if !existing.is_success() && record.is_success() => {
                canonical.insert(record.instance_id.clone(), record);
            }
            _ => {}
        }
    }

    for record in canonical.values() {
        if record.is_success() {
            let traj_path = run_dir.join(format!("{}.traj", record.instance_id));
            if !traj_path.exists() {
                log::warn!(
                    "prediction for {} reports success but {} is missing",
                    record.instance_id,
                    traj_path.display()
                );
            }
        }
    }

    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_then_read_canonical_prefers_first_success() {
        let dir = tempfile::tempdir().unwrap();
        append_prediction(
            dir.path(),
            &PredictionRecord {
                instance_id: "pwn_Foo".into(),
                model_patch: None,
                challenge_name: None,
                challenge_category: None,
            },
        )
        .await
        .unwrap();
        append_prediction(
            dir.path(),
            &PredictionRecord {
                instance_id: "pwn_Foo".into(),
                model_patch: Some("flag{x}".into()),
                challenge_name: None,
                challenge_category: None,
            },
        )
        .await
        .unwrap();
        append_prediction(
            dir.path(),
            &PredictionRecord {
                instance_id: "pwn_Foo".into(),
                model_patch: Some("flag{y}".into()),
                challenge_name: None,
                challenge_category: None,
            },
        )
        .await
        .unwrap();

        let canonical = read_canonical_predictions(dir.path()).unwrap();
        let rec = canonical.get("pwn_Foo").unwrap();
        assert_eq!(rec.model_patch.as_deref(), Some("flag{x}"));
    }

    #[tokio::test]
    async fn falls_back_to_first_line_when_no_success() {
        let dir = tempfile::tempdir().unwrap();
        append_prediction(
            dir.path(),
            &PredictionRecord {
                instance_id: "web_Bar".into(),
                model_patch: None,
                challenge_name: None,
                challenge_category: None,
            },
        )
        .await
        .unwrap();

        let canonical = read_canonical_predictions(dir.path()).unwrap();
        assert!(canonical.get("web_Bar").unwrap().model_patch.is_none());
    }
}
