//! Challenge Loader: thin integration wrapper around
//! `ctf_parallel_common::challenge::load`, plus writeup sampling for the Worker Launcher.

use rand::seq::SliceRandom;

use ctf_parallel_common::challenge::{ChallengeIndex, WriteupIndex};
use ctf_parallel_common::config::DatasetConfig;
use ctf_parallel_common::error::ConfigError;

pub fn load_challenges(cfg: &DatasetConfig) -> Result<ChallengeIndex, ConfigError> {
    ctf_parallel_common::challenge::load(
        &cfg.dataset_path,
        cfg.start,
        cfg.end,
        cfg.writeup_path.as_deref(),
    )
}

/// Draws one writeup uniformly at random for the given challenge, if any are indexed.
/// Writeups are not applied by the loader itself — only sampled here, for
/// the launcher to fold into the solver's command line.
pub fn sample_writeup(writeups: &WriteupIndex, challenge_id: &str) -> Option<String> {
    writeups
        .get(challenge_id)
        .and_then(|candidates| candidates.choose(&mut rand::thread_rng()))
        .map(|w| w.task_writeup.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctf_parallel_common::challenge::Writeup;
    use std::collections::HashMap;

    #[test]
    fn sample_writeup_returns_none_when_absent() {
        let idx: WriteupIndex = WriteupIndex::new();
        assert!(sample_writeup(&idx, "pwn_foo").is_none());
    }

    #[test]
    fn sample_writeup_picks_from_indexed_candidates() {
        let mut idx: WriteupIndex = WriteupIndex::new();
        idx.insert(
            "pwn_foo".into(),
            vec![Writeup {
                task_writeup: "use a format string bug".into(),
                extra: HashMap::new(),
            }],
        );
        assert_eq!(
            sample_writeup(&idx, "pwn_foo").as_deref(),
            Some("use a format string bug")
        );
    }
}
