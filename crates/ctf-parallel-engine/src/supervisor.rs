//! Attempt Supervisor: one `tokio::time::interval` ticker watches every active
//! attempt's status file for staleness, absence, and the hard ceiling, and force-kills
//! the ones that breach a threshold. The source's three separate
//! sleep loops (finished-session sweep, aggressive sweep, completion wait) collapse
//! into this single pass.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use ctf_parallel_common::challenge::AttemptState;

use crate::session;

const DEFAULT_THARD: Duration = Duration::from_secs(3600);
const DEFAULT_TSTALE: Duration = Duration::from_secs(1800);
const DEFAULT_TNO_STATUS: Duration = Duration::from_secs(1800);
const DEFAULT_TICK: Duration = Duration::from_secs(30);

struct Watched {
    status_path: PathBuf,
    started_at: Instant,
    cancel: CancellationToken,
    forced_state: Arc<Mutex<Option<AttemptState>>>,
}

pub struct Supervisor {
    thard: Duration,
    tstale: Duration,
    tno_status: Duration,
    tick: Duration,
    registry: Mutex<HashMap<String, Watched>>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(DEFAULT_THARD, DEFAULT_TSTALE, DEFAULT_TNO_STATUS, DEFAULT_TICK)
    }
}

impl Supervisor {
    pub fn new(thard: Duration, tstale: Duration, tno_status: Duration, tick: Duration) -> Self {
        Self {
            thard,
            tstale,
            tno_status,
            tick,
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a newly-dispatched attempt. `cancel` is the token the corresponding
    /// `WorkerLauncher::run_attempt` call is racing against; `forced_state` is set
    /// before cancellation so the launcher can distinguish `TimedOut` from `Stuck`.
    pub fn register(
        &self,
        session_name: String,
        status_path: PathBuf,
        cancel: CancellationToken,
        forced_state: Arc<Mutex<Option<AttemptState>>>,
    ) {
        self.registry.lock().unwrap().insert(
            session_name,
            Watched {
                status_path,
                started_at: Instant::now(),
                cancel,
                forced_state,
            },
        );
    }

    pub fn unregister(&self, session_name: &str) {
        self.registry.lock().unwrap().remove(session_name);
    }

    /// Runs the tick loop until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick);
        loop {
            tokio::select! {
                _ = interval.tick() => self.sweep(),
                _ = shutdown.cancelled() => break,
            }
        }
    }

    fn sweep(&self) {
        let registry = self.registry.lock().unwrap();
        for (session_name, watched) in registry.iter() {
            if watched.cancel.is_cancelled() {
                continue;
            }
            if let Some(verdict) = self.classify(watched) {
                log::warn!("supervisor forcing {session_name} to {verdict:?}");
                *watched.forced_state.lock().unwrap() = Some(verdict);
                watched.cancel.cancel();
            }
        }
    }

    fn classify(&self, watched: &Watched) -> Option<AttemptState> {
        let age = watched.started_at.elapsed();

        match session::read_status(&watched.status_path) {
            Ok(status) if status == "RUNNING" || status.is_empty() => {
                if let Ok(mtime) = session::status_mtime(&watched.status_path) {
                    if let Ok(stale_for) = mtime.elapsed() {
                        if stale_for >= self.thard {
                            return Some(AttemptState::TimedOut);
                        }
                        if stale_for >= self.tstale {
                            return Some(AttemptState::Stuck);
                        }
                    }
                }
            }
            Err(_) if age >= self.tno_status => {
                return Some(AttemptState::Stuck);
            }
            _ => {}
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_stale_running_status_as_stuck() {
        let dir = tempfile::tempdir().unwrap();
        let status_path = dir.path().join("status.txt");
        std::fs::write(&status_path, "RUNNING").unwrap();
        let old = std::time::SystemTime::now() - Duration::from_secs(2000);
        filetime_set(&status_path, old);

        let sup = Supervisor::new(
            Duration::from_secs(3600),
            Duration::from_secs(1800),
            Duration::from_secs(1800),
            Duration::from_secs(30),
        );
        let watched = Watched {
            status_path,
            started_at: Instant::now() - Duration::from_secs(2000),
            cancel: CancellationToken::new(),
            forced_state: Arc::new(Mutex::new(None)),
        };
        assert_eq!(sup.classify(&watched), Some(AttemptState::Stuck));
    }

    #[test]
    fn classifies_hard_ceiling_breach_as_timed_out() {
        let dir = tempfile::tempdir().unwrap();
        let status_path = dir.path().join("status.txt");
        std::fs::write(&status_path, "RUNNING").unwrap();
        let old = std::time::SystemTime::now() - Duration::from_secs(4000);
        filetime_set(&status_path, old);

        let sup = Supervisor::new(
            Duration::from_secs(3600),
            Duration::from_secs(1800),
            Duration::from_secs(1800),
            Duration::from_secs(30),
        );
        let watched = Watched {
            status_path,
            started_at: Instant::now() - Duration::from_secs(4000),
            cancel: CancellationToken::new(),
            forced_state: Arc::new(Mutex::new(None)),
        };
        assert_eq!(sup.classify(&watched), Some(AttemptState::TimedOut));
    }

    #[test]
    fn classifies_missing_status_past_tno_status_as_stuck() {
        let dir = tempfile::tempdir().unwrap();
        let status_path = dir.path().join("never_written.txt");

        let sup = Supervisor::default();
        let watched = Watched {
            status_path,
            started_at: Instant::now() - Duration::from_secs(2000),
            cancel: CancellationToken::new(),
            forced_state: Arc::new(Mutex::new(None)),
        };
        assert_eq!(sup.classify(&watched), Some(AttemptState::Stuck));
    }

    #[test]
    fn fresh_running_status_is_not_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let status_path = dir.path().join("status.txt");
        std::fs::write(&status_path, "RUNNING").unwrap();

        let sup = Supervisor::default();
        let watched = Watched {
            status_path,
            started_at: Instant::now(),
            cancel: CancellationToken::new(),
            forced_state: Arc::new(Mutex::new(None)),
        };
        assert_eq!(sup.classify(&watched), None);
    }

    /// Test-only helper: backdates a file's mtime without pulling in a `filetime`
    /// dependency for one call site.
    fn filetime_set(path: &std::path::Path, time: std::time::SystemTime) {
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(time).unwrap();
    }
}
