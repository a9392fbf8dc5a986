//! Parallel Scheduler: round-based dispatcher. For each `try_number` in
//! `[start_try, try_times]`, builds the attempt queue in descriptor order and drains it
//! with at most `parallel_tasks` attempts in flight, FIFO within the round, no
//! preemption across rounds.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;

use ctf_parallel_common::challenge::{Attempt, Challenge, WriteupIndex};
use ctf_parallel_common::config::RunConfig;

use crate::launcher::WorkerLauncher;
use crate::loader;
use crate::supervisor::Supervisor;

const DISPATCH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const FORCE_KILL_GRACE: Duration = Duration::from_secs(30);

pub struct Scheduler {
    launcher: Arc<WorkerLauncher>,
    supervisor: Arc<Supervisor>,
    config: Arc<RunConfig>,
}

impl Scheduler {
    pub fn new(launcher: Arc<WorkerLauncher>, supervisor: Arc<Supervisor>, config: Arc<RunConfig>) -> Self {
        Self {
            launcher,
            supervisor,
            config,
        }
    }

    /// Runs every round to completion or until `shutdown` is cancelled. Returns every
    /// attempt dispatched, in terminal state.
    pub async fn run(
        &self,
        challenges: &[Challenge],
        writeups: &WriteupIndex,
        execution_id: &str,
        shutdown: CancellationToken,
    ) -> Vec<Attempt> {
        let mut finished = Vec::new();

        for try_number in self.config.execution.start_try..=self.config.execution.try_times {
            if shutdown.is_cancelled() {
                break;
            }
            log::info!("scheduler: starting round try{try_number} ({} challenges)", challenges.len());
            let round = self
                .run_round(challenges, writeups, execution_id, try_number, shutdown.clone())
                .await;
            finished.extend(round);
        }

        finished
    }

    async fn run_round(
        &self,
        challenges: &[Challenge],
        writeups: &WriteupIndex,
        execution_id: &str,
        try_number: u32,
        shutdown: CancellationToken,
    ) -> Vec<Attempt> {
        let k = self.config.execution.parallel_tasks as usize;
        let delay = Duration::from_secs_f64(self.config.execution.delay_between_submissions_secs);
        let max_wait = Duration::from_secs(self.config.execution.max_wait_time_secs);

        let mut queue: std::collections::VecDeque<(u32, &Challenge)> = challenges
            .iter()
            .enumerate()
            .map(|(i, c)| ((i + 1) as u32, c))
            .collect();

        let mut in_flight = FuturesUnordered::new();
        let mut round_tokens = Vec::new();
        let mut finished = Vec::new();

        while !queue.is_empty() && !shutdown.is_cancelled() {
            if in_flight.len() >= k {
                tokio::select! {
                    Some(result) = in_flight.next() => {
                        if let Ok(attempt) = result {
                            finished.push(attempt);
                        }
                    }
                    _ = tokio::time::sleep(DISPATCH_POLL_INTERVAL) => {}
                    _ = shutdown.cancelled() => break,
                }
                continue;
            }

            let (instance_id, challenge) = queue.pop_front().unwrap();
            let attempt = Attempt::new(instance_id, challenge.challenge_id.clone(), try_number, execution_id.to_string());
            let writeup = loader::sample_writeup(writeups, &challenge.challenge_id);

            let cancel = shutdown.child_token();
            round_tokens.push(cancel.clone());
            let forced_state = Arc::new(Mutex::new(None));
            self.supervisor.register(
                attempt.session_name(),
                attempt.status_path(&self.config.execution.log_dir),
                cancel.clone(),
                forced_state.clone(),
            );

            let launcher = self.launcher.clone();
            let challenge = challenge.clone();
            let session_name = attempt.session_name();
            let supervisor = self.supervisor.clone();
            in_flight.push(tokio::spawn(async move {
                let result = launcher.run_attempt(attempt, challenge, writeup, cancel, forced_state).await;
                supervisor.unregister(&session_name);
                result
            }));

            tokio::time::sleep(delay).await;
        }

        let drain = async {
            while let Some(result) = in_flight.next().await {
                if let Ok(attempt) = result {
                    finished.push(attempt);
                }
            }
        };
        if tokio::time::timeout(max_wait, drain).await.is_err() {
            log::warn!("round try{try_number}: max_wait_time exceeded; force-killing remaining sessions");
            for token in &round_tokens {
                token.cancel();
            }
            let forced_drain = async {
                while let Some(result) = in_flight.next().await {
                    if let Ok(attempt) = result {
                        finished.push(attempt);
                    }
                }
            };
            if tokio::time::timeout(FORCE_KILL_GRACE, forced_drain).await.is_err() {
                log::warn!("round try{try_number}: sessions still not terminated after cancellation grace period");
            }
        }

        finished
    }
}
