use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use eyre::{Context, Result};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use ctf_parallel_common::config::RunConfig;
use ctf_parallel_common::ports::{PortAllocator, PortRange};
use ctf_parallel_docker::{BollardClient, DockerEnvironmentAdapter, Janitor};

mod error;
mod launcher;
mod loader;
mod scheduler;
mod session;
mod summary;
mod supervisor;

use launcher::WorkerLauncher;
use scheduler::Scheduler;
use supervisor::Supervisor;

#[derive(Debug, Parser)]
#[command(name = "ctf-parallel")]
#[command(about = "Fan out a solver across a CTF dataset in parallel Docker sandboxes", long_about = None)]
struct Cli {
    /// Path to the run configuration YAML file.
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = RunConfig::load(&cli.config).context("load run configuration")?;
    let config = Arc::new(config);

    let index = loader::load_challenges(&config.dataset).context("load challenge dataset")?;
    log::info!("loaded {} challenges", index.challenges.len());

    let docker_client = Arc::new(BollardClient::connect().context("connect to docker daemon")?);
    let janitor = Arc::new(Janitor::new(docker_client.clone(), config.docker.llm_server_image.clone()));
    let allocator = PortAllocator::new(PortRange {
        start: config.docker.port_range_start,
        end: config.docker.port_range_end,
    });
    let environment = Arc::new(DockerEnvironmentAdapter::new(docker_client.clone(), allocator));

    if config.execution.cleanup_on_start {
        janitor.initial_sweep().await;
    }

    let shutdown = CancellationToken::new();
    let shutdown_for_handler = shutdown.clone();
    ctrlc::set_handler(move || {
        log::warn!("received interrupt signal, winding down");
        shutdown_for_handler.cancel();
    })
    .context("install signal handler")?;

    let supervisor = Arc::new(Supervisor::default());
    let supervisor_lifetime = CancellationToken::new();
    let tt = TaskTracker::new();
    {
        let supervisor_ticker = supervisor.clone();
        let supervisor_shutdown = supervisor_lifetime.clone();
        tt.spawn(async move { supervisor_ticker.run(supervisor_shutdown).await });
    }

    let launcher = Arc::new(WorkerLauncher::new(environment, janitor.clone(), config.clone()));
    let execution_id = execution_id();

    let started = Instant::now();
    let scheduler = Scheduler::new(launcher, supervisor, config.clone());
    scheduler
        .run(&index.challenges, &index.writeups, &execution_id, shutdown.clone())
        .await;
    let wall_time = started.elapsed();

    supervisor_lifetime.cancel();
    tt.close();
    tt.wait().await;

    let interrupted = shutdown.is_cancelled();
    if interrupted || config.execution.cleanup_on_exit {
        janitor.final_sweep(&execution_id).await;
    }

    let report = summary::summarize(&config.execution.log_dir, &execution_id, config.dataset.expected_total);
    report.log(wall_time);

    if interrupted {
        std::process::exit(1);
    }
    Ok(())
}

/// One token per invocation of this binary, shared by every attempt it dispatches this
/// run; recoverable from container/session/network names by the janitor. Includes a
/// timestamp alongside the pid so two runs on the same host never collide even across a
/// pid reuse.
fn execution_id() -> String {
    let hostname = hostname_or_fallback();
    let pid = std::process::id();
    let timestamp = short_timestamp();
    format!("{hostname}-{pid}-{timestamp}")
}

fn short_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn hostname_or_fallback() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "host".to_string())
}
