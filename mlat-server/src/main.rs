//! mlat-server binary: CLI, runtime, and signal wiring.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

use mlat_core::config::SelectorConfig;
use mlat_core::hooks::{NullClockTracker, NullMlatTracker};
use mlat_core::Coordinator;
use mlat_server::server::{self, stop_tasks};
use mlat_server::{Profiler, StateWriter};

#[derive(Parser)]
#[command(
    name = "mlat-server",
    version,
    about = "Mode S multilateration coordination server"
)]
struct Cli {
    /// Working directory for state dumps and logs
    #[arg(long, default_value = "work")]
    work_dir: PathBuf,

    /// 1-based partition index
    #[arg(long, default_value = "1", env = "MLAT_SERVER_PARTITION_INDEX")]
    partition_index: u32,

    /// Total partition count
    #[arg(long, default_value = "1", env = "MLAT_SERVER_PARTITION_COUNT")]
    partition_count: u32,

    /// Tag prefix for the process title
    #[arg(long, default_value = "mlat")]
    tag: String,

    /// Dump cpuprofile.txt every 60 s
    #[arg(long)]
    profile: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    anyhow::ensure!(
        cli.partition_index >= 1 && cli.partition_index <= cli.partition_count,
        "partition index {} out of range 1..={}",
        cli.partition_index,
        cli.partition_count
    );

    std::fs::create_dir_all(&cli.work_dir)
        .with_context(|| format!("creating work dir {}", cli.work_dir.display()))?;

    let coordinator = Arc::new(Mutex::new(Coordinator::new(
        (cli.partition_index, cli.partition_count),
        SelectorConfig::default(),
        Box::new(NullClockTracker),
        Box::new(NullMlatTracker),
        None,
    )));

    let writer = StateWriter::new(&cli.work_dir, cli.tag.clone());
    let profiler = Arc::new(Profiler::new());

    info!(
        work_dir = %cli.work_dir.display(),
        partition = %format!("{}/{}", cli.partition_index, cli.partition_count),
        "coordination core running"
    );

    let mut tasks = vec![tokio::spawn(server::write_state_loop(
        coordinator.clone(),
        writer,
        profiler.clone(),
    ))];
    if cli.profile {
        tasks.push(tokio::spawn(server::write_profile_loop(
            cli.work_dir.clone(),
            profiler.clone(),
        )));
    }

    // reload signal fans out to whatever callbacks are registered
    let mut hangup = signal(SignalKind::hangup()).context("installing reload signal handler")?;
    let reload_coordinator = coordinator.clone();
    tasks.push(tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!("reload signal received");
            reload_coordinator.lock().unwrap().dispatch_reload();
        }
    }));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutting down");
    stop_tasks(tasks).await;
    Ok(())
}
