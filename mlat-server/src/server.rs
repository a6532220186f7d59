//! Background loops around one [`Coordinator`]: the 15 s state writer
//! and the optional 60 s profile writer.
//!
//! Loop bodies never kill the loop; failures are logged and the next
//! iteration runs after the usual sleep. Shutdown aborts the tasks and
//! waits them out at their sleep points.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::warn;

use mlat_core::Coordinator;

use crate::profile::Profiler;
use crate::state::StateWriter;

pub const STATE_INTERVAL: Duration = Duration::from_secs(15);
pub const PROFILE_INTERVAL: Duration = Duration::from_secs(60);

/// One state-writer iteration: drain pending traffic requests as a
/// backstop, run the scoring pass, snapshot, and write the documents.
/// The lock is released before touching the filesystem.
pub fn write_state_once(
    coordinator: &Mutex<Coordinator>,
    writer: &StateWriter,
) -> anyhow::Result<()> {
    let snapshot = {
        let mut coordinator = coordinator.lock().unwrap();
        coordinator.drain_traffic_requests();
        coordinator.build_snapshot(Coordinator::unix_time())
    };
    writer.write(&snapshot, Coordinator::unix_time() as u64)
}

pub async fn write_state_loop(
    coordinator: Arc<Mutex<Coordinator>>,
    writer: StateWriter,
    profiler: Arc<Profiler>,
) {
    loop {
        let started = Instant::now();
        if let Err(error) = write_state_once(&coordinator, &writer) {
            warn!(%error, "failed to write state files");
        }
        profiler.record("write_state", started.elapsed());
        tokio::time::sleep(STATE_INTERVAL).await;
    }
}

pub async fn write_profile_loop(work_dir: PathBuf, profiler: Arc<Profiler>) {
    loop {
        tokio::time::sleep(PROFILE_INTERVAL).await;
        if let Err(error) = std::fs::write(work_dir.join("cpuprofile.txt"), profiler.dump()) {
            warn!(%error, "failed to write CPU profile");
        }
    }
}

/// Abort background tasks and wait them out; cancellation is the
/// expected outcome, not an error.
pub async fn stop_tasks(tasks: Vec<JoinHandle<()>>) {
    for task in &tasks {
        task.abort();
    }
    for task in tasks {
        let _ = task.await;
    }
}
