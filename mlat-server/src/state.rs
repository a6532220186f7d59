//! Atomic state-file writer: sync.json, locations.json, aircraft.json.
//!
//! The sync matrix can be large, so a reader could catch a half-written
//! file. Each document is therefore written to `<name>.tmp.<unix_secs>`
//! and renamed over the target; rename is atomic, so readers only ever
//! see complete documents. A crash between write and rename leaves a
//! stale temp file behind, which is harmless.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;

use mlat_core::StateSnapshot;

pub struct StateWriter {
    work_dir: PathBuf,
    tag: String,
}

impl StateWriter {
    pub fn new(work_dir: impl Into<PathBuf>, tag: impl Into<String>) -> Self {
        StateWriter {
            work_dir: work_dir.into(),
            tag: tag.into(),
        }
    }

    /// Write all three documents and refresh the process title.
    pub fn write(&self, snapshot: &StateSnapshot, unix_secs: u64) -> anyhow::Result<()> {
        self.write_atomic("sync.json", &serde_json::to_vec(&snapshot.sync)?, unix_secs)?;
        self.write_atomic(
            "locations.json",
            &serde_json::to_vec(&snapshot.locations)?,
            unix_secs,
        )?;
        self.write_atomic(
            "aircraft.json",
            &serde_json::to_vec(&snapshot.aircraft)?,
            unix_secs,
        )?;

        proctitle::set_title(snapshot.process_title(&self.tag));
        Ok(())
    }

    fn write_atomic(&self, name: &str, bytes: &[u8], unix_secs: u64) -> anyhow::Result<()> {
        let target = self.work_dir.join(name);
        let tmp = self.work_dir.join(format!("{name}.tmp.{unix_secs}"));
        fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &target).with_context(|| format!("renaming over {}", target.display()))?;
        Ok(())
    }
}
