//! Size-rotated handshake log.
//!
//! Every client handshake gets one line in `handshakes.log`. The file is
//! capped at 1 MiB with two numbered backups (`.1`, `.2`), oldest dropped.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;

const MAX_BYTES: u64 = 1024 * 1024;
const BACKUPS: u32 = 2;

pub struct HandshakeLog {
    path: PathBuf,
    max_bytes: u64,
    backups: u32,
}

impl HandshakeLog {
    pub fn new(work_dir: &Path) -> Self {
        HandshakeLog {
            path: work_dir.join("handshakes.log"),
            max_bytes: MAX_BYTES,
            backups: BACKUPS,
        }
    }

    #[cfg(test)]
    fn with_limits(path: PathBuf, max_bytes: u64, backups: u32) -> Self {
        HandshakeLog {
            path,
            max_bytes,
            backups,
        }
    }

    /// Append one handshake line, rotating first if the file is full.
    pub fn log(&self, line: &str) -> anyhow::Result<()> {
        self.rotate_if_needed()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn rotate_if_needed(&self) -> anyhow::Result<()> {
        let size = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        if size < self.max_bytes {
            return Ok(());
        }

        // shift .1 -> .2 etc., then the live file becomes .1
        for index in (1..self.backups).rev() {
            let from = self.backup_path(index);
            if from.exists() {
                fs::rename(&from, self.backup_path(index + 1))?;
            }
        }
        if self.backups > 0 {
            fs::rename(&self.path, self.backup_path(1))?;
        }
        Ok(())
    }

    fn backup_path(&self, index: u32) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }
}
