//! Wall-clock profiler for the periodic maintenance work.
//!
//! Cheap enough to stay on; the dump lands in `cpuprofile.txt` once a
//! minute when profiling is enabled.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
struct OpStats {
    calls: u64,
    total: Duration,
    max: Duration,
}

#[derive(Debug, Default)]
pub struct Profiler {
    stats: Mutex<HashMap<&'static str, OpStats>>,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: &'static str, elapsed: Duration) {
        let mut stats = self.stats.lock().unwrap();
        let entry = stats.entry(name).or_default();
        entry.calls += 1;
        entry.total += elapsed;
        entry.max = entry.max.max(elapsed);
    }

    /// Render the profile, heaviest operations first.
    pub fn dump(&self) -> String {
        let stats = self.stats.lock().unwrap();
        let mut rows: Vec<(&str, OpStats)> = stats.iter().map(|(k, v)| (*k, *v)).collect();
        rows.sort_by(|a, b| b.1.total.cmp(&a.1.total));

        let mut out = String::from("operation calls total_ms mean_ms max_ms\n");
        for (name, op) in rows {
            let total_ms = op.total.as_secs_f64() * 1000.0;
            let mean_ms = total_ms / op.calls as f64;
            let max_ms = op.max.as_secs_f64() * 1000.0;
            let _ = writeln!(
                out,
                "{name} {calls} {total_ms:.3} {mean_ms:.3} {max_ms:.3}",
                calls = op.calls,
            );
        }
        out
    }
}
