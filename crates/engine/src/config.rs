//! Tuning knobs for the orchestrator.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Runs executing at the same time. `1` gives a single global worker:
    /// a queued run starts only after the previous one is terminal.
    pub max_concurrent_runs: usize,
    /// Root under which step log paths are computed. Nothing is written there.
    pub log_dir: PathBuf,
    /// Terminal run snapshots kept in memory; the oldest finished runs are
    /// evicted first. Queued and running runs are never evicted.
    pub retained_runs: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 1,
            log_dir: PathBuf::from("logs"),
            retained_runs: 1000,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_max_concurrent_runs(mut self, runs: usize) -> Self {
        self.max_concurrent_runs = runs.max(1);
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    pub fn with_retained_runs(mut self, runs: usize) -> Self {
        self.retained_runs = runs.max(1);
        self
    }
}
