//! Run registry: in-memory status snapshots keyed by run id.
//!
//! Written only by the task driving a run (and by `stop_run`), read by any
//! number of observers. Status changes are mirrored here after the store has
//! accepted them; a terminal status is never overwritten.
//!
//! Only the most recent `retention` terminal snapshots are kept. The store
//! remains the record of older runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use uuid::Uuid;

use db::models::{RunStatus, StepRunStatus};

use crate::models::{RunSnapshot, StepSnapshot};

const DEFAULT_RETENTION: usize = 1000;

#[derive(Debug, Default)]
struct Runs {
    snapshots: HashMap<Uuid, RunSnapshot>,
    /// Terminal runs, oldest first.
    finished_order: VecDeque<Uuid>,
}

#[derive(Debug)]
pub struct RunRegistry {
    runs: RwLock<Runs>,
    retention: usize,
    /// Signalled on every terminal transition.
    finished: Notify,
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `retention` terminal snapshots (at least one).
    pub fn with_retention(retention: usize) -> Self {
        Self {
            runs: RwLock::new(Runs::default()),
            retention: retention.max(1),
            finished: Notify::new(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Runs> {
        self.runs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Runs> {
        self.runs.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_run(&self, run_id: Uuid, f: impl FnOnce(&mut RunSnapshot)) {
        if let Some(run) = self.write().snapshots.get_mut(&run_id) {
            f(run);
        }
    }

    /// Register a freshly queued run with an empty snapshot.
    pub fn register(&self, run_id: Uuid, pipeline_id: Uuid) {
        let mut snapshot = RunSnapshot::queued(run_id, pipeline_id);
        snapshot.logs.push(log_line("run queued"));
        self.write().snapshots.insert(run_id, snapshot);
    }

    pub fn get(&self, run_id: Uuid) -> Option<RunSnapshot> {
        self.read().snapshots.get(&run_id).cloned()
    }

    pub fn status(&self, run_id: Uuid) -> Option<RunStatus> {
        self.read().snapshots.get(&run_id).map(|r| r.status)
    }

    pub fn is_cancelled(&self, run_id: Uuid) -> bool {
        self.status(run_id) == Some(RunStatus::Cancelled)
    }

    /// Snapshots currently held, terminal or not.
    pub fn len(&self) -> usize {
        self.read().snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `queued → running`. Returns `false` if the run is unknown or no longer queued.
    pub fn mark_running(&self, run_id: Uuid, at: DateTime<Utc>) -> bool {
        let mut runs = self.write();
        match runs.snapshots.get_mut(&run_id) {
            Some(run) if run.status == RunStatus::Queued => {
                run.status = RunStatus::Running;
                run.started_at = Some(at);
                run.logs.push(log_line("run started"));
                true
            }
            _ => false,
        }
    }

    pub fn append_log(&self, run_id: Uuid, message: impl AsRef<str>) {
        self.with_run(run_id, |run| run.logs.push(log_line(message.as_ref())));
    }

    pub fn step_started(&self, run_id: Uuid, step: StepSnapshot) {
        self.with_run(run_id, |run| {
            run.logs.push(log_line(&format!(
                "[{} / {}] started",
                step.stage_name, step.step_name
            )));
            run.steps.push(step);
        });
    }

    pub fn step_finished(
        &self,
        run_id: Uuid,
        step_run_id: Uuid,
        status: StepRunStatus,
        exit_code: Option<i32>,
        output: Option<String>,
        error: Option<String>,
    ) {
        self.with_run(run_id, |run| {
            let Some(step) = run.steps.iter_mut().find(|s| s.step_run_id == step_run_id) else {
                return;
            };
            step.status = status;
            step.exit_code = exit_code;
            step.output = output;
            step.error = error;
            let line = match &step.error {
                Some(err) => format!("[{} / {}] {status}: {err}", step.stage_name, step.step_name),
                None => format!("[{} / {}] {status}", step.stage_name, step.step_name),
            };
            run.logs.push(log_line(&line));
        });
    }

    /// Move a non-terminal run to `status`.
    ///
    /// Returns `false` (and changes nothing) if the run is unknown or already
    /// terminal.
    pub fn finish(
        &self,
        run_id: Uuid,
        status: RunStatus,
        at: DateTime<Utc>,
        error: Option<String>,
    ) -> bool {
        let transitioned = {
            let mut runs = self.write();
            let finished = match runs.snapshots.get_mut(&run_id) {
                Some(run) if !run.status.is_terminal() => {
                    run.status = status;
                    run.ended_at = Some(at);
                    run.logs.push(log_line(&match &error {
                        Some(err) => format!("run {status}: {err}"),
                        None => format!("run {status}"),
                    }));
                    run.error = error;
                    true
                }
                _ => false,
            };
            if finished {
                runs.finished_order.push_back(run_id);
                while runs.finished_order.len() > self.retention {
                    if let Some(evicted) = runs.finished_order.pop_front() {
                        runs.snapshots.remove(&evicted);
                    }
                }
            }
            finished
        };
        if transitioned {
            self.finished.notify_waiters();
        }
        transitioned
    }

    /// Wait until `run_id` is terminal and return its final snapshot.
    ///
    /// Returns `None` immediately for an unknown run, including one whose
    /// snapshot has already been evicted.
    pub async fn wait_until_finished(&self, run_id: Uuid) -> Option<RunSnapshot> {
        loop {
            let notified = self.finished.notified();
            tokio::pin!(notified);
            // Register interest before checking, so a transition in between is not missed.
            notified.as_mut().enable();

            match self.get(run_id) {
                None => return None,
                Some(run) if run.is_terminal() => return Some(run),
                Some(_) => notified.await,
            }
        }
    }
}

fn log_line(message: &str) -> String {
    format!("{} {}", Utc::now().format("%H:%M:%S%.3f"), message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn step(name: &str) -> StepSnapshot {
        StepSnapshot {
            step_run_id: Uuid::new_v4(),
            stage_name: "build".into(),
            step_name: name.into(),
            status: StepRunStatus::Running,
            exit_code: None,
            output: None,
            error: None,
        }
    }

    #[test]
    fn unknown_run_has_no_snapshot() {
        let registry = RunRegistry::new();
        assert!(registry.get(Uuid::new_v4()).is_none());
        assert!(!registry.mark_running(Uuid::new_v4(), Utc::now()));
        assert!(!registry.finish(Uuid::new_v4(), RunStatus::Failed, Utc::now(), None));
    }

    #[test]
    fn steps_are_tracked_in_execution_order() {
        let registry = RunRegistry::new();
        let run_id = Uuid::new_v4();
        registry.register(run_id, Uuid::new_v4());
        assert!(registry.mark_running(run_id, Utc::now()));

        let first = step("compile");
        let first_id = first.step_run_id;
        registry.step_started(run_id, first);
        registry.step_started(run_id, step("package"));
        registry.step_finished(
            run_id,
            first_id,
            StepRunStatus::Failed,
            Some(2),
            Some("oops".into()),
            Some("script exited with code 2".into()),
        );

        let snap = registry.get(run_id).unwrap();
        assert_eq!(snap.status, RunStatus::Running);
        assert_eq!(snap.steps.len(), 2);
        assert_eq!(snap.steps[0].status, StepRunStatus::Failed);
        assert_eq!(snap.steps[0].exit_code, Some(2));
        assert_eq!(snap.steps[1].step_name, "package");
        assert!(snap.logs.iter().any(|l| l.ends_with("[build / compile] failed: script exited with code 2")));
    }

    #[test]
    fn terminal_status_is_final() {
        let registry = RunRegistry::new();
        let run_id = Uuid::new_v4();
        registry.register(run_id, Uuid::new_v4());

        assert!(registry.finish(run_id, RunStatus::Cancelled, Utc::now(), None));
        assert!(!registry.mark_running(run_id, Utc::now()));
        assert!(!registry.finish(run_id, RunStatus::Succeeded, Utc::now(), None));
        assert_eq!(registry.status(run_id), Some(RunStatus::Cancelled));
        assert!(registry.is_cancelled(run_id));
    }

    #[tokio::test]
    async fn waiters_wake_on_terminal_transition() {
        let registry = Arc::new(RunRegistry::new());
        let run_id = Uuid::new_v4();
        registry.register(run_id, Uuid::new_v4());

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.wait_until_finished(run_id).await })
        };
        tokio::task::yield_now().await;

        registry.mark_running(run_id, Utc::now());
        registry.finish(run_id, RunStatus::Succeeded, Utc::now(), None);

        let snap = waiter.await.unwrap().expect("known run");
        assert_eq!(snap.status, RunStatus::Succeeded);
        assert!(snap.ended_at.is_some());
    }

    #[test]
    fn oldest_finished_runs_are_evicted_past_retention() {
        let registry = RunRegistry::with_retention(2);
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            registry.register(*id, Uuid::new_v4());
        }
        let active = Uuid::new_v4();
        registry.register(active, Uuid::new_v4());
        registry.mark_running(active, Utc::now());

        for id in &ids {
            assert!(registry.finish(*id, RunStatus::Succeeded, Utc::now(), None));
        }

        assert!(registry.get(ids[0]).is_none());
        assert_eq!(registry.status(ids[1]), Some(RunStatus::Succeeded));
        assert_eq!(registry.status(ids[2]), Some(RunStatus::Succeeded));
        assert_eq!(registry.status(active), Some(RunStatus::Running));
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn waiting_on_unknown_run_returns_none() {
        let registry = RunRegistry::new();
        assert!(registry.wait_until_finished(Uuid::new_v4()).await.is_none());
    }
}
