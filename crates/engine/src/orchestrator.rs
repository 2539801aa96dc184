//! Run orchestrator: owns the run queue and the per-run state machine.
//!
//! `Orchestrator` is the central entry point:
//! 1. [`Orchestrator::queue_run`] persists a `queued` run, registers an empty
//!    snapshot, and appends the run to the FIFO queue, starting a worker if a
//!    slot is free.
//! 2. Each worker pops runs one at a time and drives them to a terminal
//!    status: stages in order, steps in order, fail-fast unless a step allows
//!    `continue_on_error`.
//! 3. [`Orchestrator::stop_run`] and [`Orchestrator::get_run_status`] serve
//!    external callers.
//!
//! With `max_concurrent_runs = 1` at most one run executes at a time.
//!
//! The store's conditional writes decide every status transition; the
//! registry mirrors a transition only after the store accepted it.
//!
//! Cancellation is cooperative: it is checked before a run starts and before
//! every step, but a remote call already in flight runs to completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use db::models::{Json, RunRow, RunStatus};
use db::PipelineStore;
use queue::{Admission, RunQueue};
use remote::RemoteExecutor;

use crate::config::OrchestratorConfig;
use crate::models::{RunContext, RunRequest, RunSnapshot};
use crate::plan::load_plan;
use crate::registry::RunRegistry;
use crate::stage::{StageOutcome, StageRunner};
use crate::step::StepExecutor;
use crate::EngineError;

const CANCELLED_BY_REQUEST: &str = "cancelled by request";

/// How a run ended, before it is persisted.
#[derive(Debug)]
enum Verdict {
    Succeeded,
    Failed(String),
    Cancelled,
}

struct Inner {
    store: Arc<dyn PipelineStore>,
    registry: Arc<RunRegistry>,
    queue: RunQueue,
    stages: StageRunner,
    closed: AtomicBool,
    /// Signalled whenever a worker retires.
    idle: Notify,
}

/// Cheap to clone; all clones share one queue and one registry.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        executor: Arc<dyn RemoteExecutor>,
        config: OrchestratorConfig,
    ) -> Self {
        let registry = Arc::new(RunRegistry::with_retention(config.retained_runs));
        let steps = StepExecutor::new(
            Arc::clone(&store),
            executor,
            Arc::clone(&registry),
            config.log_dir.clone(),
        );
        let stages = StageRunner::new(steps, Arc::clone(&registry));

        Self {
            inner: Arc::new(Inner {
                store,
                registry,
                queue: RunQueue::new(config.max_concurrent_runs),
                stages,
                closed: AtomicBool::new(false),
                idle: Notify::new(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Public surface
    // -----------------------------------------------------------------------

    /// Queue a run and return its id. Execution happens in the background.
    ///
    /// # Errors
    /// [`EngineError::ShuttingDown`] after [`Orchestrator::shutdown`], or a
    /// database error if the run record cannot be written.
    #[instrument(skip(self, request), fields(pipeline_id = %request.pipeline_id))]
    pub async fn queue_run(&self, request: RunRequest) -> Result<Uuid, EngineError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(EngineError::ShuttingDown);
        }

        let run = RunRow {
            id: Uuid::new_v4(),
            pipeline_id: request.pipeline_id,
            status: RunStatus::Queued,
            triggered_by: request.triggered_by,
            trigger_type: request.trigger_type,
            variables: Json(request.variables),
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        };
        self.inner.store.insert_run(&run).await?;
        self.inner.registry.register(run.id, run.pipeline_id);

        info!(
            run_id = %run.id,
            trigger = %run.trigger_type,
            triggered_by = %run.triggered_by,
            "run queued"
        );

        if self.inner.queue.push(run.id) == Admission::StartWorker {
            self.spawn_worker();
        }

        Ok(run.id)
    }

    /// Cancel a run that has not reached a terminal status.
    ///
    /// Returns `false` for unknown or already-terminal runs, which are left
    /// untouched. A step already executing on a host is not interrupted.
    #[instrument(skip(self))]
    pub async fn stop_run(&self, run_id: Uuid) -> Result<bool, EngineError> {
        match self.inner.registry.status(run_id) {
            None => return Ok(false),
            Some(status) if status.is_terminal() => return Ok(false),
            Some(_) => {}
        }

        let ended_at = Utc::now();
        let cancelled = self
            .inner
            .store
            .finish_run(run_id, RunStatus::Cancelled, ended_at, Some(CANCELLED_BY_REQUEST))
            .await?;
        if !cancelled {
            debug!("run reached a terminal status before it could be cancelled");
            return Ok(false);
        }

        let was_queued = self.inner.queue.remove(run_id);
        self.inner.registry.finish(
            run_id,
            RunStatus::Cancelled,
            ended_at,
            Some(CANCELLED_BY_REQUEST.to_owned()),
        );
        info!(was_queued, "run cancelled");
        Ok(true)
    }

    /// Current snapshot of a run, or `None` if the run is unknown.
    pub fn get_run_status(&self, run_id: Uuid) -> Option<RunSnapshot> {
        self.inner.registry.get(run_id)
    }

    /// Wait until a run is terminal. `None` if the run is unknown.
    pub async fn wait_for_run(&self, run_id: Uuid) -> Option<RunSnapshot> {
        self.inner.registry.wait_until_finished(run_id).await
    }

    /// Runs waiting for a worker.
    pub fn pending_runs(&self) -> usize {
        self.inner.queue.len()
    }

    /// Stop accepting runs and cancel everything still queued.
    ///
    /// Runs already executing are left alone; await [`Orchestrator::wait_idle`]
    /// before dropping the runtime so they reach a terminal status. Returns how
    /// many queued runs were cancelled.
    pub async fn shutdown(&self) -> Result<usize, EngineError> {
        self.inner.closed.store(true, Ordering::SeqCst);

        let mut cancelled = 0;
        for run_id in self.inner.queue.drain_pending() {
            if self.stop_run(run_id).await? {
                cancelled += 1;
            }
        }
        info!(cancelled, "orchestrator shut down");
        Ok(cancelled)
    }

    /// Workers currently draining the queue.
    pub fn active_workers(&self) -> usize {
        self.inner.queue.active_workers()
    }

    /// Wait until no worker is running. After [`Orchestrator::shutdown`] this
    /// means every in-flight run has been finalised.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.queue.active_workers() == 0 {
                return;
            }
            notified.await;
        }
    }

    // -----------------------------------------------------------------------
    // Workers
    // -----------------------------------------------------------------------

    fn spawn_worker(&self) {
        let worker = self.clone();
        tokio::spawn(async move { worker.drain().await });
    }

    /// Pop and execute runs until the queue is empty.
    async fn drain(self) {
        debug!("worker started");
        while let Some(run_id) = self.inner.queue.next_for_worker() {
            // Own task per run so a panic fails that run instead of killing the worker.
            let task = {
                let this = self.clone();
                tokio::spawn(async move { this.execute_run(run_id).await })
            };
            if let Err(e) = task.await {
                error!(%run_id, "run task panicked: {e}");
                self.finalize(run_id, Verdict::Failed("run task panicked".into()))
                    .await;
            }
        }
        debug!("queue drained, worker exiting");
        self.inner.idle.notify_waiters();
    }

    #[instrument(skip(self))]
    async fn execute_run(&self, run_id: Uuid) {
        let started_at = Utc::now();
        match self.inner.store.mark_run_started(run_id, started_at).await {
            Ok(true) => {
                self.inner.registry.mark_running(run_id, started_at);
            }
            Ok(false) => {
                info!("run is no longer queued, skipping");
                return;
            }
            Err(e) => {
                error!("cannot mark run as running: {e}");
                self.finalize(run_id, Verdict::Failed(e.to_string())).await;
                return;
            }
        }

        let verdict = match self.run_pipeline(run_id).await {
            Ok(verdict) => verdict,
            Err(e) => {
                error!("run aborted: {e}");
                Verdict::Failed(e.to_string())
            }
        };
        self.finalize(run_id, verdict).await;
    }

    /// Load the plan and drive every stage. Errors here are fatal to the run.
    async fn run_pipeline(&self, run_id: Uuid) -> Result<Verdict, EngineError> {
        let run = self.inner.store.get_run(run_id).await?;
        let ctx = RunContext {
            run_id,
            pipeline_id: run.pipeline_id,
            variables: run.variables.0,
        };
        info!(pipeline_id = %ctx.pipeline_id, "run started");

        let plan = load_plan(self.inner.store.as_ref(), ctx.pipeline_id).await?;
        self.inner.registry.append_log(
            run_id,
            format!(
                "loaded pipeline '{}' ({} stages, {} steps)",
                plan.pipeline.name,
                plan.stages.len(),
                plan.step_count()
            ),
        );

        let mut failed_steps = 0;
        for stage in &plan.stages {
            match self.inner.stages.run(&ctx, stage).await? {
                StageOutcome::Completed { failed_steps: n } => failed_steps += n,
                StageOutcome::Aborted { step, error } => {
                    let reason = match error {
                        Some(e) => format!("step '{step}' failed: {e}"),
                        None => format!("step '{step}' failed"),
                    };
                    return Ok(Verdict::Failed(reason));
                }
                StageOutcome::Cancelled => return Ok(Verdict::Cancelled),
            }
        }

        if failed_steps == 0 {
            Ok(Verdict::Succeeded)
        } else {
            Ok(Verdict::Failed(format!("{failed_steps} step(s) failed")))
        }
    }

    /// Persist the terminal status, then mirror it into the registry.
    async fn finalize(&self, run_id: Uuid, verdict: Verdict) {
        let (status, error) = match verdict {
            Verdict::Succeeded => (RunStatus::Succeeded, None),
            Verdict::Failed(reason) => (RunStatus::Failed, Some(reason)),
            Verdict::Cancelled => (RunStatus::Cancelled, Some(CANCELLED_BY_REQUEST.to_owned())),
        };
        let ended_at = Utc::now();

        match self
            .inner
            .store
            .finish_run(run_id, status, ended_at, error.as_deref())
            .await
        {
            Ok(true) => info!(%run_id, %status, "run finished"),
            Ok(false) => {
                // Already terminal (e.g. cancelled while the last step ran).
                debug!(%run_id, %status, "run already terminal, keeping stored status");
                return;
            }
            Err(e) => error!(%run_id, %status, "failed to persist final status: {e}"),
        }

        if !self.inner.registry.finish(run_id, status, ended_at, error) {
            warn!(%run_id, "registry already held a terminal status");
        }
    }
}
