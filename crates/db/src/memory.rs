//! `MemoryStore`: an in-process [`PipelineStore`].
//!
//! Backs the engine tests and local dry runs. Seed it with the `add_*`
//! helpers, then inspect what the engine wrote with [`MemoryStore::run`] and
//! [`MemoryStore::step_runs`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    CredentialRow, HostRow, PipelineRow, RunRow, RunStatus, ScriptRow, StageRow, StepRow,
    StepRunResult, StepRunRow,
};
use crate::{DbError, PipelineStore};

#[derive(Default)]
struct State {
    pipelines: HashMap<Uuid, PipelineRow>,
    stages: Vec<StageRow>,
    steps: Vec<StepRow>,
    scripts: HashMap<Uuid, ScriptRow>,
    hosts: HashMap<Uuid, HostRow>,
    credentials: HashMap<Uuid, CredentialRow>,
    runs: HashMap<Uuid, RunRow>,
    /// Insertion order is execution order.
    step_runs: Vec<StepRunRow>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------ seeding ------

    pub fn add_pipeline(&self, name: impl Into<String>) -> Uuid {
        let row = PipelineRow {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: Utc::now(),
        };
        let id = row.id;
        self.state().pipelines.insert(id, row);
        id
    }

    pub fn add_stage(&self, pipeline_id: Uuid, name: impl Into<String>, position: i32) -> Uuid {
        let row = StageRow {
            id: Uuid::new_v4(),
            pipeline_id,
            name: name.into(),
            position,
        };
        let id = row.id;
        self.state().stages.push(row);
        id
    }

    pub fn add_step(&self, step: StepRow) -> Uuid {
        let id = step.id;
        self.state().steps.push(step);
        id
    }

    pub fn add_script(&self, name: impl Into<String>, content: Option<&str>) -> Uuid {
        let row = ScriptRow {
            id: Uuid::new_v4(),
            name: name.into(),
            content: content.map(str::to_owned),
        };
        let id = row.id;
        self.state().scripts.insert(id, row);
        id
    }

    pub fn add_credential(
        &self,
        username: impl Into<String>,
        password: impl Into<String>,
        domain: Option<&str>,
    ) -> Uuid {
        let row = CredentialRow {
            id: Uuid::new_v4(),
            username: username.into(),
            password: password.into(),
            domain: domain.map(str::to_owned),
        };
        let id = row.id;
        self.state().credentials.insert(id, row);
        id
    }

    pub fn add_host(
        &self,
        name: impl Into<String>,
        address: impl Into<String>,
        credential_id: Option<Uuid>,
    ) -> Uuid {
        let row = HostRow {
            id: Uuid::new_v4(),
            name: name.into(),
            address: address.into(),
            credential_id,
        };
        let id = row.id;
        self.state().hosts.insert(id, row);
        id
    }

    // ------ inspection ------

    pub fn run(&self, id: Uuid) -> Option<RunRow> {
        self.state().runs.get(&id).cloned()
    }

    /// Step runs written for `run_id`, in the order they were created.
    pub fn step_runs(&self, run_id: Uuid) -> Vec<StepRunRow> {
        self.state()
            .step_runs
            .iter()
            .filter(|s| s.run_id == run_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn get_pipeline(&self, id: Uuid) -> Result<PipelineRow, DbError> {
        self.state()
            .pipelines
            .get(&id)
            .cloned()
            .ok_or(DbError::NotFound { entity: "pipeline", id })
    }

    async fn list_stages(&self, pipeline_id: Uuid) -> Result<Vec<StageRow>, DbError> {
        let mut stages: Vec<StageRow> = self
            .state()
            .stages
            .iter()
            .filter(|s| s.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        stages.sort_by_key(|s| s.position);
        Ok(stages)
    }

    async fn list_steps(&self, stage_id: Uuid) -> Result<Vec<StepRow>, DbError> {
        let mut steps: Vec<StepRow> = self
            .state()
            .steps
            .iter()
            .filter(|s| s.stage_id == stage_id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.position);
        Ok(steps)
    }

    async fn get_script(&self, id: Uuid) -> Result<Option<ScriptRow>, DbError> {
        Ok(self.state().scripts.get(&id).cloned())
    }

    async fn get_host(&self, id: Uuid) -> Result<Option<HostRow>, DbError> {
        Ok(self.state().hosts.get(&id).cloned())
    }

    async fn get_credential(&self, id: Uuid) -> Result<Option<CredentialRow>, DbError> {
        Ok(self.state().credentials.get(&id).cloned())
    }

    async fn insert_run(&self, run: &RunRow) -> Result<(), DbError> {
        self.state().runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<RunRow, DbError> {
        self.run(id).ok_or(DbError::NotFound { entity: "run", id })
    }

    async fn mark_run_started(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, DbError> {
        let mut state = self.state();
        let run = state
            .runs
            .get_mut(&id)
            .ok_or(DbError::MissingRow { entity: "run", id })?;
        if run.status != RunStatus::Queued {
            return Ok(false);
        }
        run.status = RunStatus::Running;
        run.started_at = Some(at);
        Ok(true)
    }

    async fn finish_run(
        &self,
        id: Uuid,
        status: RunStatus,
        at: DateTime<Utc>,
        error_message: Option<&str>,
    ) -> Result<bool, DbError> {
        let mut state = self.state();
        let run = state
            .runs
            .get_mut(&id)
            .ok_or(DbError::MissingRow { entity: "run", id })?;
        if run.status.is_terminal() {
            return Ok(false);
        }
        run.status = status;
        run.ended_at = Some(at);
        run.error_message = error_message.map(str::to_owned);
        Ok(true)
    }

    async fn insert_step_run(&self, step_run: &StepRunRow) -> Result<(), DbError> {
        self.state().step_runs.push(step_run.clone());
        Ok(())
    }

    async fn finish_step_run(&self, id: Uuid, result: &StepRunResult) -> Result<(), DbError> {
        let mut state = self.state();
        let row = state
            .step_runs
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(DbError::MissingRow { entity: "step run", id })?;
        row.status = result.status;
        row.exit_code = result.exit_code;
        row.output = result.output.clone();
        row.error_message = result.error_message.clone();
        row.log_path = result.log_path.clone();
        row.ended_at = Some(result.ended_at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use sqlx::types::Json;

    use super::*;
    use crate::models::TriggerKind;

    fn queued_run(pipeline_id: Uuid) -> RunRow {
        RunRow {
            id: Uuid::new_v4(),
            pipeline_id,
            status: RunStatus::Queued,
            triggered_by: "tester".into(),
            trigger_type: TriggerKind::Manual,
            variables: Json(BTreeMap::new()),
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    #[tokio::test]
    async fn stages_and_steps_come_back_ordered_by_position() {
        let store = MemoryStore::new();
        let pipeline = store.add_pipeline("deploy");
        let late = store.add_stage(pipeline, "late", 20);
        let early = store.add_stage(pipeline, "early", 10);
        store.add_step(StepRow::new(early, "second", 2));
        store.add_step(StepRow::new(early, "first", 1));

        let stages = store.list_stages(pipeline).await.unwrap();
        assert_eq!(stages.iter().map(|s| s.id).collect::<Vec<_>>(), vec![early, late]);

        let steps = store.list_steps(early).await.unwrap();
        let names: Vec<_> = steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn missing_pipeline_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get_pipeline(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn finished_run_cannot_be_finished_again() {
        let store = MemoryStore::new();
        let run = queued_run(Uuid::new_v4());
        store.insert_run(&run).await.unwrap();

        assert!(store.mark_run_started(run.id, Utc::now()).await.unwrap());
        assert!(!store.mark_run_started(run.id, Utc::now()).await.unwrap());

        assert!(store.finish_run(run.id, RunStatus::Succeeded, Utc::now(), None).await.unwrap());
        assert!(!store
            .finish_run(run.id, RunStatus::Cancelled, Utc::now(), Some("stop"))
            .await
            .unwrap());

        let stored = store.run(run.id).unwrap();
        assert_eq!(stored.status, RunStatus::Succeeded);
        assert_eq!(stored.error_message, None);
    }

    #[tokio::test]
    async fn cancelled_queued_run_never_starts() {
        let store = MemoryStore::new();
        let run = queued_run(Uuid::new_v4());
        store.insert_run(&run).await.unwrap();

        assert!(store.finish_run(run.id, RunStatus::Cancelled, Utc::now(), None).await.unwrap());
        assert!(!store.mark_run_started(run.id, Utc::now()).await.unwrap());
        assert_eq!(store.run(run.id).unwrap().started_at, None);
    }
}
