//! Step executor: runs one step and records it as a step run.
//!
//! Every failure between "step run created" and "executor returned" is
//! converted to data: the step run is marked `failed` with the error message
//! and the caller gets an unsuccessful [`StepOutcome`]. Only persistence
//! failures on the step run record itself escape as `Err`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use db::models::{StepRow, StepRunResult, StepRunRow, StepRunStatus};
use db::PipelineStore;
use remote::{Credential, ExecutionOutcome, ExecutionRequest, RemoteExecutor};

use crate::models::{RunContext, StepSnapshot};
use crate::registry::RunRegistry;
use crate::substitute::substitute;
use crate::{EngineError, StepError};

// Variables injected by the engine. They are applied after the caller's
// variables and therefore cannot be shadowed.
pub const RUN_ID_VAR: &str = "PIPELINE_RUN_ID";
pub const STEP_NAME_VAR: &str = "STEP_NAME";
pub const STAGE_NAME_VAR: &str = "STAGE_NAME";
pub const HOST_NAME_VAR: &str = "TARGET_HOST_NAME";
pub const HOST_ADDRESS_VAR: &str = "TARGET_HOST_ADDRESS";

/// The recorded result of one step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step_run_id: Uuid,
    pub status: StepRunStatus,
    pub exit_code: Option<i32>,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == StepRunStatus::Succeeded
    }
}

pub struct StepExecutor {
    store: Arc<dyn PipelineStore>,
    executor: Arc<dyn RemoteExecutor>,
    registry: Arc<RunRegistry>,
    log_dir: PathBuf,
}

impl StepExecutor {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        executor: Arc<dyn RemoteExecutor>,
        registry: Arc<RunRegistry>,
        log_dir: PathBuf,
    ) -> Self {
        Self { store, executor, registry, log_dir }
    }

    /// Where output for a step run would be kept. Nothing is written there.
    pub fn log_path(&self, run_id: Uuid, step_run_id: Uuid) -> PathBuf {
        self.log_dir
            .join(run_id.to_string())
            .join(format!("{step_run_id}.log"))
    }

    /// Execute `step` and persist the outcome.
    ///
    /// # Errors
    /// Only when the step run record cannot be created or finalised.
    #[instrument(skip_all, fields(run_id = %run.run_id, stage = stage_name, step = %step.name))]
    pub async fn execute(
        &self,
        run: &RunContext,
        step: &StepRow,
        stage_name: &str,
    ) -> Result<StepOutcome, EngineError> {
        let step_run_id = Uuid::new_v4();
        let record = StepRunRow {
            id: step_run_id,
            run_id: run.run_id,
            step_id: step.id,
            stage_name: stage_name.to_owned(),
            step_name: step.name.clone(),
            status: StepRunStatus::Running,
            exit_code: None,
            output: None,
            error_message: None,
            log_path: None,
            started_at: Utc::now(),
            ended_at: None,
        };
        self.store.insert_step_run(&record).await?;
        self.registry.step_started(
            run.run_id,
            StepSnapshot {
                step_run_id,
                stage_name: record.stage_name.clone(),
                step_name: record.step_name.clone(),
                status: StepRunStatus::Running,
                exit_code: None,
                output: None,
                error: None,
            },
        );

        let log_path = Some(self.log_path(run.run_id, step_run_id).to_string_lossy().into_owned());
        let result = match self.dispatch(run, step, stage_name).await {
            Ok(outcome) => StepRunResult {
                status: if outcome.success {
                    StepRunStatus::Succeeded
                } else {
                    StepRunStatus::Failed
                },
                exit_code: Some(outcome.exit_code),
                output: Some(outcome.output),
                error_message: outcome.error,
                log_path,
                ended_at: Utc::now(),
            },
            // Never reached the host: no exit code, no output.
            Err(e) => {
                warn!("step could not be executed: {e}");
                StepRunResult {
                    status: StepRunStatus::Failed,
                    exit_code: None,
                    output: None,
                    error_message: Some(e.to_string()),
                    log_path,
                    ended_at: Utc::now(),
                }
            }
        };
        let status = result.status;
        self.store.finish_step_run(step_run_id, &result).await?;
        self.registry.step_finished(
            run.run_id,
            step_run_id,
            status,
            result.exit_code,
            result.output.clone(),
            result.error_message.clone(),
        );

        info!(%status, exit_code = ?result.exit_code, "step finished");

        Ok(StepOutcome {
            step_run_id,
            status,
            exit_code: result.exit_code,
            output: result.output,
            error: result.error_message,
        })
    }

    /// Resolve script, host and credential, then call the remote executor.
    async fn dispatch(
        &self,
        run: &RunContext,
        step: &StepRow,
        stage_name: &str,
    ) -> Result<ExecutionOutcome, StepError> {
        let script = self.resolve_script(step).await?;

        let host_id = step.host_id.ok_or_else(|| StepError::MissingHost {
            step: step.name.clone(),
        })?;
        let host = self
            .store
            .get_host(host_id)
            .await?
            .ok_or(StepError::HostNotFound(host_id))?;

        let credential_id = host.credential_id.ok_or_else(|| StepError::MissingCredential {
            host: host.name.clone(),
        })?;
        let credential = self
            .store
            .get_credential(credential_id)
            .await?
            .ok_or(StepError::CredentialNotFound(credential_id))?;

        let mut variables: BTreeMap<String, String> = run.variables.clone();
        variables.insert(RUN_ID_VAR.into(), run.run_id.to_string());
        variables.insert(STEP_NAME_VAR.into(), step.name.clone());
        variables.insert(STAGE_NAME_VAR.into(), stage_name.to_owned());
        variables.insert(HOST_NAME_VAR.into(), host.name.clone());
        variables.insert(HOST_ADDRESS_VAR.into(), host.address.clone());

        let request = ExecutionRequest {
            host_address: host.address,
            script: substitute(&script, &variables),
            credential: Credential {
                username: credential.username,
                password: credential.password,
                domain: credential.domain,
            },
        };

        info!(host = %request.host_address, "dispatching script");
        Ok(self.executor.execute(&request).await?)
    }

    /// Inline text wins; otherwise the referenced script's content.
    ///
    /// Only a missing or empty inline script defers to the referenced one.
    /// Inline text made of whitespace alone fails the step.
    async fn resolve_script(&self, step: &StepRow) -> Result<String, StepError> {
        match step.inline_script.as_deref() {
            Some(inline) if inline.trim().is_empty() && !inline.is_empty() => {
                return Err(StepError::MissingScript {
                    step: step.name.clone(),
                });
            }
            Some(inline) if !inline.is_empty() => return Ok(inline.to_owned()),
            _ => {}
        }

        if let Some(script_id) = step.script_id {
            if let Some(content) = self
                .store
                .get_script(script_id)
                .await?
                .and_then(|s| s.content)
                .filter(|c| !c.trim().is_empty())
            {
                return Ok(content);
            }
        }

        Err(StepError::MissingScript {
            step: step.name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::MemoryStore;
    use remote::mock::MockExecutor;

    struct Fixture {
        store: Arc<MemoryStore>,
        mock: Arc<MockExecutor>,
        executor: StepExecutor,
        run: RunContext,
        host_id: Uuid,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let mock = Arc::new(MockExecutor::new());
        let registry = Arc::new(RunRegistry::new());
        let run = RunContext {
            run_id: Uuid::new_v4(),
            pipeline_id: Uuid::new_v4(),
            variables: BTreeMap::new(),
        };
        registry.register(run.run_id, run.pipeline_id);

        let cred = store.add_credential("deploy", "pw", Some("CORP"));
        let host_id = store.add_host("web-1", "10.1.0.5", Some(cred));
        let executor = StepExecutor::new(
            store.clone(),
            mock.clone(),
            registry,
            PathBuf::from("/var/log/runs"),
        );
        Fixture { store, mock, executor, run, host_id }
    }

    fn inline_step(script: &str, host_id: Option<Uuid>) -> StepRow {
        let mut step = StepRow::new(Uuid::new_v4(), "deploy", 1);
        step.inline_script = Some(script.into());
        step.host_id = host_id;
        step
    }

    #[tokio::test]
    async fn successful_step_is_recorded() {
        let fx = fixture();
        let step = inline_step("echo ok", Some(fx.host_id));

        let outcome = fx.executor.execute(&fx.run, &step, "release").await.unwrap();
        assert!(outcome.succeeded());
        assert_eq!(outcome.exit_code, Some(0));

        let rows = fx.store.step_runs(fx.run.run_id);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, StepRunStatus::Succeeded);
        assert_eq!(rows[0].stage_name, "release");
        assert_eq!(rows[0].step_name, "deploy");
        assert!(rows[0].ended_at.is_some());

        let expected_log = format!("/var/log/runs/{}/{}.log", fx.run.run_id, outcome.step_run_id);
        assert_eq!(rows[0].log_path.as_deref(), Some(expected_log.as_str()));
    }

    #[tokio::test]
    async fn request_carries_host_and_credential() {
        let fx = fixture();
        let step = inline_step("hostname", Some(fx.host_id));
        fx.executor.execute(&fx.run, &step, "s").await.unwrap();

        let calls = fx.mock.calls.lock().unwrap();
        assert_eq!(calls[0].host_address, "10.1.0.5");
        assert_eq!(calls[0].credential.username, "deploy");
        assert_eq!(calls[0].credential.password, "pw");
        assert_eq!(calls[0].credential.domain.as_deref(), Some("CORP"));
    }

    #[tokio::test]
    async fn engine_variables_win_over_caller_variables() {
        let mut fx = fixture();
        fx.run.variables.insert("NAME".into(), "x".into());
        fx.run.variables.insert(RUN_ID_VAR.into(), "ignored".into());
        let step = inline_step(
            "echo {{NAME}} {{PIPELINE_RUN_ID}} {{STAGE_NAME}}/{{STEP_NAME}} {{TARGET_HOST_NAME}}@{{TARGET_HOST_ADDRESS}}",
            Some(fx.host_id),
        );

        fx.executor.execute(&fx.run, &step, "ship").await.unwrap();

        assert_eq!(
            fx.mock.scripts(),
            vec![format!("echo x {} ship/deploy web-1@10.1.0.5", fx.run.run_id)]
        );
    }

    #[tokio::test]
    async fn named_script_is_used_when_no_inline_text() {
        let fx = fixture();
        let script_id = fx.store.add_script("restart", Some("systemctl restart app"));
        let mut step = inline_step("", Some(fx.host_id));
        step.inline_script = None;
        step.script_id = Some(script_id);

        assert!(fx.executor.execute(&fx.run, &step, "s").await.unwrap().succeeded());
        assert_eq!(fx.mock.scripts(), vec!["systemctl restart app"]);
    }

    #[tokio::test]
    async fn blank_inline_script_does_not_fall_back_to_named_script() {
        let fx = fixture();
        let script_id = fx.store.add_script("restart", Some("systemctl restart app"));
        let mut step = inline_step("  \n\t", Some(fx.host_id));
        step.script_id = Some(script_id);

        let outcome = fx.executor.execute(&fx.run, &step, "s").await.unwrap();
        assert!(!outcome.succeeded());
        assert!(outcome.error.unwrap().contains("no script content"));
        assert_eq!(fx.mock.call_count(), 0);
    }

    #[tokio::test]
    async fn empty_inline_script_defers_to_named_script() {
        let fx = fixture();
        let script_id = fx.store.add_script("restart", Some("systemctl restart app"));
        let mut step = inline_step("", Some(fx.host_id));
        step.script_id = Some(script_id);

        assert!(fx.executor.execute(&fx.run, &step, "s").await.unwrap().succeeded());
        assert_eq!(fx.mock.scripts(), vec!["systemctl restart app"]);
    }

    #[tokio::test]
    async fn missing_script_fails_the_step_without_calling_out() {
        let fx = fixture();
        let empty = fx.store.add_script("empty", None);
        let mut step = StepRow::new(Uuid::new_v4(), "nothing", 1);
        step.script_id = Some(empty);
        step.host_id = Some(fx.host_id);

        let outcome = fx.executor.execute(&fx.run, &step, "s").await.unwrap();
        assert!(!outcome.succeeded());
        assert_eq!(outcome.exit_code, None);
        assert!(outcome.error.unwrap().contains("no script content"));
        assert_eq!(fx.mock.call_count(), 0);

        let rows = fx.store.step_runs(fx.run.run_id);
        assert_eq!(rows[0].status, StepRunStatus::Failed);
    }

    #[tokio::test]
    async fn missing_host_fails_the_step() {
        let fx = fixture();
        let step = inline_step("uptime", None);

        let outcome = fx.executor.execute(&fx.run, &step, "s").await.unwrap();
        assert!(!outcome.succeeded());
        assert!(outcome.error.unwrap().contains("no target host"));
        assert_eq!(fx.mock.call_count(), 0);
    }

    #[tokio::test]
    async fn host_without_credential_fails_the_step() {
        let fx = fixture();
        let bare = fx.store.add_host("bare", "10.9.9.9", None);
        let step = inline_step("uptime", Some(bare));

        let outcome = fx.executor.execute(&fx.run, &step, "s").await.unwrap();
        assert!(!outcome.succeeded());
        assert!(outcome.error.unwrap().contains("no credential"));
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_failed_step() {
        let fx = fixture();
        fx.mock.fail_on("migrate", 4);
        let step = inline_step("./migrate", Some(fx.host_id));

        let outcome = fx.executor.execute(&fx.run, &step, "s").await.unwrap();
        assert!(!outcome.succeeded());
        assert_eq!(outcome.exit_code, Some(4));
        assert_eq!(fx.store.step_runs(fx.run.run_id)[0].exit_code, Some(4));
    }

    #[tokio::test]
    async fn transport_error_is_recorded_not_raised() {
        let fx = fixture();
        fx.mock.error_on("ping", "connection reset");
        let step = inline_step("ping", Some(fx.host_id));

        let outcome = fx.executor.execute(&fx.run, &step, "s").await.unwrap();
        assert!(!outcome.succeeded());
        let rows = fx.store.step_runs(fx.run.run_id);
        assert_eq!(rows[0].status, StepRunStatus::Failed);
        assert!(rows[0].error_message.as_deref().unwrap().contains("connection reset"));
    }
}
