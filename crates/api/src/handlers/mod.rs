use axum::{
    routing::{get, post},
    Router,
};
use engine::Orchestrator;

pub mod runs;
pub mod webhooks;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
}

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/pipelines/:id/runs", post(runs::queue))
        .route("/api/v1/runs/:id", get(runs::status))
        .route("/api/v1/runs/:id/stop", post(runs::stop))
        .route("/api/v1/webhook/:pipeline_id", post(webhooks::handle_webhook))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use db::models::StepRow;
    use db::MemoryStore;
    use engine::{Orchestrator, OrchestratorConfig, RunSnapshot, RunStatus, TriggerKind};
    use remote::mock::MockExecutor;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::runs::{RunAccepted, StopResult};
    use super::AppState;

    struct TestApp {
        store: Arc<MemoryStore>,
        mock: Arc<MockExecutor>,
        state: AppState,
    }

    impl TestApp {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            let mock = Arc::new(MockExecutor::new());
            let orchestrator =
                Orchestrator::new(store.clone(), mock.clone(), OrchestratorConfig::default());
            Self { store, mock, state: AppState { orchestrator } }
        }

        /// One stage, one step running `script` on a single host.
        fn pipeline(&self, script: &str) -> Uuid {
            let credential = self.store.add_credential("deploy", "pw", None);
            let host = self.store.add_host("web-1", "10.0.0.5", Some(credential));
            let pipeline = self.store.add_pipeline("deploy");
            let stage = self.store.add_stage(pipeline, "release", 1);
            self.store.add_step(StepRow {
                inline_script: Some(script.into()),
                host_id: Some(host),
                ..StepRow::new(stage, "run", 1)
            });
            pipeline
        }

        async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let request = Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json");
            let request = match body {
                Some(body) => request.body(Body::from(body.to_string())).unwrap(),
                None => request.body(Body::empty()).unwrap(),
            };

            let response = crate::router(self.state.clone())
                .oneshot(request)
                .await
                .unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, value)
        }

        async fn finished(&self, run_id: Uuid) -> RunSnapshot {
            tokio::time::timeout(
                Duration::from_secs(5),
                self.state.orchestrator.wait_for_run(run_id),
            )
            .await
            .unwrap()
            .unwrap()
        }
    }

    #[tokio::test]
    async fn queue_run_returns_accepted_with_run_id() {
        let app = TestApp::new();
        let pipeline = app.pipeline("deploy.sh {{VERSION}}");

        let (status, body) = app
            .send(
                "POST",
                &format!("/api/v1/pipelines/{pipeline}/runs"),
                Some(json!({ "triggered_by": "ci", "variables": { "VERSION": "1.4.2" } })),
            )
            .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        let accepted: RunAccepted = serde_json::from_value(body).unwrap();
        let snapshot = app.finished(accepted.run_id).await;
        assert_eq!(snapshot.status, RunStatus::Succeeded);

        let row = app.store.run(accepted.run_id).unwrap();
        assert_eq!(row.triggered_by, "ci");
        assert_eq!(row.trigger_type, TriggerKind::Api);
        assert_eq!(app.mock.scripts(), vec!["deploy.sh 1.4.2".to_string()]);
    }

    #[tokio::test]
    async fn status_of_a_finished_run_is_served() {
        let app = TestApp::new();
        let pipeline = app.pipeline("uptime");
        let (_, body) = app
            .send("POST", &format!("/api/v1/pipelines/{pipeline}/runs"), Some(json!({})))
            .await;
        let accepted: RunAccepted = serde_json::from_value(body).unwrap();
        app.finished(accepted.run_id).await;

        let (status, body) = app
            .send("GET", &format!("/api/v1/runs/{}", accepted.run_id), None)
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "succeeded");
        assert_eq!(body["steps"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn unknown_run_is_not_found() {
        let app = TestApp::new();
        let id = Uuid::new_v4();

        let (status, _) = app.send("GET", &format!("/api/v1/runs/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = app.send("POST", &format!("/api/v1/runs/{id}/stop"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stopping_a_finished_run_reports_false() {
        let app = TestApp::new();
        let pipeline = app.pipeline("true");
        let (_, body) = app
            .send("POST", &format!("/api/v1/pipelines/{pipeline}/runs"), Some(json!({})))
            .await;
        let accepted: RunAccepted = serde_json::from_value(body).unwrap();
        app.finished(accepted.run_id).await;

        let (status, body) = app
            .send("POST", &format!("/api/v1/runs/{}/stop", accepted.run_id), None)
            .await;

        assert_eq!(status, StatusCode::OK);
        let result: StopResult = serde_json::from_value(body).unwrap();
        assert!(!result.cancelled);
    }

    #[tokio::test]
    async fn stopping_a_queued_run_cancels_it() {
        let app = TestApp::new();
        let gate = app.mock.hold_on("blocker");
        let busy = app.pipeline("blocker");
        let waiting = app.pipeline("never");

        let (_, body) = app
            .send("POST", &format!("/api/v1/pipelines/{busy}/runs"), Some(json!({})))
            .await;
        let first: RunAccepted = serde_json::from_value(body).unwrap();
        let (_, body) = app
            .send("POST", &format!("/api/v1/pipelines/{waiting}/runs"), Some(json!({})))
            .await;
        let second: RunAccepted = serde_json::from_value(body).unwrap();

        let (status, body) = app
            .send("POST", &format!("/api/v1/runs/{}/stop", second.run_id), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cancelled"], true);

        gate.notify_one();
        assert_eq!(app.finished(first.run_id).await.status, RunStatus::Succeeded);
        assert_eq!(app.finished(second.run_id).await.status, RunStatus::Cancelled);
        assert!(!app.mock.scripts().iter().any(|s| s == "never"));
    }

    #[tokio::test]
    async fn webhook_payload_becomes_run_variables() {
        let app = TestApp::new();
        let pipeline = app.pipeline("checkout {{BRANCH}} #{{BUILD}}");

        let request = Request::builder()
            .method("POST")
            .uri(format!("/api/v1/webhook/{pipeline}"))
            .header("content-type", "application/json")
            .header("x-webhook-source", "github")
            .body(Body::from(json!({ "BRANCH": "main", "BUILD": 7 }).to_string()))
            .unwrap();
        let response = crate::router(app.state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let accepted: RunAccepted = serde_json::from_slice(&bytes).unwrap();
        app.finished(accepted.run_id).await;

        let row = app.store.run(accepted.run_id).unwrap();
        assert_eq!(row.trigger_type, TriggerKind::Webhook);
        assert_eq!(row.triggered_by, "github");
        assert_eq!(app.mock.scripts(), vec!["checkout main #7".to_string()]);
    }

    #[tokio::test]
    async fn webhook_rejects_non_object_payload() {
        let app = TestApp::new();
        let pipeline = app.pipeline("true");

        let (status, _) = app
            .send("POST", &format!("/api/v1/webhook/{pipeline}"), Some(json!([1, 2])))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(app.mock.call_count(), 0);
    }

    #[tokio::test]
    async fn queueing_after_shutdown_is_unavailable() {
        let app = TestApp::new();
        let pipeline = app.pipeline("true");
        app.state.orchestrator.shutdown().await.unwrap();

        let (status, _) = app
            .send("POST", &format!("/api/v1/pipelines/{pipeline}/runs"), Some(json!({})))
            .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
