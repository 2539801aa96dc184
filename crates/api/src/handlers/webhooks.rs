use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use super::runs::RunAccepted;
use super::AppState;
use crate::error::ApiError;
use engine::{RunRequest, TriggerKind};

/// Header naming the system that sent the webhook; recorded as `triggered_by`.
const SOURCE_HEADER: &str = "x-webhook-source";

/// Flatten a webhook payload into run variables.
///
/// Strings are taken as-is, numbers and booleans are rendered as text. Nulls,
/// arrays and nested objects have no single text form and are skipped.
fn payload_variables(payload: &Value) -> Option<BTreeMap<String, String>> {
    let object = payload.as_object()?;
    let variables = object
        .iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((key.clone(), text))
        })
        .collect();
    Some(variables)
}

pub async fn handle_webhook(
    Path(pipeline_id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<RunAccepted>), ApiError> {
    let Some(variables) = payload_variables(&payload) else {
        warn!("webhook for pipeline {pipeline_id} sent a non-object payload");
        return Err(ApiError::InvalidPayload);
    };

    let triggered_by = headers
        .get(SOURCE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("webhook")
        .to_owned();

    let request = RunRequest {
        pipeline_id,
        triggered_by,
        trigger_type: TriggerKind::Webhook,
        variables,
    };

    let run_id = state.orchestrator.queue_run(request).await?;
    Ok((StatusCode::ACCEPTED, Json(RunAccepted { run_id })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_fields_become_variables() {
        let vars = payload_variables(&json!({
            "BRANCH": "main",
            "BUILD": 42,
            "DRY_RUN": false,
            "meta": { "nested": true },
            "tags": ["a"],
            "nothing": null
        }))
        .unwrap();

        assert_eq!(vars.len(), 3);
        assert_eq!(vars["BRANCH"], "main");
        assert_eq!(vars["BUILD"], "42");
        assert_eq!(vars["DRY_RUN"], "false");
    }

    #[test]
    fn non_object_payload_is_rejected() {
        assert!(payload_variables(&json!(["x"])).is_none());
        assert!(payload_variables(&json!("x")).is_none());
    }
}
