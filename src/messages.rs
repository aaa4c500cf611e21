//! Wire message shapes carried on the bus (JSON-encoded).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Everything an executor needs to start running a job. Published by the
/// scheduler on `job.requests` after the claim transaction commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub execution_run_id: Uuid,
    pub unified_job_id: i64,
    pub job_manifest: JobManifest,
    pub created_at: DateTime<Utc>,
}

/// Self-contained bundle of resolved job inputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobManifest {
    /// Raw inventory INI content; empty means "default to localhost".
    pub inventory: String,
    /// Git URL for the project, cloned by the executor when non-empty.
    #[serde(default)]
    pub project_url: String,
    /// Git branch/tag/commit (optional).
    #[serde(default)]
    pub project_ref: String,
    /// Playbook file path within the project.
    #[serde(default)]
    pub playbook: String,
    /// Inline playbook content, used when no project URL is set.
    #[serde(default)]
    pub playbook_content: String,
    #[serde(default)]
    pub extra_vars: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub environment_refs: Vec<String>,
}

/// A single lifecycle event emitted by the executor during a run.
/// Published on `job.events`, projected by the consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub execution_run_id: Uuid,
    pub unified_job_id: i64,
    pub seq: i64,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub play_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_data: Option<serde_json::Value>,
}

impl JobEvent {
    /// A bare lifecycle event with no task/host detail.
    pub fn lifecycle(run_id: Uuid, job_id: i64, event_type: &str, seq: i64) -> Self {
        Self {
            execution_run_id: run_id,
            unified_job_id: job_id,
            seq,
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            host: None,
            task_name: None,
            play_name: None,
            stdout_snippet: None,
            event_data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_request_wire_field_names() {
        let req = ExecutionRequest {
            execution_run_id: Uuid::nil(),
            unified_job_id: 42,
            job_manifest: JobManifest {
                inventory: "[web]\nweb1\n".to_string(),
                playbook: "site.yml".to_string(),
                ..Default::default()
            },
            created_at: Utc::now(),
        };

        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["unified_job_id"], 42);
        assert_eq!(value["job_manifest"]["inventory"], "[web]\nweb1\n");
        assert_eq!(value["job_manifest"]["playbook"], "site.yml");
        assert!(value["execution_run_id"].is_string());
        assert!(value["created_at"].is_string());
    }

    #[test]
    fn job_event_omits_absent_optionals() {
        let evt = JobEvent::lifecycle(Uuid::nil(), 7, "JOB_STARTED", 0);
        let value = serde_json::to_value(&evt).unwrap();
        assert_eq!(value["event_type"], "JOB_STARTED");
        assert_eq!(value["seq"], 0);
        assert!(value.get("task_name").is_none());
        assert!(value.get("stdout_snippet").is_none());
        assert!(value.get("event_data").is_none());
    }

    #[test]
    fn job_event_round_trips() {
        let mut evt = JobEvent::lifecycle(Uuid::new_v4(), 9, "TASK_OK", 3);
        evt.task_name = Some("Install Nginx".to_string());
        evt.stdout_snippet = Some("ok: [web1]".to_string());
        evt.event_data = Some(serde_json::json!({"counter": 3}));

        let bytes = serde_json::to_vec(&evt).unwrap();
        let back: JobEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.execution_run_id, evt.execution_run_id);
        assert_eq!(back.seq, 3);
        assert_eq!(back.task_name.as_deref(), Some("Install Nginx"));
    }

    #[test]
    fn manifest_tolerates_missing_optional_fields() {
        let manifest: JobManifest =
            serde_json::from_str(r#"{"inventory": ""}"#).unwrap();
        assert!(manifest.project_url.is_empty());
        assert!(manifest.extra_vars.is_empty());
        assert!(manifest.environment_refs.is_empty());
    }
}
