//! job_events — Immutable record of a single event produced during a run.
//!
//! (execution_run_id, seq) is unique; inserts are conflict-ignoring so bus
//! redelivery cannot duplicate rows.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::job_events;

#[derive(Debug, Insertable)]
#[diesel(table_name = job_events)]
pub struct NewJobEvent {
    pub unified_job_id: i64,
    pub execution_run_id: Uuid,
    pub seq: i64,
    pub event_type: String,
    pub host_id: Option<i64>,
    pub task_name: Option<String>,
    pub play_name: Option<String>,
    pub event_data: Option<serde_json::Value>,
    pub stdout_snippet: Option<String>,
    pub created_at: DateTime<Utc>,
}
