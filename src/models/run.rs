//! execution_runs — A single attempt at executing a UnifiedJob.
//!
//! State lifecycle: pending → running → successful | failed. The consumer
//! never writes a backward transition; `last_event_seq` and
//! `persisted_event_seq` only advance.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::execution_runs;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = execution_runs)]
pub struct ExecutionRun {
    pub id: Uuid,
    pub unified_job_id: i64,
    pub attempt_number: i32,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_event_seq: i64,
    pub persisted_event_seq: i64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = execution_runs)]
pub struct NewExecutionRun {
    pub unified_job_id: i64,
    pub attempt_number: i32,
    pub state: String,
}
