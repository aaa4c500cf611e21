//! unified_jobs — A user-triggered job instance, independent of whether it
//! has begun executing.
//!
//! Status lifecycle: pending → queued → running → successful | failed.
//! A `pending` job has no `current_run_id`; the scheduler sets it in the
//! same transaction that moves the job to `queued`.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::unified_jobs;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = unified_jobs)]
pub struct UnifiedJob {
    pub id: i64,
    pub unified_job_template_id: Option<i64>,
    pub name: String,
    pub status: String,
    pub current_run_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
}
