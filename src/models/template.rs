//! job_templates — Declarative recipe for a job: playbook source plus the
//! inventory it runs against.
//!
//! At least one of `playbook` (with a project) or `playbook_content` is set.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::job_templates;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = job_templates)]
pub struct JobTemplate {
    pub id: i64,
    pub organization_id: i64,
    pub name: String,
    pub inventory_id: Option<i64>,
    pub project_id: Option<i64>,
    pub playbook: String,
    pub playbook_content: Option<String>,
    pub job_type: String,
    pub verbosity: i32,
    pub extra_vars: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
