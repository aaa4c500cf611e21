//! projects — A source-control reference the executor clones at run time.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::projects;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = projects)]
pub struct Project {
    pub id: i64,
    pub organization_id: i64,
    pub name: String,
    pub scm_type: String,
    pub scm_url: String,
    pub scm_branch: Option<String>,
    pub created_at: DateTime<Utc>,
}
