//! hosts — A target machine in an inventory, with a JSON variables map.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::hosts;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = hosts)]
pub struct Host {
    pub id: i64,
    pub inventory_id: i64,
    pub name: String,
    pub variables: Option<serde_json::Value>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}
