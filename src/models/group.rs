//! groups — Named partitions of an inventory; membership lives in
//! host_group_mapping (a host may belong to zero or more groups).

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{groups, host_group_mapping};

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = groups)]
pub struct Group {
    pub id: i64,
    pub inventory_id: i64,
    pub name: String,
    pub variables: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = host_group_mapping)]
pub struct HostGroupMapping {
    pub id: i64,
    pub group_id: i64,
    pub host_id: i64,
}
