//! inventories — A named set of hosts, partitioned into groups.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::inventories;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = inventories)]
pub struct Inventory {
    pub id: i64,
    pub organization_id: i64,
    pub name: String,
    pub kind: String,
    pub created_at: DateTime<Utc>,
}
