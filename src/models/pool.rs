use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Pool entry state, persisted as an integer column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i32)]
#[serde(rename_all = "lowercase")]
pub enum CodeStatus {
    Available = 0,
    Taken = 1,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PoolEntry {
    pub id: i64,
    pub code: String,
    pub status: CodeStatus,
    pub taken_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PoolStats {
    pub total: i64,
    pub available: i64,
    pub taken: i64,
}
