//! Hierarchical budget pool accounting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of a budget pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPoolStatus {
    Active,
    Exhausted,
    Suspended,
}

impl BudgetPoolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Exhausted => "exhausted",
            Self::Suspended => "suspended",
        }
    }
}

impl std::fmt::Display for BudgetPoolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for BudgetPoolStatus {
    fn from(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "exhausted" => Self::Exhausted,
            "suspended" => Self::Suspended,
            _ => Self::Active,
        }
    }
}

/// An accounting bucket with total/used/remaining, optionally chained to a
/// parent pool that consumption propagates into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetPool {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_pool_id: Option<String>,
    pub total_budget: i64,
    pub used_budget: i64,
    pub remaining_budget: i64,
    pub status: BudgetPoolStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl BudgetPool {
    pub fn new(id: impl Into<String>, total_budget: i64, parent_pool_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            parent_pool_id,
            total_budget,
            used_budget: 0,
            remaining_budget: total_budget,
            status: BudgetPoolStatus::Active,
            created_at: Utc::now(),
            metadata: None,
        }
    }

    /// Invariant #1: `used + remaining == total` at every observable instant.
    pub fn is_balanced(&self) -> bool {
        self.used_budget + self.remaining_budget == self.total_budget
    }
}
