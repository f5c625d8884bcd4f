use chrono::{DateTime, Utc};
use serde::Serialize;

/// One row per (owner, chain, token, spender, kind).
#[derive(Serialize, sqlx::FromRow, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AllowanceDao {
    pub id: i64,
    pub owner: String,
    pub chain_id: i64,
    pub token_addr: String,
    pub spender: String,
    pub kind: String,
    pub standard: String,
    /// Decimal string, up to 2^256 - 1.
    pub amount: String,
    pub is_unlimited: bool,
    pub last_seen_block: i64,
    pub risk_score: i64,
    /// Comma separated, e.g. `UNLIMITED,STALE`.
    #[serde(skip_serializing)]
    pub risk_flags: String,
    pub created_date: DateTime<Utc>,
    pub updated_date: DateTime<Utc>,
    pub risk_date: Option<DateTime<Utc>>,
}

impl AllowanceDao {
    pub fn risk_flag_list(&self) -> Vec<String> {
        self.risk_flags
            .split(',')
            .filter(|f| !f.is_empty())
            .map(|f| f.to_string())
            .collect()
    }
}

/// Write side of the allowance store: what a single event says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowanceObservation {
    pub owner: String,
    pub chain_id: i64,
    pub token_addr: String,
    pub spender: String,
    pub kind: String,
    pub standard: String,
    pub amount: String,
    pub is_unlimited: bool,
    pub last_seen_block: i64,
}

#[derive(Serialize, sqlx::FromRow, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgressDao {
    pub owner: String,
    pub chain_id: i64,
    /// Every block up to and including this one has been scanned.
    pub scanned_to_block: Option<i64>,
    pub target_block: Option<i64>,
    pub status: String,
    pub error: Option<String>,
    pub started_date: DateTime<Utc>,
    pub updated_date: DateTime<Utc>,
}

impl ScanProgressDao {
    pub fn is_complete(&self) -> bool {
        self.status == SCAN_STATUS_COMPLETE
    }
}

pub const SCAN_STATUS_RUNNING: &str = "running";
pub const SCAN_STATUS_COMPLETE: &str = "complete";
pub const SCAN_STATUS_FAILED: &str = "failed";
pub const SCAN_STATUS_CANCELLED: &str = "cancelled";

#[derive(Serialize, sqlx::FromRow, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadataDao {
    pub chain_id: i64,
    pub token_addr: String,
    pub standard: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: Option<i64>,
    pub fetched_date: DateTime<Utc>,
}

#[derive(Serialize, sqlx::FromRow, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpenderLabelDao {
    pub chain_id: i64,
    pub address: String,
    pub label: String,
    pub trust: String,
    pub updated_date: DateTime<Utc>,
}
