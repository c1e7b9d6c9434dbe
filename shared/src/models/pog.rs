//! POG request models (陈列变更申请)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PogAction {
    Add,
    Delete,
    Move,
    Swap,
}

impl PogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Delete => "delete",
            Self::Move => "move",
            Self::Swap => "swap",
        }
    }
}

impl fmt::Display for PogAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PogAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "add" => Ok(Self::Add),
            "delete" => Ok(Self::Delete),
            "move" => Ok(Self::Move),
            "swap" => Ok(Self::Swap),
            other => Err(format!(
                "Invalid action: {other}. Must be one of: add, delete, move, swap"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PogStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
    Cancelled,
}

impl PogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Only pending requests can still change.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for PogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("Invalid status: {other}")),
        }
    }
}

/// Create payload as submitted by a branch (flat form fields).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PogRequestCreate {
    #[serde(default)]
    pub branch_code: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub barcode: String,
    pub swap_barcode: Option<String>,
    pub product_name: Option<String>,
    pub from_shelf: Option<String>,
    pub from_row: Option<i32>,
    pub from_index: Option<i32>,
    pub to_shelf: Option<String>,
    pub to_row: Option<i32>,
    pub to_index: Option<i32>,
    pub note: Option<String>,
}

/// Validated request content, as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PogDraft {
    pub branch_code: String,
    pub action: PogAction,
    pub barcode: String,
    pub swap_barcode: Option<String>,
    pub product_name: Option<String>,
    pub from_shelf: Option<String>,
    pub from_row: Option<i32>,
    pub from_index: Option<i32>,
    pub to_shelf: Option<String>,
    pub to_row: Option<i32>,
    pub to_index: Option<i32>,
    pub note: Option<String>,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PogRequest {
    pub id: i64,
    #[serde(flatten)]
    pub draft: PogDraft,
    pub status: PogStatus,
    pub reviewed_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Admin status transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PogStatusUpdate {
    pub status: String,
    pub note: Option<String>,
    /// Stored in `note` when rejecting
    pub reject_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PogRequestFilter {
    pub branch_code: Option<String>,
    pub status: Option<PogStatus>,
    pub action: Option<PogAction>,
    pub limit: Option<i64>,
}

impl PogRequestFilter {
    pub const DEFAULT_LIMIT: i64 = 200;

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, 1000)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PogStats {
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
    pub completed: i64,
    pub cancelled: i64,
    pub total: i64,
}

impl PogStats {
    pub fn add(&mut self, status: PogStatus, count: i64) {
        match status {
            PogStatus::Pending => self.pending += count,
            PogStatus::Approved => self.approved += count,
            PogStatus::Rejected => self.rejected += count,
            PogStatus::Completed => self.completed += count,
            PogStatus::Cancelled => self.cancelled += count,
        }
        self.total += count;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PogRequestList {
    pub data: Vec<PogRequest>,
    pub count: usize,
    pub stats: PogStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkApproveRequest {
    pub ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkApproveResult {
    pub success: u32,
    pub failed: u32,
    pub errors: Vec<String>,
}

impl BulkApproveResult {
    pub const MAX_ERRORS: usize = 5;

    pub fn record_failure(&mut self, id: i64, message: impl fmt::Display) {
        self.failed += 1;
        self.record_error(format!("#{id}: {message}"));
    }

    /// Report a problem that is not tied to one request (row compaction).
    pub fn record_error(&mut self, message: String) {
        if self.errors.len() < Self::MAX_ERRORS {
            self.errors.push(message);
        }
    }
}
