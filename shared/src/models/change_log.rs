//! Shelf change log and branch update flag (货架变更记录)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Add,
    Delete,
    Move,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Delete => "delete",
            Self::Move => "move",
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(Self::Add),
            "delete" => Ok(Self::Delete),
            "move" => Ok(Self::Move),
            other => Err(format!("unknown change action: {other}")),
        }
    }
}

/// One audit entry describing a single product's placement change.
///
/// `add` carries only `to_*`, `delete` only `from_*`, `move` both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShelfChangeLog {
    pub id: i64,
    pub branch_code: String,
    pub shelf_code: String,
    /// Groups all entries produced by one logical mutation
    pub update_id: String,
    pub action: ChangeAction,
    pub code_product: i64,
    pub product_name: Option<String>,
    pub from_row: Option<i32>,
    pub from_index: Option<i32>,
    pub to_row: Option<i32>,
    pub to_index: Option<i32>,
    pub created_at: i64,
    pub created_by: Option<String>,
    pub acknowledged: bool,
    pub acknowledged_at: Option<i64>,
}

/// Per-branch "has unseen changes" indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShelfUpdateFlag {
    pub branch_code: String,
    pub has_update: bool,
    pub updated_at: Option<i64>,
    pub updated_by: Option<String>,
}

impl ShelfUpdateFlag {
    /// Flag for a branch that has never been touched.
    pub fn clear(branch_code: impl Into<String>) -> Self {
        Self {
            branch_code: branch_code.into(),
            has_update: false,
            updated_at: None,
            updated_by: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeLogQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    /// Include acknowledged entries
    #[serde(default)]
    pub all: bool,
}

impl ChangeLogQuery {
    pub const DEFAULT_LIMIT: u32 = 20;
    pub const MAX_LIMIT: u32 = 100;

    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.limit())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: u32,
}

impl Pagination {
    pub fn new(page: u32, limit: u32, total: i64) -> Self {
        let limit_i64 = i64::from(limit.max(1));
        let total_pages = ((total.max(0) + limit_i64 - 1) / limit_i64) as u32;
        Self {
            page,
            limit,
            total,
            total_pages,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeLogPage {
    pub logs: Vec<ShelfChangeLog>,
    pub unacknowledged_count: i64,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchAckState {
    Pending,
    Acknowledged,
    NoChanges,
}

/// Admin view of one branch's acknowledgement progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchAckStatus {
    pub branch_code: String,
    pub pending: i64,
    pub acknowledged: i64,
    pub total: i64,
    pub last_change_at: Option<i64>,
    pub oldest_pending_at: Option<i64>,
    pub status: BranchAckState,
}

impl BranchAckStatus {
    pub fn state_for(pending: i64, total: i64) -> BranchAckState {
        if pending > 0 {
            BranchAckState::Pending
        } else if total > 0 {
            BranchAckState::Acknowledged
        } else {
            BranchAckState::NoChanges
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchAckSummary {
    pub branches: Vec<BranchAckStatus>,
    pub total_branches: usize,
    pub branches_with_pending: usize,
    pub total_pending: i64,
}

impl BranchAckSummary {
    pub fn from_branches(branches: Vec<BranchAckStatus>) -> Self {
        let branches_with_pending = branches.iter().filter(|b| b.pending > 0).count();
        let total_pending = branches.iter().map(|b| b.pending).sum();
        Self {
            total_branches: branches.len(),
            branches_with_pending,
            total_pending,
            branches,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResult {
    pub acknowledged: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_defaults_and_clamps() {
        let q = ChangeLogQuery::default();
        assert_eq!(q.page(), 1);
        assert_eq!(q.limit(), 20);
        assert_eq!(q.offset(), 0);

        let q = ChangeLogQuery {
            page: Some(0),
            limit: Some(500),
            all: false,
        };
        assert_eq!(q.page(), 1);
        assert_eq!(q.limit(), 100);

        let q = ChangeLogQuery {
            page: Some(3),
            limit: Some(10),
            all: true,
        };
        assert_eq!(q.offset(), 20);
    }

    #[test]
    fn test_pagination_rounds_up() {
        assert_eq!(Pagination::new(1, 20, 0).total_pages, 0);
        assert_eq!(Pagination::new(1, 20, 20).total_pages, 1);
        assert_eq!(Pagination::new(1, 20, 21).total_pages, 2);
    }

    #[test]
    fn test_branch_state() {
        assert_eq!(BranchAckStatus::state_for(2, 5), BranchAckState::Pending);
        assert_eq!(BranchAckStatus::state_for(0, 5), BranchAckState::Acknowledged);
        assert_eq!(BranchAckStatus::state_for(0, 0), BranchAckState::NoChanges);
    }

    #[test]
    fn test_change_action_parse() {
        assert_eq!("move".parse::<ChangeAction>(), Ok(ChangeAction::Move));
        assert!("swap".parse::<ChangeAction>().is_err());
    }
}
