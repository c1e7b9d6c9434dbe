//! POG request workflow (陈列变更申请)
//!
//! Branches submit layout change requests; admins reject, complete or bulk
//! approve them. Completing a request applies it through the shelf engine in
//! the same unit of work that flips its status.

mod service;

pub use service::PogService;

use shared::models::{PogAction, PogDraft, PogRequestCreate, PogStatus, ShelfChange, SlotPosition};
use shared::util::non_empty;
use thiserror::Error;

use crate::shelf::ShelfError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum PogError {
    #[error("{0}")]
    Validation(String),

    /// Unknown action name
    #[error("{0}")]
    InvalidAction(String),

    #[error("POG request {0} not found")]
    NotFound(i64),

    #[error("A pending request already exists for barcode {barcode} at branch {branch_code}")]
    DuplicatePending { branch_code: String, barcode: String },

    #[error("POG request {id} is {status}, only pending requests can change")]
    NotPending { id: i64, status: PogStatus },

    #[error(transparent)]
    Shelf(#[from] ShelfError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PogError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type PogResult<T> = Result<T, PogError>;

fn position(
    shelf: &Option<String>,
    row: Option<i32>,
    index: Option<i32>,
) -> Option<(String, i32, i32)> {
    match (non_empty(shelf.as_deref()), row, index) {
        (Some(shelf), Some(row), Some(index)) if row > 0 && index > 0 => Some((shelf, row, index)),
        _ => None,
    }
}

/// Validate a submitted form into a storable draft.
pub fn draft_from_create(input: PogRequestCreate, actor: Option<&str>) -> PogResult<PogDraft> {
    let branch_code = input.branch_code.trim().to_string();
    let barcode = input.barcode.trim().to_string();
    if branch_code.is_empty() || input.action.trim().is_empty() || barcode.is_empty() {
        return Err(PogError::validation(
            "branch_code, action and barcode are required",
        ));
    }
    let action: PogAction = input.action.parse().map_err(PogError::InvalidAction)?;

    let from = position(&input.from_shelf, input.from_row, input.from_index);
    let to = position(&input.to_shelf, input.to_row, input.to_index);
    let needs_from = matches!(action, PogAction::Delete | PogAction::Move | PogAction::Swap);
    let needs_to = matches!(action, PogAction::Add | PogAction::Move | PogAction::Swap);
    if needs_from && from.is_none() {
        return Err(PogError::validation(format!(
            "Missing from location for {action}"
        )));
    }
    if needs_to && to.is_none() {
        return Err(PogError::validation(format!("Missing to location for {action}")));
    }

    let swap_barcode = non_empty(input.swap_barcode.as_deref());
    if action == PogAction::Swap && swap_barcode.is_none() {
        return Err(PogError::validation("swap_barcode is required for swap"));
    }

    let (from_shelf, from_row, from_index) = match from.filter(|_| needs_from) {
        Some((shelf, row, index)) => (Some(shelf), Some(row), Some(index)),
        None => (None, None, None),
    };
    let (to_shelf, to_row, to_index) = match to.filter(|_| needs_to) {
        Some((shelf, row, index)) => (Some(shelf), Some(row), Some(index)),
        None => (None, None, None),
    };

    Ok(PogDraft {
        branch_code,
        action,
        barcode,
        swap_barcode: swap_barcode.filter(|_| action == PogAction::Swap),
        product_name: non_empty(input.product_name.as_deref()),
        from_shelf,
        from_row,
        from_index,
        to_shelf,
        to_row,
        to_index,
        note: non_empty(input.note.as_deref()),
        created_by: actor.map(str::to_string),
    })
}

/// The layout change a stored request asks for.
pub fn requested_change(draft: &PogDraft) -> PogResult<ShelfChange> {
    let from = || {
        position(&draft.from_shelf, draft.from_row, draft.from_index)
            .map(|(shelf, row, index)| SlotPosition::new(shelf, row, index))
            .ok_or_else(|| {
                PogError::validation(format!("Missing from location for {}", draft.action))
            })
    };
    let to = || {
        position(&draft.to_shelf, draft.to_row, draft.to_index)
            .map(|(shelf, row, index)| SlotPosition::new(shelf, row, index))
            .ok_or_else(|| {
                PogError::validation(format!("Missing to location for {}", draft.action))
            })
    };

    Ok(match draft.action {
        PogAction::Add => ShelfChange::Add {
            barcode: draft.barcode.clone(),
            to: to()?,
        },
        PogAction::Delete => ShelfChange::Delete {
            barcode: Some(draft.barcode.clone()),
            from: from()?,
        },
        PogAction::Move => ShelfChange::Move {
            barcode: draft.barcode.clone(),
            from: from()?,
            to: to()?,
        },
        PogAction::Swap => ShelfChange::Swap {
            barcode: draft.barcode.clone(),
            swap_barcode: draft
                .swap_barcode
                .clone()
                .ok_or_else(|| PogError::validation("swap_barcode is required for swap"))?,
            from: from()?,
            to: to()?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(action: &str) -> PogRequestCreate {
        PogRequestCreate {
            branch_code: " 001 ".into(),
            action: action.into(),
            barcode: "885010".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_required_fields() {
        let mut input = form("add");
        input.barcode = "  ".into();
        let err = draft_from_create(input, None).unwrap_err();
        assert!(err.to_string().contains("required"));

        let err = draft_from_create(form("rotate"), None).unwrap_err();
        assert!(err.to_string().contains("Must be one of: add, delete, move, swap"));
    }

    #[test]
    fn test_add_needs_target_only() {
        let err = draft_from_create(form("add"), None).unwrap_err();
        assert_eq!(err.to_string(), "Missing to location for add");

        let mut input = form("ADD");
        input.to_shelf = Some("A1".into());
        input.to_row = Some(1);
        input.to_index = Some(3);
        input.from_shelf = Some("B2".into());
        let draft = draft_from_create(input, Some("branch-user")).unwrap();
        assert_eq!(draft.branch_code, "001");
        assert_eq!(draft.action, PogAction::Add);
        assert_eq!(draft.from_shelf, None);
        assert_eq!(draft.created_by.as_deref(), Some("branch-user"));

        assert_eq!(
            requested_change(&draft).unwrap(),
            ShelfChange::Add {
                barcode: "885010".into(),
                to: SlotPosition::new("A1", 1, 3),
            }
        );
    }

    #[test]
    fn test_swap_needs_second_barcode() {
        let mut input = form("swap");
        input.from_shelf = Some("A1".into());
        input.from_row = Some(1);
        input.from_index = Some(1);
        input.to_shelf = Some("A1".into());
        input.to_row = Some(2);
        input.to_index = Some(1);
        let err = draft_from_create(input.clone(), None).unwrap_err();
        assert_eq!(err.to_string(), "swap_barcode is required for swap");

        input.swap_barcode = Some("885020".into());
        let draft = draft_from_create(input, None).unwrap();
        assert!(matches!(
            requested_change(&draft).unwrap(),
            ShelfChange::Swap { .. }
        ));
    }

    #[test]
    fn test_delete_rejects_zero_index() {
        let mut input = form("delete");
        input.from_shelf = Some("A1".into());
        input.from_row = Some(1);
        input.from_index = Some(0);
        assert!(matches!(
            draft_from_create(input, None),
            Err(PogError::Validation(_))
        ));
    }
}
