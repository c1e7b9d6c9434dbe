//! Shelf layout models (货架布局)

use serde::{Deserialize, Serialize};

/// One product placement on a shelf row.
///
/// Within a `(branch_code, shelf_code, row_no)` the committed `index`
/// values are exactly `1..=N`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShelfSlot {
    pub id: i64,
    pub branch_code: String,
    pub shelf_code: String,
    pub row_no: i32,
    pub index: i32,
    pub code_product: i64,
}

/// Position inside a branch. `index` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotPosition {
    pub shelf_code: String,
    pub row_no: i32,
    pub index: i32,
}

impl SlotPosition {
    pub fn new(shelf_code: impl Into<String>, row_no: i32, index: i32) -> Self {
        Self {
            shelf_code: shelf_code.into(),
            row_no,
            index,
        }
    }
}

/// A layout change, one variant per action.
///
/// `Delete` without a barcode removes whatever sits at `from`; with a
/// barcode, `from.index` is only a hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ShelfChange {
    Add {
        barcode: String,
        to: SlotPosition,
    },
    Delete {
        #[serde(default)]
        barcode: Option<String>,
        from: SlotPosition,
    },
    Move {
        barcode: String,
        from: SlotPosition,
        to: SlotPosition,
    },
    Swap {
        barcode: String,
        swap_barcode: String,
        from: SlotPosition,
        to: SlotPosition,
    },
}

impl ShelfChange {
    pub fn action_name(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Delete { .. } => "delete",
            Self::Move { .. } => "move",
            Self::Swap { .. } => "swap",
        }
    }

    /// Shelves touched by this change (may repeat).
    pub fn shelves(&self) -> Vec<&str> {
        match self {
            Self::Add { to, .. } => vec![to.shelf_code.as_str()],
            Self::Delete { from, .. } => vec![from.shelf_code.as_str()],
            Self::Move { from, to, .. } | Self::Swap { from, to, .. } => {
                vec![from.shelf_code.as_str(), to.shelf_code.as_str()]
            }
        }
    }
}

/// Direct editor placement (by product code, no barcode lookup).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShelfItemInput {
    pub row_no: i32,
    pub index: i32,
    pub code_product: i64,
}

/// Direct editor removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShelfItemDelete {
    pub row_no: i32,
    pub code_product: i64,
    /// Index the editor last saw; preferred when the product repeats in the row
    pub index: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShelfItemsCreate {
    pub items: Vec<ShelfItemInput>,
}

/// Full replacement of one shelf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShelfReplace {
    pub items: Vec<ShelfItemInput>,
}

/// Result of a direct editor operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShelfEditResult {
    pub slots: Vec<ShelfSlot>,
    pub change_logs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexResult {
    pub row_no: i32,
    pub count: u32,
}

/// Read-side layout view, grouped by row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShelfLayout {
    pub branch_code: String,
    pub shelf_code: String,
    pub rows: Vec<ShelfRowView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShelfRowView {
    pub row_no: i32,
    pub items: Vec<ShelfItemView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShelfItemView {
    pub id: i64,
    pub index: i32,
    pub code_product: i64,
    pub barcode: Option<String>,
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_uses_action_tag() {
        let json = r#"{
            "action": "move",
            "barcode": "885000",
            "from": {"shelf_code": "A1", "row_no": 1, "index": 2},
            "to": {"shelf_code": "A2", "row_no": 3, "index": 1}
        }"#;
        let change: ShelfChange = serde_json::from_str(json).unwrap();
        assert_eq!(change.action_name(), "move");
        assert_eq!(change.shelves(), vec!["A1", "A2"]);
    }

    #[test]
    fn test_delete_barcode_is_optional() {
        let json = r#"{"action":"delete","from":{"shelf_code":"A1","row_no":1,"index":4}}"#;
        let change: ShelfChange = serde_json::from_str(json).unwrap();
        assert_eq!(
            change,
            ShelfChange::Delete {
                barcode: None,
                from: SlotPosition::new("A1", 1, 4),
            }
        );
    }

    #[test]
    fn test_swap_requires_both_barcodes() {
        let json = r#"{
            "action": "swap",
            "barcode": "1",
            "from": {"shelf_code": "A1", "row_no": 1, "index": 1},
            "to": {"shelf_code": "A1", "row_no": 1, "index": 2}
        }"#;
        assert!(serde_json::from_str::<ShelfChange>(json).is_err());
    }
}
