//! Shelf layout: coordinates, locking and the mutation engine

pub mod engine;
pub mod lock;

use std::fmt;

use shared::models::SlotPosition;
use thiserror::Error;

use crate::store::StoreError;

pub use engine::{AppliedChange, EngineConfig, PreparedChange, Reindex, ShelfEngine};

/// One row of one shelf in one branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowRef {
    pub branch_code: String,
    pub shelf_code: String,
    pub row_no: i32,
}

impl RowRef {
    pub fn new(branch_code: impl Into<String>, shelf_code: impl Into<String>, row_no: i32) -> Self {
        Self {
            branch_code: branch_code.into(),
            shelf_code: shelf_code.into(),
            row_no,
        }
    }

    pub fn of(branch_code: &str, position: &SlotPosition) -> Self {
        Self::new(branch_code, position.shelf_code.as_str(), position.row_no)
    }

    pub fn at(&self, index: i32) -> SlotCoord {
        SlotCoord {
            row: self.clone(),
            index,
        }
    }
}

impl fmt::Display for RowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} row {}",
            self.branch_code, self.shelf_code, self.row_no
        )
    }
}

/// Fully qualified slot coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotCoord {
    pub row: RowRef,
    pub index: i32,
}

impl SlotCoord {
    pub fn of(branch_code: &str, position: &SlotPosition) -> Self {
        RowRef::of(branch_code, position).at(position.index)
    }
}

impl fmt::Display for SlotCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} index {}", self.row, self.index)
    }
}

/// Slot to be inserted; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSlot {
    pub row: RowRef,
    pub index: i32,
    pub code_product: i64,
}

/// Errors raised while validating or applying a layout change.
#[derive(Debug, Error)]
pub enum ShelfError {
    #[error("{0}")]
    Validation(String),

    #[error("Product not found for barcode: {barcode}")]
    ProductNotFound { barcode: String },

    #[error("Slot not found: {location}")]
    SlotNotFound { location: String },

    #[error("Swap aborted, no slot at {location}")]
    SwapSlotMissing { location: String },

    #[error("Lock wait timed out on {target}, please retry")]
    LockTimeout { target: String },

    #[error(transparent)]
    Store(StoreError),
}

impl ShelfError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<StoreError> for ShelfError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::LockTimeout => ShelfError::LockTimeout {
                target: "a locked row".into(),
            },
            other => ShelfError::Store(other),
        }
    }
}

pub type ShelfResult<T> = Result<T, ShelfError>;

/// Errors that can carry a lock wait timeout, so callers outside the engine
/// can share its retry loop.
pub trait LockContention: From<ShelfError> {
    fn is_lock_timeout(&self) -> bool;
}

impl LockContention for ShelfError {
    fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}
