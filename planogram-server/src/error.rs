//! Domain error → `AppError` bridging
//!
//! Domain errors reach the client with their own message (the admin console
//! shows it as the reason an action failed). Store and infrastructure errors
//! are logged here and replaced by a generic `InternalError`.

use shared::error::{AppError, ErrorCode};

use crate::pog::PogError;
use crate::shelf::ShelfError;
use crate::store::StoreError;

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::LockTimeout => AppError::new(ErrorCode::ShelfBusy),
            StoreError::Conflict(constraint) => {
                AppError::new(ErrorCode::SlotConflict).with_detail("constraint", constraint)
            }
            StoreError::Database(db) => {
                tracing::error!(error = %db, "Store database error");
                AppError::new(ErrorCode::InternalError)
            }
            StoreError::Internal(msg) => {
                tracing::error!(error = %msg, "Store internal error");
                AppError::new(ErrorCode::InternalError)
            }
        }
    }
}

impl From<ShelfError> for AppError {
    fn from(e: ShelfError) -> Self {
        let message = e.to_string();
        match e {
            ShelfError::Validation(_) => AppError::validation(message),
            ShelfError::ProductNotFound { barcode } => {
                AppError::with_message(ErrorCode::ProductNotFound, message)
                    .with_detail("barcode", barcode)
            }
            ShelfError::SlotNotFound { location } => {
                AppError::with_message(ErrorCode::SlotNotFound, message)
                    .with_detail("location", location)
            }
            ShelfError::SwapSlotMissing { location } => {
                AppError::with_message(ErrorCode::SwapSlotMissing, message)
                    .with_detail("location", location)
            }
            ShelfError::LockTimeout { target } => {
                AppError::with_message(ErrorCode::ShelfBusy, message).with_detail("shelves", target)
            }
            ShelfError::Store(store) => store.into(),
        }
    }
}

impl From<PogError> for AppError {
    fn from(e: PogError) -> Self {
        let message = e.to_string();
        match e {
            PogError::Validation(_) => AppError::validation(message),
            PogError::InvalidAction(_) => {
                AppError::with_message(ErrorCode::PogActionInvalid, message)
            }
            PogError::NotFound(id) => {
                AppError::with_message(ErrorCode::PogRequestNotFound, message)
                    .with_detail("id", id)
            }
            PogError::DuplicatePending { .. } => {
                AppError::with_message(ErrorCode::PogRequestDuplicate, message)
            }
            PogError::NotPending { id, status } => {
                AppError::with_message(ErrorCode::PogRequestNotPending, message)
                    .with_detail("id", id)
                    .with_detail("status", status.as_str())
            }
            PogError::Shelf(shelf) => shelf.into(),
            PogError::Store(store) => store.into(),
        }
    }
}
