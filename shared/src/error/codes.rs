//! Unified error codes for the planogram service
//!
//! Error codes are organized by category:
//! - 0xxx: General errors
//! - 4xxx: Shelf layout errors
//! - 5xxx: POG request errors
//! - 6xxx: Product errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// All error codes are represented as u16 values so branch clients and the
/// admin console can switch on them without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,

    // ==================== 4xxx: Shelf ====================
    /// No slot holds the product (or coordinate) the change refers to
    SlotNotFound = 4001,
    /// Shelf lock could not be acquired in time
    ShelfBusy = 4002,
    /// One side of a swap has no slot
    SwapSlotMissing = 4003,
    /// Two slots would share one coordinate
    SlotConflict = 4004,

    // ==================== 5xxx: POG request ====================
    /// POG request not found
    PogRequestNotFound = 5001,
    /// A pending request already exists for the branch and barcode
    PogRequestDuplicate = 5002,
    /// Request is no longer pending
    PogRequestNotPending = 5003,
    /// Unknown or malformed action
    PogActionInvalid = 5004,

    // ==================== 6xxx: Product ====================
    /// Product not found
    ProductNotFound = 6001,

    // ==================== 9xxx: System ====================
    /// Internal server error
    InternalError = 9001,
}

impl ErrorCode {
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    pub const fn message(&self) -> &'static str {
        match self {
            // General
            ErrorCode::ValidationFailed => "Validation failed",
            ErrorCode::NotFound => "Resource not found",

            // Shelf
            ErrorCode::SlotNotFound => "Shelf slot not found",
            ErrorCode::ShelfBusy => "Shelf is being modified, please retry later",
            ErrorCode::SwapSlotMissing => "Swap target slot does not exist",
            ErrorCode::SlotConflict => "Shelf slot position is already taken",

            // POG request
            ErrorCode::PogRequestNotFound => "POG request not found",
            ErrorCode::PogRequestDuplicate => "A pending request already exists for this product",
            ErrorCode::PogRequestNotPending => "POG request is no longer pending",
            ErrorCode::PogActionInvalid => "Invalid POG action",

            // Product
            ErrorCode::ProductNotFound => "Product not found",

            // System
            ErrorCode::InternalError => "Internal server error",
        }
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error when converting from an invalid u16 to ErrorCode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            // General
            2 => Ok(ErrorCode::ValidationFailed),
            3 => Ok(ErrorCode::NotFound),

            // Shelf
            4001 => Ok(ErrorCode::SlotNotFound),
            4002 => Ok(ErrorCode::ShelfBusy),
            4003 => Ok(ErrorCode::SwapSlotMissing),
            4004 => Ok(ErrorCode::SlotConflict),

            // POG request
            5001 => Ok(ErrorCode::PogRequestNotFound),
            5002 => Ok(ErrorCode::PogRequestDuplicate),
            5003 => Ok(ErrorCode::PogRequestNotPending),
            5004 => Ok(ErrorCode::PogActionInvalid),

            // Product
            6001 => Ok(ErrorCode::ProductNotFound),

            // System
            9001 => Ok(ErrorCode::InternalError),

            _ => Err(InvalidErrorCode(value)),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_values() {
        assert_eq!(ErrorCode::ValidationFailed.code(), 2);
        assert_eq!(ErrorCode::SlotNotFound.code(), 4001);
        assert_eq!(ErrorCode::ShelfBusy.code(), 4002);
        assert_eq!(ErrorCode::SwapSlotMissing.code(), 4003);
        assert_eq!(ErrorCode::PogRequestNotFound.code(), 5001);
        assert_eq!(ErrorCode::PogRequestDuplicate.code(), 5002);
        assert_eq!(ErrorCode::PogRequestNotPending.code(), 5003);
        assert_eq!(ErrorCode::ProductNotFound.code(), 6001);
        assert_eq!(ErrorCode::InternalError.code(), 9001);
    }

    #[test]
    fn test_every_code_parses_back() {
        let codes = [
            ErrorCode::ValidationFailed,
            ErrorCode::NotFound,
            ErrorCode::SlotNotFound,
            ErrorCode::ShelfBusy,
            ErrorCode::SwapSlotMissing,
            ErrorCode::SlotConflict,
            ErrorCode::PogRequestNotFound,
            ErrorCode::PogRequestDuplicate,
            ErrorCode::PogRequestNotPending,
            ErrorCode::PogActionInvalid,
            ErrorCode::ProductNotFound,
            ErrorCode::InternalError,
        ];
        for code in codes {
            assert_eq!(ErrorCode::try_from(code.code()), Ok(code));
        }
    }

    #[test]
    fn test_serialize_as_number() {
        assert_eq!(serde_json::to_string(&ErrorCode::NotFound).unwrap(), "3");
        assert_eq!(
            serde_json::to_string(&ErrorCode::SlotNotFound).unwrap(),
            "4001"
        );
    }

    #[test]
    fn test_deserialize_invalid() {
        let result: Result<ErrorCode, _> = serde_json::from_str("0");
        assert!(result.is_err());

        let result: Result<ErrorCode, _> = serde_json::from_str("999");
        assert!(result.is_err());

        let result: Result<ErrorCode, _> = serde_json::from_str("10000");
        assert!(result.is_err());
    }

    #[test]
    fn test_message() {
        assert_eq!(ErrorCode::NotFound.message(), "Resource not found");
        assert_eq!(ErrorCode::PogRequestNotFound.message(), "POG request not found");
        assert_eq!(ErrorCode::InternalError.message(), "Internal server error");
    }

    #[test]
    fn test_invalid_error_code_display() {
        let err = InvalidErrorCode(999);
        assert_eq!(format!("{}", err), "invalid error code: 999");
    }
}
