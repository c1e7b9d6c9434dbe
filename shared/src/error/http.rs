//! HTTP status code mapping for error codes

use super::codes::ErrorCode;
use http::StatusCode;

impl ErrorCode {
    /// Get the appropriate HTTP status code for this error code
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::NotFound | Self::PogRequestNotFound | Self::ProductNotFound => {
                StatusCode::NOT_FOUND
            }

            Self::SlotConflict
            | Self::PogRequestDuplicate
            | Self::PogRequestNotPending => StatusCode::CONFLICT,

            // 目标槽位在当前布局中不存在，请求本身格式正确
            Self::SlotNotFound | Self::SwapSlotMissing => StatusCode::UNPROCESSABLE_ENTITY,

            // 可重试
            Self::ShelfBusy => StatusCode::SERVICE_UNAVAILABLE,

            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,

            Self::ValidationFailed | Self::PogActionInvalid => StatusCode::BAD_REQUEST,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_status() {
        assert_eq!(ErrorCode::NotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::PogRequestNotFound.http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ErrorCode::ProductNotFound.http_status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_conflict_status() {
        assert_eq!(
            ErrorCode::PogRequestDuplicate.http_status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ErrorCode::PogRequestNotPending.http_status(),
            StatusCode::CONFLICT
        );
        assert_eq!(ErrorCode::SlotConflict.http_status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_layout_errors_are_unprocessable() {
        assert_eq!(
            ErrorCode::SlotNotFound.http_status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ErrorCode::SwapSlotMissing.http_status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_retryable_status() {
        assert_eq!(
            ErrorCode::ShelfBusy.http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_client_and_server_errors() {
        assert_eq!(
            ErrorCode::ValidationFailed.http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ErrorCode::PogActionInvalid.http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ErrorCode::InternalError.http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
