//! Shelf update notifications (货架变更通知)
//!
//! Branches poll their flag, read the change log and acknowledge entries.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use shared::error::AppError;
use shared::models::{AckResult, BranchAckSummary, ChangeLogPage, ChangeLogQuery, ShelfUpdateFlag};

use super::actor::Actor;
use crate::state::AppState;

type ApiResult<T> = Result<Json<T>, AppError>;

/// GET /api/shelf-updates/{branch}
pub async fn get_flag(
    State(state): State<AppState>,
    Path(branch_code): Path<String>,
) -> ApiResult<ShelfUpdateFlag> {
    let flag = state.recorder().update_flag(&branch_code).await?;
    Ok(Json(flag))
}

/// POST /api/shelf-updates/{branch}/acknowledge
pub async fn acknowledge_flag(
    State(state): State<AppState>,
    Path(branch_code): Path<String>,
    actor: Actor,
) -> ApiResult<ShelfUpdateFlag> {
    let flag = state
        .recorder()
        .acknowledge_flag(&branch_code, actor.name())
        .await?;
    Ok(Json(flag))
}

/// GET /api/shelf-updates/{branch}/logs
pub async fn list_logs(
    State(state): State<AppState>,
    Path(branch_code): Path<String>,
    Query(query): Query<ChangeLogQuery>,
) -> ApiResult<ChangeLogPage> {
    let page = state.recorder().list(&branch_code, &query).await?;
    Ok(Json(page))
}

/// POST /api/shelf-updates/{branch}/logs/acknowledge
pub async fn acknowledge_all(
    State(state): State<AppState>,
    Path(branch_code): Path<String>,
) -> ApiResult<AckResult> {
    let acknowledged = state.recorder().acknowledge_all(&branch_code).await?;
    Ok(Json(AckResult { acknowledged }))
}

/// PATCH /api/shelf-change-logs/{id}/acknowledge
pub async fn acknowledge_one(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<AckResult> {
    if !state.recorder().acknowledge(id).await? {
        return Err(AppError::not_found(format!("Change log {id}")));
    }
    Ok(Json(AckResult { acknowledged: 1 }))
}

/// GET /api/admin/shelf-updates/status
pub async fn branch_status(State(state): State<AppState>) -> ApiResult<BranchAckSummary> {
    let summary = state.recorder().branch_summary().await?;
    Ok(Json(summary))
}
