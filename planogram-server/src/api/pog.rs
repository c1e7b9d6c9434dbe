//! POG request API
//!
//! Branch side: submit, list own history, cancel. Admin side: filtered
//! listing, status transitions and bulk approve.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use shared::error::AppError;
use shared::models::{
    BulkApproveRequest, BulkApproveResult, PogRequest, PogRequestCreate, PogRequestFilter,
    PogRequestList, PogStatusUpdate,
};

use super::actor::Actor;
use crate::state::AppState;

type ApiResult<T> = Result<Json<T>, AppError>;

#[derive(Debug, Deserialize)]
pub struct BranchQuery {
    pub branch_code: Option<String>,
}

/// POST /api/pog-requests
pub async fn create(
    State(state): State<AppState>,
    actor: Actor,
    Json(input): Json<PogRequestCreate>,
) -> ApiResult<PogRequest> {
    let request = state.pog.create(input, actor.name()).await?;
    Ok(Json(request))
}

/// GET /api/pog-requests?branch_code=
pub async fn list_for_branch(
    State(state): State<AppState>,
    Query(query): Query<BranchQuery>,
) -> ApiResult<Vec<PogRequest>> {
    let branch_code = query.branch_code.unwrap_or_default();
    let requests = state.pog.list_for_branch(&branch_code).await?;
    Ok(Json(requests))
}

/// PATCH /api/pog-requests/{id}/cancel
pub async fn cancel(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<PogRequest> {
    let request = state.pog.cancel(id).await?;
    Ok(Json(request))
}

// ── Admin ──

/// GET /api/admin/pog-requests
pub async fn admin_list(
    State(state): State<AppState>,
    Query(filter): Query<PogRequestFilter>,
) -> ApiResult<PogRequestList> {
    let list = state.pog.list(&filter).await?;
    Ok(Json(list))
}

/// PATCH /api/admin/pog-requests/{id}
pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    actor: Actor,
    Json(update): Json<PogStatusUpdate>,
) -> ApiResult<PogRequest> {
    let request = state.pog.update_status(id, &update, actor.name()).await?;
    Ok(Json(request))
}

/// POST /api/admin/pog-requests/bulk-approve
pub async fn bulk_approve(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<BulkApproveRequest>,
) -> ApiResult<BulkApproveResult> {
    let result = state.pog.bulk_approve(&body.ids, actor.name()).await?;
    Ok(Json(result))
}
