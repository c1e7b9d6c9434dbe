//! Shelf layout API
//!
//! Layout view for branches plus the admin shelf editor. Every write goes
//! through the mutation engine, so the change log and branch flag are
//! written in the same transaction.

use axum::{
    Json,
    extract::{Path, State},
};
use shared::error::AppError;
use shared::models::{
    ReindexResult, ShelfChange, ShelfEditResult, ShelfItemDelete, ShelfItemsCreate, ShelfLayout,
    ShelfReplace,
};

use super::actor::Actor;
use crate::state::AppState;

type ApiResult<T> = Result<Json<T>, AppError>;

/// GET /api/shelves/{branch}/{shelf}
pub async fn layout(
    State(state): State<AppState>,
    Path((branch_code, shelf_code)): Path<(String, String)>,
) -> ApiResult<ShelfLayout> {
    let layout = state.engine.layout(&branch_code, &shelf_code).await?;
    Ok(Json(layout))
}

/// POST /api/admin/shelves/{branch}/changes
pub async fn apply_change(
    State(state): State<AppState>,
    Path(branch_code): Path<String>,
    actor: Actor,
    Json(change): Json<ShelfChange>,
) -> ApiResult<ShelfEditResult> {
    let result = state
        .engine
        .apply(&branch_code, &change, actor.name())
        .await?;
    Ok(Json(result))
}

/// POST /api/admin/shelves/{branch}/{shelf}/items
pub async fn add_items(
    State(state): State<AppState>,
    Path((branch_code, shelf_code)): Path<(String, String)>,
    actor: Actor,
    Json(body): Json<ShelfItemsCreate>,
) -> ApiResult<ShelfEditResult> {
    let result = state
        .engine
        .add_items(&branch_code, &shelf_code, &body.items, actor.name())
        .await?;
    Ok(Json(result))
}

/// DELETE /api/admin/shelves/{branch}/{shelf}/items
pub async fn delete_item(
    State(state): State<AppState>,
    Path((branch_code, shelf_code)): Path<(String, String)>,
    actor: Actor,
    Json(item): Json<ShelfItemDelete>,
) -> ApiResult<ShelfEditResult> {
    let result = state
        .engine
        .delete_item(&branch_code, &shelf_code, &item, actor.name())
        .await?;
    Ok(Json(result))
}

/// PUT /api/admin/shelves/{branch}/{shelf}
pub async fn replace_shelf(
    State(state): State<AppState>,
    Path((branch_code, shelf_code)): Path<(String, String)>,
    actor: Actor,
    Json(body): Json<ShelfReplace>,
) -> ApiResult<ShelfEditResult> {
    let result = state
        .engine
        .replace_shelf(&branch_code, &shelf_code, &body.items, actor.name())
        .await?;
    Ok(Json(result))
}

/// POST /api/admin/shelves/{branch}/{shelf}/rows/{row}/reindex
pub async fn reindex_row(
    State(state): State<AppState>,
    Path((branch_code, shelf_code, row_no)): Path<(String, String, i32)>,
) -> ApiResult<ReindexResult> {
    let result = state
        .engine
        .reindex_row(&branch_code, &shelf_code, row_no)
        .await?;
    Ok(Json(result))
}
