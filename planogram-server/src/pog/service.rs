//! POG request service

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use shared::models::{
    BulkApproveResult, PogAction, PogRequest, PogRequestCreate, PogRequestFilter,
    PogRequestList, PogStatus, PogStatusUpdate,
};
use shared::util::{non_empty, now_millis};

use super::{PogError, PogResult, draft_from_create, requested_change};
use crate::shelf::{AppliedChange, LockContention, PreparedChange, Reindex, RowRef, ShelfEngine};
use crate::store::{Store, StoreError};

/// Per-branch history size
const BRANCH_HISTORY_LIMIT: i64 = 100;

/// Bulk approve order: deletes first so adds land on compacted rows.
const BULK_ORDER: [PogAction; 4] = [
    PogAction::Delete,
    PogAction::Add,
    PogAction::Move,
    PogAction::Swap,
];

impl LockContention for PogError {
    fn is_lock_timeout(&self) -> bool {
        match self {
            PogError::Shelf(e) => e.is_lock_timeout(),
            PogError::Store(StoreError::LockTimeout) => true,
            _ => false,
        }
    }
}

#[derive(Clone)]
pub struct PogService {
    store: Arc<dyn Store>,
    engine: Arc<ShelfEngine>,
}

impl PogService {
    pub fn new(store: Arc<dyn Store>, engine: Arc<ShelfEngine>) -> Self {
        Self { store, engine }
    }

    pub async fn create(
        &self,
        input: PogRequestCreate,
        actor: Option<&str>,
    ) -> PogResult<PogRequest> {
        let draft = draft_from_create(input, actor)?;
        let request = match self.store.create_pog_request(&draft, now_millis()).await {
            Ok(request) => request,
            Err(StoreError::Conflict(_)) => {
                return Err(PogError::DuplicatePending {
                    branch_code: draft.branch_code,
                    barcode: draft.barcode,
                });
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            request_id = request.id,
            branch_code = %request.draft.branch_code,
            action = %request.draft.action,
            "POG request created"
        );
        Ok(request)
    }

    pub async fn get(&self, id: i64) -> PogResult<PogRequest> {
        self.store
            .get_pog_request(id)
            .await?
            .ok_or(PogError::NotFound(id))
    }

    /// A branch's own requests, newest first.
    pub async fn list_for_branch(&self, branch_code: &str) -> PogResult<Vec<PogRequest>> {
        let branch_code = non_empty(Some(branch_code))
            .ok_or_else(|| PogError::validation("branch_code is required"))?;
        let filter = PogRequestFilter {
            branch_code: Some(branch_code),
            limit: Some(BRANCH_HISTORY_LIMIT),
            ..Default::default()
        };
        Ok(self.store.list_pog_requests(&filter).await?)
    }

    /// Admin listing with per-status counts (status filter not applied to
    /// the counts).
    pub async fn list(&self, filter: &PogRequestFilter) -> PogResult<PogRequestList> {
        let data = self.store.list_pog_requests(filter).await?;
        let stats = self.store.pog_stats(filter).await?;
        Ok(PogRequestList {
            count: data.len(),
            data,
            stats,
        })
    }

    /// Explain why a pending-only transition did not happen.
    async fn not_pending(&self, id: i64) -> PogError {
        match self.store.get_pog_request(id).await {
            Ok(Some(request)) => PogError::NotPending {
                id,
                status: request.status,
            },
            Ok(None) => PogError::NotFound(id),
            Err(e) => e.into(),
        }
    }

    /// Soft delete by the submitting branch.
    pub async fn cancel(&self, id: i64) -> PogResult<PogRequest> {
        match self
            .store
            .transition_pending(id, PogStatus::Cancelled, None, None, now_millis())
            .await?
        {
            Some(request) => {
                tracing::info!(request_id = id, "POG request cancelled");
                Ok(request)
            }
            None => Err(self.not_pending(id).await),
        }
    }

    /// Admin transition. `completed` applies the change first and fails
    /// (leaving the request pending) if the layout change fails.
    pub async fn update_status(
        &self,
        id: i64,
        update: &PogStatusUpdate,
        actor: Option<&str>,
    ) -> PogResult<PogRequest> {
        let status: PogStatus = update.status.parse().map_err(PogError::Validation)?;
        let note = match status {
            PogStatus::Rejected => non_empty(update.reject_reason.as_deref())
                .or_else(|| non_empty(update.note.as_deref())),
            _ => non_empty(update.note.as_deref()),
        };

        match status {
            PogStatus::Completed => {
                let request = self.get(id).await?;
                self.complete(&request, note.as_deref(), actor, Reindex::Immediate)
                    .await?;
                tracing::info!(
                    request_id = id,
                    action = %request.draft.action,
                    "POG request completed"
                );
                self.get(id).await
            }
            PogStatus::Approved | PogStatus::Rejected => {
                match self
                    .store
                    .transition_pending(id, status, note.as_deref(), actor, now_millis())
                    .await?
                {
                    Some(request) => {
                        tracing::info!(request_id = id, status = %status, "POG request reviewed");
                        Ok(request)
                    }
                    None => Err(self.not_pending(id).await),
                }
            }
            PogStatus::Pending | PogStatus::Cancelled => Err(PogError::validation(format!(
                "Invalid status: {status}. Must be one of: approved, rejected, completed"
            ))),
        }
    }

    /// Apply a request's change and mark it completed, atomically.
    async fn complete(
        &self,
        request: &PogRequest,
        note: Option<&str>,
        actor: Option<&str>,
        reindex: Reindex,
    ) -> PogResult<AppliedChange> {
        if request.status.is_terminal() {
            return Err(PogError::NotPending {
                id: request.id,
                status: request.status,
            });
        }
        let change = requested_change(&request.draft)?;
        let prepared = self.engine.prepare(&change).await?;
        let target = prepared.shelves().join(",");

        self.engine
            .retry_lock_timeouts(&target, || {
                self.complete_attempt(request, &prepared, note, actor, reindex)
            })
            .await
    }

    async fn complete_attempt(
        &self,
        request: &PogRequest,
        prepared: &PreparedChange,
        note: Option<&str>,
        actor: Option<&str>,
        reindex: Reindex,
    ) -> PogResult<AppliedChange> {
        let id = request.id;
        let branch_code = request.draft.branch_code.as_str();

        let mut tx = self.store.begin().await?;
        // request row lock first, shelf locks second
        let locked = tx
            .lock_pog_request(id)
            .await?
            .ok_or(PogError::NotFound(id))?;
        if locked.status.is_terminal() {
            return Err(PogError::NotPending {
                id,
                status: locked.status,
            });
        }

        let applied = self
            .engine
            .apply_prepared(tx.as_mut(), branch_code, prepared, reindex)
            .await?;
        self.engine
            .recorder()
            .record_in(tx.as_mut(), branch_code, &applied.movements, actor)
            .await?;
        tx.set_pog_status(id, PogStatus::Completed, note, actor, now_millis())
            .await?;
        tx.commit().await?;
        Ok(applied)
    }

    /// Complete many requests: deletes, then adds, moves and swaps, each
    /// group oldest first. Every request succeeds or fails on its own.
    pub async fn bulk_approve(
        &self,
        ids: &[i64],
        actor: Option<&str>,
    ) -> PogResult<BulkApproveResult> {
        let mut seen = HashSet::new();
        let ids: Vec<i64> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        if ids.is_empty() {
            return Err(PogError::validation("ids must not be empty"));
        }

        let mut result = BulkApproveResult::default();
        let mut by_id: HashMap<i64, PogRequest> = self
            .store
            .get_pog_requests(&ids)
            .await?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        let mut groups: HashMap<PogAction, Vec<PogRequest>> = HashMap::new();
        for id in &ids {
            match by_id.remove(id) {
                None => result.record_failure(*id, PogError::NotFound(*id)),
                Some(request) if request.status.is_terminal() => {
                    let err = PogError::NotPending {
                        id: *id,
                        status: request.status,
                    };
                    result.record_failure(*id, err);
                }
                Some(request) => groups.entry(request.draft.action).or_default().push(request),
            }
        }

        for action in BULK_ORDER {
            let Some(mut group) = groups.remove(&action) else {
                continue;
            };
            group.sort_by_key(|r| (r.created_at, r.id));

            // the last delete of each row compacts it inside its own unit of work
            let last_delete: HashMap<RowRef, i64> = if action == PogAction::Delete {
                group
                    .iter()
                    .filter_map(|r| source_row(r).map(|row| (row, r.id)))
                    .collect()
            } else {
                HashMap::new()
            };
            let mut gapped_rows: BTreeSet<RowRef> = BTreeSet::new();

            for request in &group {
                let reindex = match source_row(request) {
                    Some(row)
                        if action == PogAction::Delete
                            && last_delete.get(&row) != Some(&request.id) =>
                    {
                        Reindex::Deferred
                    }
                    _ => Reindex::Immediate,
                };
                match self.complete(request, None, actor, reindex).await {
                    Ok(applied) => {
                        result.success += 1;
                        match reindex {
                            Reindex::Deferred => gapped_rows.extend(applied.touched_rows),
                            Reindex::Immediate => {
                                for row in &applied.touched_rows {
                                    gapped_rows.remove(row);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            request_id = request.id,
                            error = %e,
                            "Bulk approve item failed"
                        );
                        result.record_failure(request.id, e);
                    }
                }
            }

            // rows whose closing delete failed still carry gaps
            self.compact_rows(gapped_rows, &mut result).await;
        }

        tracing::info!(
            success = result.success,
            failed = result.failed,
            "POG bulk approve finished"
        );
        Ok(result)
    }

    async fn compact_rows(&self, rows: BTreeSet<RowRef>, result: &mut BulkApproveResult) {
        for row in rows {
            if let Err(e) = self
                .engine
                .reindex_row(&row.branch_code, &row.shelf_code, row.row_no)
                .await
            {
                tracing::warn!(%row, error = %e, "Row reindex after bulk delete failed");
                result.record_error(format!("{row}: reindex failed: {e}"));
            }
        }
    }
}

/// Row a delete request removes from.
fn source_row(request: &PogRequest) -> Option<RowRef> {
    let draft = &request.draft;
    match (draft.from_shelf.as_deref(), draft.from_row) {
        (Some(shelf), Some(row_no)) => Some(RowRef::new(&draft.branch_code, shelf, row_no)),
        _ => None,
    }
}
