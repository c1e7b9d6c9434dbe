//! Persistence layer
//!
//! Reads go straight to the store; every layout mutation goes through a
//! [`StoreTx`] unit of work that owns its shelf locks. Two backends:
//! [`pg::PgStore`] for production and [`memory::MemoryStore`] for tests and
//! local runs without a database.

pub mod memory;
pub mod pg;

use std::collections::HashMap;

use async_trait::async_trait;
use shared::models::{
    BranchAckStatus, PogDraft, PogRequest, PogRequestFilter, PogStats, PogStatus, Product,
    ShelfChangeLog, ShelfSlot, ShelfUpdateFlag,
};
use thiserror::Error;

use crate::changelog::NewChangeLog;
use crate::shelf::lock::ShelfLock;
use crate::shelf::{NewSlot, RowRef, SlotCoord};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Lock wait exceeded the configured timeout
    #[error("lock wait timed out")]
    LockTimeout,

    /// Unique constraint violated (name of the constraint or a description)
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            match db.code().as_deref() {
                // lock_not_available
                Some("55P03") => return StoreError::LockTimeout,
                // unique_violation
                Some("23505") => {
                    return StoreError::Conflict(
                        db.constraint().unwrap_or("unique constraint").to_string(),
                    );
                }
                _ => {}
            }
        }
        StoreError::Database(e)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Shelf layout access.
#[async_trait]
pub trait SlotStore: Send + Sync {
    /// Open a unit of work. Dropping it without `commit` rolls back.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;

    /// Committed slots of a shelf ordered by row then index.
    async fn list_shelf(&self, branch_code: &str, shelf_code: &str) -> StoreResult<Vec<ShelfSlot>>;
}

/// Product master lookups.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn find_product_by_barcode(&self, barcode: &str) -> StoreResult<Option<Product>>;

    async fn products_by_codes(&self, codes: &[i64]) -> StoreResult<HashMap<i64, Product>>;
}

#[async_trait]
pub trait ChangeLogStore: Send + Sync {
    /// Newest first, then by shelf code. Returns the page and the total count.
    async fn list_change_logs(
        &self,
        branch_code: &str,
        include_acknowledged: bool,
        offset: u64,
        limit: u32,
    ) -> StoreResult<(Vec<ShelfChangeLog>, i64)>;

    async fn count_unacknowledged(&self, branch_code: &str) -> StoreResult<i64>;

    /// Returns false when the entry does not exist.
    async fn acknowledge_change_log(&self, id: i64, at: i64) -> StoreResult<bool>;

    /// Acknowledges every open entry of the branch and clears its flag.
    async fn acknowledge_all_change_logs(&self, branch_code: &str, at: i64) -> StoreResult<u64>;

    async fn branch_ack_statuses(&self) -> StoreResult<Vec<BranchAckStatus>>;

    async fn get_update_flag(&self, branch_code: &str) -> StoreResult<Option<ShelfUpdateFlag>>;

    async fn set_update_flag(
        &self,
        branch_code: &str,
        has_update: bool,
        actor: Option<&str>,
        at: i64,
    ) -> StoreResult<ShelfUpdateFlag>;
}

#[async_trait]
pub trait PogStore: Send + Sync {
    /// Fails with `Conflict` when a pending request exists for the same
    /// branch and barcode.
    async fn create_pog_request(&self, draft: &PogDraft, at: i64) -> StoreResult<PogRequest>;

    async fn get_pog_request(&self, id: i64) -> StoreResult<Option<PogRequest>>;

    async fn get_pog_requests(&self, ids: &[i64]) -> StoreResult<Vec<PogRequest>>;

    /// Newest first, at most `filter.limit()` rows.
    async fn list_pog_requests(&self, filter: &PogRequestFilter) -> StoreResult<Vec<PogRequest>>;

    /// Counts by status, honouring the branch and action filters only.
    async fn pog_stats(&self, filter: &PogRequestFilter) -> StoreResult<PogStats>;

    /// Moves a pending request to `status`. Returns the updated request, or
    /// `None` when it does not exist or is no longer pending.
    async fn transition_pending(
        &self,
        id: i64,
        status: PogStatus,
        note: Option<&str>,
        actor: Option<&str>,
        at: i64,
    ) -> StoreResult<Option<PogRequest>>;
}

/// Everything the service needs from persistence.
pub trait Store: SlotStore + ProductCatalog + ChangeLogStore + PogStore {}

impl<T> Store for T where T: SlotStore + ProductCatalog + ChangeLogStore + PogStore {}

/// One atomic unit of work.
///
/// Index shifts inside a unit of work may pass through duplicate positions;
/// uniqueness is only enforced when it commits.
#[async_trait]
pub trait StoreTx: ShelfLock {
    async fn list_row(&mut self, row: &RowRef) -> StoreResult<Vec<ShelfSlot>>;

    async fn list_shelf(&mut self, branch_code: &str, shelf_code: &str)
    -> StoreResult<Vec<ShelfSlot>>;

    async fn delete_slot_at(&mut self, coord: &SlotCoord) -> StoreResult<Option<ShelfSlot>>;

    /// Removes one slot of `code_product` from the row, preferring the one at
    /// `index_hint`, otherwise the lowest index.
    async fn delete_slot_by_product(
        &mut self,
        row: &RowRef,
        code_product: i64,
        index_hint: Option<i32>,
    ) -> StoreResult<Option<ShelfSlot>>;

    async fn delete_shelf(&mut self, branch_code: &str, shelf_code: &str) -> StoreResult<u64>;

    /// Returns the new slot id.
    async fn insert_slot(&mut self, slot: &NewSlot) -> StoreResult<i64>;

    /// `index += 1` for every slot of the row with `index >= from_index`.
    async fn shift_right(&mut self, row: &RowRef, from_index: i32) -> StoreResult<u64>;

    /// Renumbers the row to `1..=N` keeping relative order (ties by id) and
    /// returns it in order.
    async fn reindex_row(&mut self, row: &RowRef) -> StoreResult<Vec<ShelfSlot>>;

    /// Replaces the product at a coordinate, returning the previous one.
    async fn set_product_at(&mut self, coord: &SlotCoord, code_product: i64)
    -> StoreResult<Option<i64>>;

    async fn insert_change_logs(&mut self, entries: &[NewChangeLog]) -> StoreResult<u64>;

    async fn mark_branch_updated(
        &mut self,
        branch_code: &str,
        actor: Option<&str>,
        at: i64,
    ) -> StoreResult<()>;

    /// Loads a request and holds its row lock until the unit of work ends.
    async fn lock_pog_request(&mut self, id: i64) -> StoreResult<Option<PogRequest>>;

    async fn set_pog_status(
        &mut self,
        id: i64,
        status: PogStatus,
        note: Option<&str>,
        actor: Option<&str>,
        at: i64,
    ) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
