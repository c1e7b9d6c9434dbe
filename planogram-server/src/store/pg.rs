//! PostgreSQL store
//!
//! Shelf locks are `pg_advisory_xact_lock` inside the unit of work's
//! transaction, bounded by a transaction-local `lock_timeout`. Slot position
//! uniqueness is a deferred constraint, checked at COMMIT.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use shared::models::{
    BranchAckStatus, PogAction, PogDraft, PogRequest, PogRequestFilter, PogStats, PogStatus,
    Product, ShelfChangeLog, ShelfSlot, ShelfUpdateFlag,
};
use sqlx::{PgPool, Postgres, Transaction};

use super::{
    ChangeLogStore, PogStore, ProductCatalog, SlotStore, StoreError, StoreResult, StoreTx,
};
use crate::changelog::NewChangeLog;
use crate::shelf::lock::{LockKey, ShelfLock};
use crate::shelf::{NewSlot, RowRef, SlotCoord};

const SLOT_COLUMNS: &str = "id, branch_code, shelf_code, row_no, slot_index, code_product";

const LOG_COLUMNS: &str = "id, branch_code, shelf_code, update_id, action, code_product, \
     product_name, from_row, from_index, to_row, to_index, created_at, created_by, \
     acknowledged, acknowledged_at";

const POG_COLUMNS: &str = "id, branch_code, action, barcode, swap_barcode, product_name, \
     from_shelf, from_row, from_index, to_shelf, to_row, to_index, note, status, \
     created_by, reviewed_by, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct SlotRow {
    id: i64,
    branch_code: String,
    shelf_code: String,
    row_no: i32,
    slot_index: i32,
    code_product: i64,
}

impl From<SlotRow> for ShelfSlot {
    fn from(r: SlotRow) -> Self {
        ShelfSlot {
            id: r.id,
            branch_code: r.branch_code,
            shelf_code: r.shelf_code,
            row_no: r.row_no,
            index: r.slot_index,
            code_product: r.code_product,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ChangeLogRow {
    id: i64,
    branch_code: String,
    shelf_code: String,
    update_id: String,
    action: String,
    code_product: i64,
    product_name: Option<String>,
    from_row: Option<i32>,
    from_index: Option<i32>,
    to_row: Option<i32>,
    to_index: Option<i32>,
    created_at: i64,
    created_by: Option<String>,
    acknowledged: bool,
    acknowledged_at: Option<i64>,
}

impl TryFrom<ChangeLogRow> for ShelfChangeLog {
    type Error = StoreError;

    fn try_from(r: ChangeLogRow) -> Result<Self, Self::Error> {
        Ok(ShelfChangeLog {
            id: r.id,
            branch_code: r.branch_code,
            shelf_code: r.shelf_code,
            update_id: r.update_id,
            action: r.action.parse().map_err(StoreError::Internal)?,
            code_product: r.code_product,
            product_name: r.product_name,
            from_row: r.from_row,
            from_index: r.from_index,
            to_row: r.to_row,
            to_index: r.to_index,
            created_at: r.created_at,
            created_by: r.created_by,
            acknowledged: r.acknowledged,
            acknowledged_at: r.acknowledged_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PogRow {
    id: i64,
    branch_code: String,
    action: String,
    barcode: String,
    swap_barcode: Option<String>,
    product_name: Option<String>,
    from_shelf: Option<String>,
    from_row: Option<i32>,
    from_index: Option<i32>,
    to_shelf: Option<String>,
    to_row: Option<i32>,
    to_index: Option<i32>,
    note: Option<String>,
    status: String,
    created_by: Option<String>,
    reviewed_by: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<PogRow> for PogRequest {
    type Error = StoreError;

    fn try_from(r: PogRow) -> Result<Self, Self::Error> {
        let action: PogAction = r.action.parse().map_err(StoreError::Internal)?;
        let status: PogStatus = r.status.parse().map_err(StoreError::Internal)?;
        Ok(PogRequest {
            id: r.id,
            draft: PogDraft {
                branch_code: r.branch_code,
                action,
                barcode: r.barcode,
                swap_barcode: r.swap_barcode,
                product_name: r.product_name,
                from_shelf: r.from_shelf,
                from_row: r.from_row,
                from_index: r.from_index,
                to_shelf: r.to_shelf,
                to_row: r.to_row,
                to_index: r.to_index,
                note: r.note,
                created_by: r.created_by,
            },
            status,
            reviewed_by: r.reviewed_by,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

fn into_requests(rows: Vec<PogRow>) -> StoreResult<Vec<PogRequest>> {
    rows.into_iter().map(PogRequest::try_from).collect()
}

type FlagRow = (String, bool, Option<i64>, Option<String>);

fn into_flag((branch_code, has_update, updated_at, updated_by): FlagRow) -> ShelfUpdateFlag {
    ShelfUpdateFlag {
        branch_code,
        has_update,
        updated_at,
        updated_by,
    }
}

type ProductRow = (i64, String, Option<String>, Option<String>);

fn into_product((code_product, barcode, name_product, name_brand): ProductRow) -> Product {
    Product {
        code_product,
        barcode,
        name_product,
        name_brand,
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }
}

#[async_trait]
impl SlotStore for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let mut tx = self.pool.begin().await?;
        // applies to advisory and row locks alike, reset at transaction end
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis().max(1)))
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn list_shelf(&self, branch_code: &str, shelf_code: &str) -> StoreResult<Vec<ShelfSlot>> {
        let rows: Vec<SlotRow> = sqlx::query_as(&format!(
            "SELECT {SLOT_COLUMNS} FROM shelf_slots \
             WHERE branch_code = $1 AND shelf_code = $2 \
             ORDER BY row_no, slot_index, id"
        ))
        .bind(branch_code)
        .bind(shelf_code)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ShelfSlot::from).collect())
    }
}

#[async_trait]
impl ProductCatalog for PgStore {
    async fn find_product_by_barcode(&self, barcode: &str) -> StoreResult<Option<Product>> {
        let row: Option<ProductRow> = sqlx::query_as(
            "SELECT code_product, barcode, name_product, name_brand FROM products WHERE barcode = $1",
        )
        .bind(barcode)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(into_product))
    }

    async fn products_by_codes(&self, codes: &[i64]) -> StoreResult<HashMap<i64, Product>> {
        if codes.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<ProductRow> = sqlx::query_as(
            "SELECT code_product, barcode, name_product, name_brand \
             FROM products WHERE code_product = ANY($1)",
        )
        .bind(codes)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.0, into_product(row)))
            .collect())
    }
}

#[async_trait]
impl ChangeLogStore for PgStore {
    async fn list_change_logs(
        &self,
        branch_code: &str,
        include_acknowledged: bool,
        offset: u64,
        limit: u32,
    ) -> StoreResult<(Vec<ShelfChangeLog>, i64)> {
        let rows: Vec<ChangeLogRow> = sqlx::query_as(&format!(
            "SELECT {LOG_COLUMNS} FROM shelf_change_logs \
             WHERE branch_code = $1 AND ($2 OR NOT acknowledged) \
             ORDER BY created_at DESC, shelf_code ASC, id ASC \
             LIMIT $3 OFFSET $4"
        ))
        .bind(branch_code)
        .bind(include_acknowledged)
        .bind(i64::from(limit))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let (total,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM shelf_change_logs \
             WHERE branch_code = $1 AND ($2 OR NOT acknowledged)",
        )
        .bind(branch_code)
        .bind(include_acknowledged)
        .fetch_one(&self.pool)
        .await?;

        let logs = rows
            .into_iter()
            .map(ShelfChangeLog::try_from)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok((logs, total))
    }

    async fn count_unacknowledged(&self, branch_code: &str) -> StoreResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM shelf_change_logs WHERE branch_code = $1 AND NOT acknowledged",
        )
        .bind(branch_code)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn acknowledge_change_log(&self, id: i64, at: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE shelf_change_logs \
             SET acknowledged = TRUE, acknowledged_at = COALESCE(acknowledged_at, $2) \
             WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn acknowledge_all_change_logs(&self, branch_code: &str, at: i64) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE shelf_change_logs SET acknowledged = TRUE, acknowledged_at = $2 \
             WHERE branch_code = $1 AND NOT acknowledged",
        )
        .bind(branch_code)
        .bind(at)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO shelf_update_flags (branch_code, has_update, updated_at) \
             VALUES ($1, FALSE, $2) \
             ON CONFLICT (branch_code) DO UPDATE SET has_update = FALSE, updated_at = EXCLUDED.updated_at",
        )
        .bind(branch_code)
        .bind(at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn branch_ack_statuses(&self) -> StoreResult<Vec<BranchAckStatus>> {
        let rows: Vec<(String, i64, i64, i64, Option<i64>, Option<i64>)> = sqlx::query_as(
            r#"
            SELECT branch_code,
                   COUNT(*) FILTER (WHERE NOT acknowledged),
                   COUNT(*) FILTER (WHERE acknowledged),
                   COUNT(*),
                   MAX(created_at),
                   MIN(created_at) FILTER (WHERE NOT acknowledged)
            FROM shelf_change_logs
            GROUP BY branch_code
            ORDER BY branch_code
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(branch_code, pending, acknowledged, total, last_change_at, oldest_pending_at)| {
                    BranchAckStatus {
                        branch_code,
                        pending,
                        acknowledged,
                        total,
                        last_change_at,
                        oldest_pending_at,
                        status: BranchAckStatus::state_for(pending, total),
                    }
                },
            )
            .collect())
    }

    async fn get_update_flag(&self, branch_code: &str) -> StoreResult<Option<ShelfUpdateFlag>> {
        let row: Option<FlagRow> = sqlx::query_as(
            "SELECT branch_code, has_update, updated_at, updated_by \
             FROM shelf_update_flags WHERE branch_code = $1",
        )
        .bind(branch_code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(into_flag))
    }

    async fn set_update_flag(
        &self,
        branch_code: &str,
        has_update: bool,
        actor: Option<&str>,
        at: i64,
    ) -> StoreResult<ShelfUpdateFlag> {
        let row: FlagRow = sqlx::query_as(
            r#"
            INSERT INTO shelf_update_flags (branch_code, has_update, updated_at, updated_by)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (branch_code) DO UPDATE SET
                has_update = EXCLUDED.has_update,
                updated_at = EXCLUDED.updated_at,
                updated_by = COALESCE(EXCLUDED.updated_by, shelf_update_flags.updated_by)
            RETURNING branch_code, has_update, updated_at, updated_by
            "#,
        )
        .bind(branch_code)
        .bind(has_update)
        .bind(at)
        .bind(actor)
        .fetch_one(&self.pool)
        .await?;
        Ok(into_flag(row))
    }
}

#[async_trait]
impl PogStore for PgStore {
    async fn create_pog_request(&self, draft: &PogDraft, at: i64) -> StoreResult<PogRequest> {
        let row: PogRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO pog_requests (
                branch_code, action, barcode, swap_barcode, product_name,
                from_shelf, from_row, from_index, to_shelf, to_row, to_index,
                note, status, created_by, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'pending', $13, $14, $14)
            RETURNING {POG_COLUMNS}
            "#
        ))
        .bind(&draft.branch_code)
        .bind(draft.action.as_str())
        .bind(&draft.barcode)
        .bind(&draft.swap_barcode)
        .bind(&draft.product_name)
        .bind(&draft.from_shelf)
        .bind(draft.from_row)
        .bind(draft.from_index)
        .bind(&draft.to_shelf)
        .bind(draft.to_row)
        .bind(draft.to_index)
        .bind(&draft.note)
        .bind(&draft.created_by)
        .bind(at)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn get_pog_request(&self, id: i64) -> StoreResult<Option<PogRequest>> {
        let row: Option<PogRow> =
            sqlx::query_as(&format!("SELECT {POG_COLUMNS} FROM pog_requests WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(PogRequest::try_from).transpose()
    }

    async fn get_pog_requests(&self, ids: &[i64]) -> StoreResult<Vec<PogRequest>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<PogRow> = sqlx::query_as(&format!(
            "SELECT {POG_COLUMNS} FROM pog_requests WHERE id = ANY($1) ORDER BY id"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        into_requests(rows)
    }

    async fn list_pog_requests(&self, filter: &PogRequestFilter) -> StoreResult<Vec<PogRequest>> {
        let rows: Vec<PogRow> = sqlx::query_as(&format!(
            r#"
            SELECT {POG_COLUMNS} FROM pog_requests
            WHERE ($1::TEXT IS NULL OR branch_code = $1)
              AND ($2::TEXT IS NULL OR status = $2)
              AND ($3::TEXT IS NULL OR action = $3)
            ORDER BY created_at DESC, id DESC
            LIMIT $4
            "#
        ))
        .bind(filter.branch_code.as_deref())
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.action.map(|a| a.as_str()))
        .bind(filter.limit())
        .fetch_all(&self.pool)
        .await?;
        into_requests(rows)
    }

    async fn pog_stats(&self, filter: &PogRequestFilter) -> StoreResult<PogStats> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*) FROM pog_requests
            WHERE ($1::TEXT IS NULL OR branch_code = $1)
              AND ($2::TEXT IS NULL OR action = $2)
            GROUP BY status
            "#,
        )
        .bind(filter.branch_code.as_deref())
        .bind(filter.action.map(|a| a.as_str()))
        .fetch_all(&self.pool)
        .await?;

        let mut stats = PogStats::default();
        for (status, count) in rows {
            let status: PogStatus = status.parse().map_err(StoreError::Internal)?;
            stats.add(status, count);
        }
        Ok(stats)
    }

    async fn transition_pending(
        &self,
        id: i64,
        status: PogStatus,
        note: Option<&str>,
        actor: Option<&str>,
        at: i64,
    ) -> StoreResult<Option<PogRequest>> {
        let row: Option<PogRow> = sqlx::query_as(&format!(
            r#"
            UPDATE pog_requests SET
                status = $2,
                note = COALESCE($3, note),
                reviewed_by = COALESCE($4, reviewed_by),
                updated_at = $5
            WHERE id = $1 AND status = 'pending'
            RETURNING {POG_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(note)
        .bind(actor)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PogRequest::try_from).transpose()
    }
}

/// Unit of work: one Postgres transaction. Dropping it rolls back.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ShelfLock for PgTx {
    async fn acquire(&mut self, key: LockKey) -> StoreResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(key.value())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn list_row(&mut self, row: &RowRef) -> StoreResult<Vec<ShelfSlot>> {
        let rows: Vec<SlotRow> = sqlx::query_as(&format!(
            "SELECT {SLOT_COLUMNS} FROM shelf_slots \
             WHERE branch_code = $1 AND shelf_code = $2 AND row_no = $3 \
             ORDER BY slot_index, id"
        ))
        .bind(&row.branch_code)
        .bind(&row.shelf_code)
        .bind(row.row_no)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(ShelfSlot::from).collect())
    }

    async fn list_shelf(
        &mut self,
        branch_code: &str,
        shelf_code: &str,
    ) -> StoreResult<Vec<ShelfSlot>> {
        let rows: Vec<SlotRow> = sqlx::query_as(&format!(
            "SELECT {SLOT_COLUMNS} FROM shelf_slots \
             WHERE branch_code = $1 AND shelf_code = $2 \
             ORDER BY row_no, slot_index, id"
        ))
        .bind(branch_code)
        .bind(shelf_code)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(ShelfSlot::from).collect())
    }

    async fn delete_slot_at(&mut self, coord: &SlotCoord) -> StoreResult<Option<ShelfSlot>> {
        let row: Option<SlotRow> = sqlx::query_as(&format!(
            r#"
            DELETE FROM shelf_slots WHERE id = (
                SELECT id FROM shelf_slots
                WHERE branch_code = $1 AND shelf_code = $2 AND row_no = $3 AND slot_index = $4
                ORDER BY id
                LIMIT 1
            )
            RETURNING {SLOT_COLUMNS}
            "#
        ))
        .bind(&coord.row.branch_code)
        .bind(&coord.row.shelf_code)
        .bind(coord.row.row_no)
        .bind(coord.index)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(ShelfSlot::from))
    }

    async fn delete_slot_by_product(
        &mut self,
        row: &RowRef,
        code_product: i64,
        index_hint: Option<i32>,
    ) -> StoreResult<Option<ShelfSlot>> {
        let removed: Option<SlotRow> = sqlx::query_as(&format!(
            r#"
            DELETE FROM shelf_slots WHERE id = (
                SELECT id FROM shelf_slots
                WHERE branch_code = $1 AND shelf_code = $2 AND row_no = $3 AND code_product = $4
                ORDER BY (slot_index IS DISTINCT FROM $5::INTEGER), slot_index, id
                LIMIT 1
            )
            RETURNING {SLOT_COLUMNS}
            "#
        ))
        .bind(&row.branch_code)
        .bind(&row.shelf_code)
        .bind(row.row_no)
        .bind(code_product)
        .bind(index_hint)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(removed.map(ShelfSlot::from))
    }

    async fn delete_shelf(&mut self, branch_code: &str, shelf_code: &str) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM shelf_slots WHERE branch_code = $1 AND shelf_code = $2")
            .bind(branch_code)
            .bind(shelf_code)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_slot(&mut self, slot: &NewSlot) -> StoreResult<i64> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO shelf_slots (branch_code, shelf_code, row_no, slot_index, code_product) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(&slot.row.branch_code)
        .bind(&slot.row.shelf_code)
        .bind(slot.row.row_no)
        .bind(slot.index)
        .bind(slot.code_product)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn shift_right(&mut self, row: &RowRef, from_index: i32) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE shelf_slots SET slot_index = slot_index + 1 \
             WHERE branch_code = $1 AND shelf_code = $2 AND row_no = $3 AND slot_index >= $4",
        )
        .bind(&row.branch_code)
        .bind(&row.shelf_code)
        .bind(row.row_no)
        .bind(from_index)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn reindex_row(&mut self, row: &RowRef) -> StoreResult<Vec<ShelfSlot>> {
        sqlx::query(
            r#"
            UPDATE shelf_slots AS s
            SET slot_index = r.new_index
            FROM (
                SELECT id, (ROW_NUMBER() OVER (ORDER BY slot_index, id))::INTEGER AS new_index
                FROM shelf_slots
                WHERE branch_code = $1 AND shelf_code = $2 AND row_no = $3
            ) AS r
            WHERE s.id = r.id AND s.slot_index <> r.new_index
            "#,
        )
        .bind(&row.branch_code)
        .bind(&row.shelf_code)
        .bind(row.row_no)
        .execute(&mut *self.tx)
        .await?;
        self.list_row(row).await
    }

    async fn set_product_at(
        &mut self,
        coord: &SlotCoord,
        code_product: i64,
    ) -> StoreResult<Option<i64>> {
        let previous: Option<(i64,)> = sqlx::query_as(
            r#"
            WITH target AS (
                SELECT id, code_product FROM shelf_slots
                WHERE branch_code = $1 AND shelf_code = $2 AND row_no = $3 AND slot_index = $4
                ORDER BY id
                LIMIT 1
                FOR UPDATE
            )
            UPDATE shelf_slots AS s SET code_product = $5
            FROM target
            WHERE s.id = target.id
            RETURNING target.code_product
            "#,
        )
        .bind(&coord.row.branch_code)
        .bind(&coord.row.shelf_code)
        .bind(coord.row.row_no)
        .bind(coord.index)
        .bind(code_product)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(previous.map(|(code,)| code))
    }

    async fn insert_change_logs(&mut self, entries: &[NewChangeLog]) -> StoreResult<u64> {
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO shelf_change_logs (
                    branch_code, shelf_code, update_id, action, code_product, product_name,
                    from_row, from_index, to_row, to_index, created_at, created_by
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(&entry.branch_code)
            .bind(&entry.shelf_code)
            .bind(&entry.update_id)
            .bind(entry.action.as_str())
            .bind(entry.code_product)
            .bind(&entry.product_name)
            .bind(entry.from_row)
            .bind(entry.from_index)
            .bind(entry.to_row)
            .bind(entry.to_index)
            .bind(entry.created_at)
            .bind(&entry.created_by)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(entries.len() as u64)
    }

    async fn mark_branch_updated(
        &mut self,
        branch_code: &str,
        actor: Option<&str>,
        at: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO shelf_update_flags (branch_code, has_update, updated_at, updated_by)
            VALUES ($1, TRUE, $2, $3)
            ON CONFLICT (branch_code) DO UPDATE SET
                has_update = TRUE,
                updated_at = EXCLUDED.updated_at,
                updated_by = EXCLUDED.updated_by
            "#,
        )
        .bind(branch_code)
        .bind(at)
        .bind(actor)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn lock_pog_request(&mut self, id: i64) -> StoreResult<Option<PogRequest>> {
        let row: Option<PogRow> = sqlx::query_as(&format!(
            "SELECT {POG_COLUMNS} FROM pog_requests WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(PogRequest::try_from).transpose()
    }

    async fn set_pog_status(
        &mut self,
        id: i64,
        status: PogStatus,
        note: Option<&str>,
        actor: Option<&str>,
        at: i64,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE pog_requests SET status = $2, note = COALESCE($3, note), \
             reviewed_by = COALESCE($4, reviewed_by), updated_at = $5 WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(note)
        .bind(actor)
        .bind(at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
