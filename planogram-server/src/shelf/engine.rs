//! Shelf mutation engine (货架变更引擎)
//!
//! Add / delete / move / swap on shelf rows. Every action runs inside one
//! unit of work: shelf locks are taken in [`lock_order`], the slot writes,
//! change-log entries and branch flag commit together, and a failure at any
//! step rolls all of them back.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use shared::models::{
    ChangeAction, ReindexResult, ShelfChange, ShelfEditResult, ShelfItemDelete, ShelfItemInput,
    ShelfItemView, ShelfLayout, ShelfRowView, ShelfSlot, SlotPosition,
};

use super::lock::{LockKey, LockKeyScheme, lock_order};
use super::{LockContention, NewSlot, RowRef, ShelfError, ShelfResult, SlotCoord};
use crate::changelog::{ChangeLogMode, ChangeLogRecorder, Movement, diff_movements};
use crate::config::Config;
use crate::store::{Store, StoreError, StoreTx};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Retries of a whole action after a lock timeout
    pub lock_retries: u32,
    pub lock_backoff: Duration,
    pub key_scheme: LockKeyScheme,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_retries: 3,
            lock_backoff: Duration::from_millis(200),
            key_scheme: LockKeyScheme::default(),
        }
    }
}

impl From<&Config> for EngineConfig {
    fn from(config: &Config) -> Self {
        Self {
            lock_retries: config.shelf_lock_retries,
            lock_backoff: config.shelf_lock_backoff,
            key_scheme: config.lock_key_scheme,
        }
    }
}

/// Post-delete compaction policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reindex {
    Immediate,
    /// Leave the gap; the caller compacts every touched row afterwards.
    Deferred,
}

/// Barcode resolved against the product master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProduct {
    pub barcode: String,
    pub code_product: i64,
}

/// A validated change with every barcode resolved. Safe to apply repeatedly
/// (each retry attempt reuses it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparedChange {
    Add {
        product: ResolvedProduct,
        to: SlotPosition,
    },
    Delete {
        product: Option<ResolvedProduct>,
        from: SlotPosition,
    },
    Move {
        product: ResolvedProduct,
        from: SlotPosition,
        to: SlotPosition,
    },
    Swap {
        product: ResolvedProduct,
        swap_product: ResolvedProduct,
        from: SlotPosition,
        to: SlotPosition,
    },
}

impl PreparedChange {
    pub fn action_name(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Delete { .. } => "delete",
            Self::Move { .. } => "move",
            Self::Swap { .. } => "swap",
        }
    }

    pub fn shelves(&self) -> Vec<&str> {
        match self {
            Self::Add { to, .. } => vec![to.shelf_code.as_str()],
            Self::Delete { from, .. } => vec![from.shelf_code.as_str()],
            Self::Move { from, to, .. } | Self::Swap { from, to, .. } => {
                vec![from.shelf_code.as_str(), to.shelf_code.as_str()]
            }
        }
    }
}

/// What one applied change did, before it is committed.
#[derive(Debug, Clone, Default)]
pub struct AppliedChange {
    pub movements: Vec<Movement>,
    pub touched_rows: BTreeSet<RowRef>,
}

fn place(slot: &ShelfSlot) -> (i32, i32) {
    (slot.row_no, slot.index)
}

fn check_position(label: &str, pos: &SlotPosition) -> ShelfResult<()> {
    if pos.shelf_code.trim().is_empty() {
        return Err(ShelfError::validation(format!("{label}.shelf_code is required")));
    }
    if pos.row_no < 1 {
        return Err(ShelfError::validation(format!(
            "{label}.row_no must be a positive integer"
        )));
    }
    if pos.index < 1 {
        return Err(ShelfError::validation(format!(
            "{label}.index must be a positive integer"
        )));
    }
    Ok(())
}

fn check_barcode(label: &str, barcode: &str) -> ShelfResult<()> {
    if barcode.trim().is_empty() {
        return Err(ShelfError::validation(format!("{label} is required")));
    }
    Ok(())
}

/// Structural checks, run before any lookup or lock.
pub fn validate_change(change: &ShelfChange) -> ShelfResult<()> {
    match change {
        ShelfChange::Add { barcode, to } => {
            check_barcode("barcode", barcode)?;
            check_position("to", to)
        }
        ShelfChange::Delete { barcode, from } => {
            if let Some(barcode) = barcode {
                check_barcode("barcode", barcode)?;
            }
            check_position("from", from)
        }
        ShelfChange::Move { barcode, from, to } => {
            check_barcode("barcode", barcode)?;
            check_position("from", from)?;
            check_position("to", to)
        }
        ShelfChange::Swap {
            barcode,
            swap_barcode,
            from,
            to,
        } => {
            check_barcode("barcode", barcode)?;
            check_barcode("swap_barcode", swap_barcode)?;
            check_position("from", from)?;
            check_position("to", to)?;
            if from == to {
                return Err(ShelfError::validation(
                    "Swap source and target must be different slots",
                ));
            }
            Ok(())
        }
    }
}

fn validate_items(items: &[ShelfItemInput]) -> ShelfResult<()> {
    for item in items {
        if item.row_no < 1 || item.index < 1 {
            return Err(ShelfError::validation(format!(
                "Invalid position row {} index {}: both must be positive",
                item.row_no, item.index
            )));
        }
        if item.code_product <= 0 {
            return Err(ShelfError::validation(format!(
                "Invalid code_product {}",
                item.code_product
            )));
        }
    }
    Ok(())
}

/// Applies layout changes under shelf locks.
pub struct ShelfEngine {
    store: Arc<dyn Store>,
    recorder: ChangeLogRecorder,
    config: EngineConfig,
}

impl ShelfEngine {
    pub fn new(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        Self {
            recorder: ChangeLogRecorder::new(store.clone()),
            store,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn recorder(&self) -> &ChangeLogRecorder {
        &self.recorder
    }

    // ========== Preparation ==========

    async fn resolve(&self, barcode: &str) -> ShelfResult<ResolvedProduct> {
        let barcode = barcode.trim();
        let product = self
            .store
            .find_product_by_barcode(barcode)
            .await?
            .ok_or_else(|| ShelfError::ProductNotFound {
                barcode: barcode.to_string(),
            })?;
        Ok(ResolvedProduct {
            barcode: barcode.to_string(),
            code_product: product.code_product,
        })
    }

    /// Validate and resolve barcodes. No lock is taken.
    pub async fn prepare(&self, change: &ShelfChange) -> ShelfResult<PreparedChange> {
        validate_change(change)?;
        Ok(match change {
            ShelfChange::Add { barcode, to } => PreparedChange::Add {
                product: self.resolve(barcode).await?,
                to: to.clone(),
            },
            ShelfChange::Delete { barcode, from } => {
                let product = match barcode {
                    Some(barcode) => Some(self.resolve(barcode).await?),
                    None => None,
                };
                PreparedChange::Delete {
                    product,
                    from: from.clone(),
                }
            }
            ShelfChange::Move { barcode, from, to } => PreparedChange::Move {
                product: self.resolve(barcode).await?,
                from: from.clone(),
                to: to.clone(),
            },
            ShelfChange::Swap {
                barcode,
                swap_barcode,
                from,
                to,
            } => PreparedChange::Swap {
                product: self.resolve(barcode).await?,
                swap_product: self.resolve(swap_barcode).await?,
                from: from.clone(),
                to: to.clone(),
            },
        })
    }

    // ========== Locking ==========

    pub async fn lock_shelves(
        &self,
        tx: &mut dyn StoreTx,
        branch_code: &str,
        shelves: &[&str],
    ) -> ShelfResult<()> {
        let keys = shelves
            .iter()
            .map(|shelf| LockKey::derive(self.config.key_scheme, branch_code, shelf));
        for key in lock_order(keys) {
            tx.acquire(key).await?;
        }
        Ok(())
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.lock_backoff.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << attempt.min(10));
        let jitter = if base > 0 {
            rand::thread_rng().gen_range(0..=base / 2)
        } else {
            0
        };
        Duration::from_millis(exp + jitter)
    }

    /// Run one attempt per call, retrying lock timeouts with exponential
    /// backoff. Each attempt must open its own unit of work.
    pub async fn retry_lock_timeouts<T, E, F, Fut>(
        &self,
        target: &str,
        mut attempt: F,
    ) -> Result<T, E>
    where
        E: LockContention,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut tries = 0;
        loop {
            match attempt().await {
                Err(e) if e.is_lock_timeout() && tries < self.config.lock_retries => {
                    let delay = self.backoff(tries);
                    tries += 1;
                    tracing::warn!(
                        target_shelves = target,
                        attempt = tries,
                        delay_ms = delay.as_millis() as u64,
                        "Shelf lock busy, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_lock_timeout() => {
                    tracing::warn!(
                        target_shelves = target,
                        attempts = tries + 1,
                        "Shelf lock retries exhausted"
                    );
                    return Err(ShelfError::LockTimeout {
                        target: target.to_string(),
                    }
                    .into());
                }
                other => return other,
            }
        }
    }

    // ========== Primitives ==========

    /// Insert at `requested`, clamped to the end of the row. Returns the
    /// slot's final index after compaction.
    async fn insert_with_shift(
        tx: &mut dyn StoreTx,
        row: &RowRef,
        requested: i32,
        code_product: i64,
    ) -> ShelfResult<i32> {
        let current = tx.list_row(row).await?;
        let max_index = current.iter().map(|s| s.index).max().unwrap_or(0);
        let index = requested.min(max_index + 1);

        if current.iter().any(|s| s.index >= index) {
            tx.shift_right(row, index).await?;
        }
        let id = tx
            .insert_slot(&NewSlot {
                row: row.clone(),
                index,
                code_product,
            })
            .await?;

        let compacted = tx.reindex_row(row).await?;
        compacted
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.index)
            .ok_or_else(|| {
                ShelfError::Store(StoreError::Internal(format!(
                    "inserted slot {id} missing from {row}"
                )))
            })
    }

    async fn remove_product(
        tx: &mut dyn StoreTx,
        row: &RowRef,
        product: &ResolvedProduct,
        index_hint: i32,
    ) -> ShelfResult<ShelfSlot> {
        tx.delete_slot_by_product(row, product.code_product, Some(index_hint))
            .await?
            .ok_or_else(|| ShelfError::SlotNotFound {
                location: format!("barcode {} in {row}", product.barcode),
            })
    }

    /// Put `incoming` at `coord`, which must currently hold `expected`.
    async fn swap_in(
        tx: &mut dyn StoreTx,
        coord: &SlotCoord,
        incoming: &ResolvedProduct,
        expected: &ResolvedProduct,
    ) -> ShelfResult<()> {
        let displaced = tx
            .set_product_at(coord, incoming.code_product)
            .await?
            .ok_or_else(|| ShelfError::SwapSlotMissing {
                location: coord.to_string(),
            })?;
        if displaced != expected.code_product {
            return Err(ShelfError::SlotNotFound {
                location: format!("barcode {} at {coord}", expected.barcode),
            });
        }
        Ok(())
    }

    /// Apply a prepared change inside an open unit of work. Locks are taken
    /// here; logging and commit are up to the caller.
    pub async fn apply_prepared(
        &self,
        tx: &mut dyn StoreTx,
        branch_code: &str,
        change: &PreparedChange,
        reindex: Reindex,
    ) -> ShelfResult<AppliedChange> {
        self.lock_shelves(tx, branch_code, &change.shelves()).await?;

        let mut applied = AppliedChange::default();
        match change {
            PreparedChange::Add { product, to } => {
                let row = RowRef::of(branch_code, to);
                let index =
                    Self::insert_with_shift(tx, &row, to.index, product.code_product).await?;
                applied.movements.push(Movement::added(
                    &to.shelf_code,
                    product.code_product,
                    (to.row_no, index),
                ));
                applied.touched_rows.insert(row);
            }

            PreparedChange::Delete { product, from } => {
                let row = RowRef::of(branch_code, from);
                let removed = match product {
                    Some(product) => Self::remove_product(tx, &row, product, from.index).await?,
                    None => {
                        let coord = SlotCoord::of(branch_code, from);
                        tx.delete_slot_at(&coord)
                            .await?
                            .ok_or_else(|| ShelfError::SlotNotFound {
                                location: coord.to_string(),
                            })?
                    }
                };
                if reindex == Reindex::Immediate {
                    tx.reindex_row(&row).await?;
                }
                applied.movements.push(Movement::removed(
                    &from.shelf_code,
                    removed.code_product,
                    place(&removed),
                ));
                applied.touched_rows.insert(row);
            }

            PreparedChange::Move { product, from, to } => {
                let source = RowRef::of(branch_code, from);
                let removed = Self::remove_product(tx, &source, product, from.index).await?;
                tx.reindex_row(&source).await?;

                let target = RowRef::of(branch_code, to);
                let index =
                    Self::insert_with_shift(tx, &target, to.index, product.code_product).await?;

                applied.movements.extend(Movement::relocation(
                    product.code_product,
                    &from.shelf_code,
                    place(&removed),
                    &to.shelf_code,
                    (to.row_no, index),
                ));
                applied.touched_rows.insert(source);
                applied.touched_rows.insert(target);
            }

            PreparedChange::Swap {
                product,
                swap_product,
                from,
                to,
            } => {
                let from_coord = SlotCoord::of(branch_code, from);
                let to_coord = SlotCoord::of(branch_code, to);

                // each side must still hold the product the change names
                Self::swap_in(tx, &to_coord, product, swap_product).await?;
                Self::swap_in(tx, &from_coord, swap_product, product).await?;

                let from_place = (from.row_no, from.index);
                let to_place = (to.row_no, to.index);
                applied.movements.extend(Movement::relocation(
                    product.code_product,
                    &from.shelf_code,
                    from_place,
                    &to.shelf_code,
                    to_place,
                ));
                applied.movements.extend(Movement::relocation(
                    swap_product.code_product,
                    &to.shelf_code,
                    to_place,
                    &from.shelf_code,
                    from_place,
                ));
                applied.touched_rows.insert(from_coord.row);
                applied.touched_rows.insert(to_coord.row);
            }
        }
        Ok(applied)
    }

    async fn rows_of(tx: &mut dyn StoreTx, rows: &BTreeSet<RowRef>) -> ShelfResult<Vec<ShelfSlot>> {
        let mut slots = Vec::new();
        for row in rows {
            slots.extend(tx.list_row(row).await?);
        }
        Ok(slots)
    }

    // ========== Actions ==========

    /// Apply one change atomically, together with its change-log entries.
    /// Returns the final state of every row it touched.
    pub async fn apply(
        &self,
        branch_code: &str,
        change: &ShelfChange,
        actor: Option<&str>,
    ) -> ShelfResult<ShelfEditResult> {
        let prepared = &self.prepare(change).await?;
        let target = prepared.shelves().join(",");

        let result = self
            .retry_lock_timeouts::<_, ShelfError, _, _>(&target, || async move {
                let mut tx = self.store.begin().await?;
                let applied = self
                    .apply_prepared(tx.as_mut(), branch_code, prepared, Reindex::Immediate)
                    .await?;
                let change_logs = self
                    .recorder
                    .record_in(tx.as_mut(), branch_code, &applied.movements, actor)
                    .await?;
                let slots = Self::rows_of(tx.as_mut(), &applied.touched_rows).await?;
                tx.commit().await?;
                Ok(ShelfEditResult { slots, change_logs })
            })
            .await?;

        tracing::info!(
            branch_code,
            action = prepared.action_name(),
            shelves = %target,
            change_logs = result.change_logs,
            "Shelf change applied"
        );
        Ok(result)
    }

    /// Direct editor: insert each item in order with shift semantics.
    pub async fn add_items(
        &self,
        branch_code: &str,
        shelf_code: &str,
        items: &[ShelfItemInput],
        actor: Option<&str>,
    ) -> ShelfResult<ShelfEditResult> {
        validate_items(items)?;
        if items.is_empty() {
            return Err(ShelfError::validation("items must not be empty"));
        }

        let result = self
            .retry_lock_timeouts::<_, ShelfError, _, _>(shelf_code, || async move {
                let mut tx = self.store.begin().await?;
                self.lock_shelves(tx.as_mut(), branch_code, &[shelf_code])
                    .await?;

                let mut ids = HashSet::new();
                for item in items {
                    let row = RowRef::new(branch_code, shelf_code, item.row_no);
                    let index =
                        Self::insert_with_shift(tx.as_mut(), &row, item.index, item.code_product)
                            .await?;
                    if let Some(slot) = tx
                        .list_row(&row)
                        .await?
                        .into_iter()
                        .find(|s| s.index == index)
                    {
                        ids.insert(slot.id);
                    }
                }

                // final positions, after later inserts shifted earlier ones
                let added: Vec<ShelfSlot> = tx
                    .list_shelf(branch_code, shelf_code)
                    .await?
                    .into_iter()
                    .filter(|s| ids.contains(&s.id))
                    .collect();
                let movements = ChangeLogMode::Single {
                    action: ChangeAction::Add,
                    items: &added,
                }
                .movements(shelf_code);
                let change_logs = self
                    .recorder
                    .record_in(tx.as_mut(), branch_code, &movements, actor)
                    .await?;
                tx.commit().await?;
                Ok(ShelfEditResult {
                    slots: added,
                    change_logs,
                })
            })
            .await?;

        tracing::info!(branch_code, shelf_code, count = result.slots.len(), "Shelf items added");
        Ok(result)
    }

    /// Direct editor: remove one placement of a product from a row.
    pub async fn delete_item(
        &self,
        branch_code: &str,
        shelf_code: &str,
        item: &ShelfItemDelete,
        actor: Option<&str>,
    ) -> ShelfResult<ShelfEditResult> {
        if item.row_no < 1 {
            return Err(ShelfError::validation("row_no must be a positive integer"));
        }

        let result = self
            .retry_lock_timeouts::<_, ShelfError, _, _>(shelf_code, || async move {
                let mut tx = self.store.begin().await?;
                self.lock_shelves(tx.as_mut(), branch_code, &[shelf_code])
                    .await?;

                let row = RowRef::new(branch_code, shelf_code, item.row_no);
                let removed = tx
                    .delete_slot_by_product(&row, item.code_product, item.index)
                    .await?
                    .ok_or_else(|| ShelfError::SlotNotFound {
                        location: format!("product {} in {row}", item.code_product),
                    })?;
                tx.reindex_row(&row).await?;

                let removed = vec![removed];
                let movements = ChangeLogMode::Single {
                    action: ChangeAction::Delete,
                    items: &removed,
                }
                .movements(shelf_code);
                let change_logs = self
                    .recorder
                    .record_in(tx.as_mut(), branch_code, &movements, actor)
                    .await?;
                tx.commit().await?;
                Ok(ShelfEditResult {
                    slots: removed,
                    change_logs,
                })
            })
            .await?;

        tracing::info!(
            branch_code,
            shelf_code,
            code_product = item.code_product,
            "Shelf item deleted"
        );
        Ok(result)
    }

    /// Replace a whole shelf. Rows are compacted; the log is a diff of the
    /// old and new layouts.
    pub async fn replace_shelf(
        &self,
        branch_code: &str,
        shelf_code: &str,
        items: &[ShelfItemInput],
        actor: Option<&str>,
    ) -> ShelfResult<ShelfEditResult> {
        validate_items(items)?;
        let mut seen = HashSet::new();
        for item in items {
            if !seen.insert((item.row_no, item.index)) {
                return Err(ShelfError::validation(format!(
                    "Duplicate position row {} index {}",
                    item.row_no, item.index
                )));
            }
        }

        let result = self
            .retry_lock_timeouts::<_, ShelfError, _, _>(shelf_code, || async move {
                let mut tx = self.store.begin().await?;
                self.lock_shelves(tx.as_mut(), branch_code, &[shelf_code])
                    .await?;

                let old = tx.list_shelf(branch_code, shelf_code).await?;
                tx.delete_shelf(branch_code, shelf_code).await?;

                let mut rows = BTreeSet::new();
                for item in items {
                    let row = RowRef::new(branch_code, shelf_code, item.row_no);
                    tx.insert_slot(&NewSlot {
                        row: row.clone(),
                        index: item.index,
                        code_product: item.code_product,
                    })
                    .await?;
                    rows.insert(row);
                }
                for row in &rows {
                    tx.reindex_row(row).await?;
                }

                let new = tx.list_shelf(branch_code, shelf_code).await?;
                let movements = diff_movements(shelf_code, &old, &new);
                let change_logs = self
                    .recorder
                    .record_in(tx.as_mut(), branch_code, &movements, actor)
                    .await?;
                tx.commit().await?;
                Ok(ShelfEditResult {
                    slots: new,
                    change_logs,
                })
            })
            .await?;

        tracing::info!(
            branch_code,
            shelf_code,
            slots = result.slots.len(),
            change_logs = result.change_logs,
            "Shelf replaced"
        );
        Ok(result)
    }

    /// Compact one row to `1..=N`. Returns N.
    pub async fn reindex_row(
        &self,
        branch_code: &str,
        shelf_code: &str,
        row_no: i32,
    ) -> ShelfResult<ReindexResult> {
        if row_no < 1 {
            return Err(ShelfError::validation("row_no must be a positive integer"));
        }
        let row = &RowRef::new(branch_code, shelf_code, row_no);

        let count = self
            .retry_lock_timeouts::<_, ShelfError, _, _>(shelf_code, || async move {
                let mut tx = self.store.begin().await?;
                self.lock_shelves(tx.as_mut(), branch_code, &[shelf_code])
                    .await?;
                let compacted = tx.reindex_row(row).await?;
                tx.commit().await?;
                Ok(compacted.len() as u32)
            })
            .await?;

        tracing::debug!(%row, count, "Row reindexed");
        Ok(ReindexResult { row_no, count })
    }

    /// Read-side layout, grouped by row. Not lock protected.
    pub async fn layout(&self, branch_code: &str, shelf_code: &str) -> ShelfResult<ShelfLayout> {
        let slots = self.store.list_shelf(branch_code, shelf_code).await?;

        let mut codes: Vec<i64> = slots.iter().map(|s| s.code_product).collect();
        codes.sort_unstable();
        codes.dedup();
        let products = self.store.products_by_codes(&codes).await?;

        let mut rows: BTreeMap<i32, Vec<ShelfItemView>> = BTreeMap::new();
        for slot in slots {
            let product = products.get(&slot.code_product);
            rows.entry(slot.row_no).or_default().push(ShelfItemView {
                id: slot.id,
                index: slot.index,
                code_product: slot.code_product,
                barcode: product.map(|p| p.barcode.clone()),
                name: product.and_then(|p| p.display_name().map(str::to_string)),
            });
        }

        Ok(ShelfLayout {
            branch_code: branch_code.to_string(),
            shelf_code: shelf_code.to_string(),
            rows: rows
                .into_iter()
                .map(|(row_no, items)| ShelfRowView { row_no, items })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shelf::lock::ShelfLock;
    use crate::store::memory::MemoryStore;
    use crate::store::{ChangeLogStore, SlotStore};

    const BRANCH: &str = "001";

    fn setup() -> (MemoryStore, ShelfEngine) {
        let store = MemoryStore::new();
        for code in 1..=40 {
            store.seed_product(code, &format!("885{code:03}"), Some(&format!("item {code}")), None);
        }
        let engine = ShelfEngine::new(store.shared(), EngineConfig::default());
        (store, engine)
    }

    fn barcode(code: i64) -> String {
        format!("885{code:03}")
    }

    async fn row_codes(store: &MemoryStore, shelf: &str, row_no: i32) -> Vec<(i32, i64)> {
        store
            .list_shelf(BRANCH, shelf)
            .await
            .unwrap()
            .into_iter()
            .filter(|s| s.row_no == row_no)
            .map(|s| (s.index, s.code_product))
            .collect()
    }

    async fn log_count(store: &MemoryStore) -> i64 {
        store.count_unacknowledged(BRANCH).await.unwrap()
    }

    fn add(code: i64, shelf: &str, row_no: i32, index: i32) -> ShelfChange {
        ShelfChange::Add {
            barcode: barcode(code),
            to: SlotPosition::new(shelf, row_no, index),
        }
    }

    #[tokio::test]
    async fn test_add_in_middle_shifts_right() {
        let (store, engine) = setup();
        store.seed_slots(BRANCH, "A1", &[(1, 1, 10), (1, 2, 20), (1, 3, 30)]);

        let result = engine.apply(BRANCH, &add(40, "A1", 1, 2), None).await.unwrap();
        assert_eq!(result.change_logs, 1);
        assert_eq!(
            row_codes(&store, "A1", 1).await,
            vec![(1, 10), (2, 40), (3, 20), (4, 30)]
        );
    }

    #[tokio::test]
    async fn test_add_past_end_appends() {
        let (store, engine) = setup();
        store.seed_slots(BRANCH, "A1", &[(1, 1, 10), (1, 2, 20), (1, 3, 30)]);

        engine.apply(BRANCH, &add(40, "A1", 1, 99), None).await.unwrap();
        assert_eq!(
            row_codes(&store, "A1", 1).await,
            vec![(1, 10), (2, 20), (3, 30), (4, 40)]
        );

        engine.apply(BRANCH, &add(5, "A1", 2, 7), None).await.unwrap();
        assert_eq!(row_codes(&store, "A1", 2).await, vec![(1, 5)]);

        let (logs, _) = store.list_change_logs(BRANCH, true, 0, 10).await.unwrap();
        let first_add = logs.iter().find(|l| l.code_product == 40).unwrap();
        assert_eq!((first_add.to_row, first_add.to_index), (Some(1), Some(4)));
    }

    #[tokio::test]
    async fn test_delete_by_barcode_tolerates_stale_index() {
        let (store, engine) = setup();
        store.seed_slots(BRANCH, "A1", &[(1, 1, 10), (1, 2, 20), (1, 3, 30)]);

        engine
            .apply(
                BRANCH,
                &ShelfChange::Delete {
                    barcode: None,
                    from: SlotPosition::new("A1", 1, 2),
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(row_codes(&store, "A1", 1).await, vec![(1, 10), (2, 30)]);

        // client still believes product 30 sits at index 3
        engine
            .apply(
                BRANCH,
                &ShelfChange::Delete {
                    barcode: Some(barcode(30)),
                    from: SlotPosition::new("A1", 1, 3),
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(row_codes(&store, "A1", 1).await, vec![(1, 10)]);
    }

    #[tokio::test]
    async fn test_delete_missing_product_fails_without_side_effects() {
        let (store, engine) = setup();
        store.seed_slots(BRANCH, "A1", &[(1, 1, 10)]);

        let err = engine
            .apply(
                BRANCH,
                &ShelfChange::Delete {
                    barcode: Some(barcode(20)),
                    from: SlotPosition::new("A1", 1, 1),
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ShelfError::SlotNotFound { .. }));
        assert!(err.to_string().contains("885020"));
        assert_eq!(row_codes(&store, "A1", 1).await, vec![(1, 10)]);
        assert_eq!(log_count(&store).await, 0);
    }

    #[tokio::test]
    async fn test_unknown_barcode_and_bad_position_rejected_early() {
        let (_store, engine) = setup();

        let err = engine
            .apply(
                BRANCH,
                &ShelfChange::Add {
                    barcode: "000".into(),
                    to: SlotPosition::new("A1", 1, 1),
                },
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Product not found for barcode: 000");

        let err = engine.apply(BRANCH, &add(10, "A1", 0, 1), None).await.unwrap_err();
        assert!(matches!(err, ShelfError::Validation(_)));
    }

    #[tokio::test]
    async fn test_move_between_rows_preserves_count() {
        let (store, engine) = setup();
        store.seed_slots(BRANCH, "A1", &[(1, 1, 10), (1, 2, 20), (1, 3, 30), (2, 1, 5)]);

        engine
            .apply(
                BRANCH,
                &ShelfChange::Move {
                    barcode: barcode(20),
                    from: SlotPosition::new("A1", 1, 2),
                    to: SlotPosition::new("A1", 2, 1),
                },
                Some("planner"),
            )
            .await
            .unwrap();

        assert_eq!(row_codes(&store, "A1", 1).await, vec![(1, 10), (2, 30)]);
        assert_eq!(row_codes(&store, "A1", 2).await, vec![(1, 20), (2, 5)]);

        let (logs, _) = store.list_change_logs(BRANCH, true, 0, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, ChangeAction::Move);
        assert_eq!((logs[0].from_row, logs[0].from_index), (Some(1), Some(2)));
        assert_eq!((logs[0].to_row, logs[0].to_index), (Some(2), Some(1)));
    }

    #[tokio::test]
    async fn test_move_within_row_uses_compacted_row() {
        let (store, engine) = setup();
        store.seed_slots(BRANCH, "A1", &[(1, 1, 10), (1, 2, 20), (1, 3, 30)]);

        engine
            .apply(
                BRANCH,
                &ShelfChange::Move {
                    barcode: barcode(10),
                    from: SlotPosition::new("A1", 1, 1),
                    to: SlotPosition::new("A1", 1, 3),
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(
            row_codes(&store, "A1", 1).await,
            vec![(1, 20), (2, 30), (3, 10)]
        );
    }

    #[tokio::test]
    async fn test_move_across_shelves_logs_delete_and_add() {
        let (store, engine) = setup();
        store.seed_slots(BRANCH, "A1", &[(1, 1, 10)]);
        store.seed_slots(BRANCH, "B2", &[(1, 1, 20)]);

        let result = engine
            .apply(
                BRANCH,
                &ShelfChange::Move {
                    barcode: barcode(10),
                    from: SlotPosition::new("A1", 1, 1),
                    to: SlotPosition::new("B2", 1, 1),
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.change_logs, 2);
        assert!(row_codes(&store, "A1", 1).await.is_empty());
        assert_eq!(row_codes(&store, "B2", 1).await, vec![(1, 10), (2, 20)]);

        let (logs, _) = store.list_change_logs(BRANCH, true, 0, 10).await.unwrap();
        let actions: HashSet<(String, ChangeAction)> = logs
            .iter()
            .map(|l| (l.shelf_code.clone(), l.action))
            .collect();
        assert!(actions.contains(&("A1".to_string(), ChangeAction::Delete)));
        assert!(actions.contains(&("B2".to_string(), ChangeAction::Add)));
    }

    #[tokio::test]
    async fn test_swap_touches_exactly_two_coordinates() {
        let (store, engine) = setup();
        store.seed_slots(BRANCH, "A1", &[(1, 1, 10), (1, 2, 20), (1, 3, 30), (2, 1, 5)]);

        engine
            .apply(
                BRANCH,
                &ShelfChange::Swap {
                    barcode: barcode(10),
                    swap_barcode: barcode(5),
                    from: SlotPosition::new("A1", 1, 1),
                    to: SlotPosition::new("A1", 2, 1),
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(
            row_codes(&store, "A1", 1).await,
            vec![(1, 5), (2, 20), (3, 30)]
        );
        assert_eq!(row_codes(&store, "A1", 2).await, vec![(1, 10)]);
        assert_eq!(log_count(&store).await, 2);
    }

    #[tokio::test]
    async fn test_swap_with_missing_slot_rolls_back() {
        let (store, engine) = setup();
        store.seed_slots(BRANCH, "A1", &[(1, 1, 10), (1, 2, 20)]);

        let err = engine
            .apply(
                BRANCH,
                &ShelfChange::Swap {
                    barcode: barcode(20),
                    swap_barcode: barcode(10),
                    from: SlotPosition::new("A1", 1, 9),
                    to: SlotPosition::new("A1", 1, 1),
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ShelfError::SwapSlotMissing { .. }));
        // the target write happened first and must not survive
        assert_eq!(row_codes(&store, "A1", 1).await, vec![(1, 10), (2, 20)]);
        assert_eq!(log_count(&store).await, 0);
    }

    #[tokio::test]
    async fn test_swap_rejects_stale_source_slot() {
        let (store, engine) = setup();
        store.seed_slots(BRANCH, "A1", &[(1, 1, 10), (1, 2, 20), (2, 1, 5)]);

        // 20 sits at index 2, not at the requested source
        let err = engine
            .apply(
                BRANCH,
                &ShelfChange::Swap {
                    barcode: barcode(20),
                    swap_barcode: barcode(5),
                    from: SlotPosition::new("A1", 1, 1),
                    to: SlotPosition::new("A1", 2, 1),
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ShelfError::SlotNotFound { .. }), "{err}");
        assert!(err.to_string().contains(&barcode(20)));

        assert_eq!(row_codes(&store, "A1", 1).await, vec![(1, 10), (2, 20)]);
        assert_eq!(row_codes(&store, "A1", 2).await, vec![(1, 5)]);
        assert_eq!(log_count(&store).await, 0);
    }

    #[tokio::test]
    async fn test_swap_rejects_stale_target_slot() {
        let (store, engine) = setup();
        store.seed_slots(BRANCH, "A1", &[(1, 1, 10), (2, 1, 5)]);

        let err = engine
            .apply(
                BRANCH,
                &ShelfChange::Swap {
                    barcode: barcode(10),
                    swap_barcode: barcode(7),
                    from: SlotPosition::new("A1", 1, 1),
                    to: SlotPosition::new("A1", 2, 1),
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ShelfError::SlotNotFound { .. }), "{err}");
        assert_eq!(row_codes(&store, "A1", 2).await, vec![(1, 5)]);
        assert_eq!(log_count(&store).await, 0);
    }

    #[tokio::test]
    async fn test_reindex_compacts_and_is_idempotent() {
        let (store, engine) = setup();
        store.seed_slots(BRANCH, "A1", &[(1, 2, 10), (1, 5, 20), (1, 9, 30)]);

        let first = engine.reindex_row(BRANCH, "A1", 1).await.unwrap();
        assert_eq!(first.count, 3);
        let after_first = row_codes(&store, "A1", 1).await;
        assert_eq!(after_first, vec![(1, 10), (2, 20), (3, 30)]);

        engine.reindex_row(BRANCH, "A1", 1).await.unwrap();
        assert_eq!(row_codes(&store, "A1", 1).await, after_first);
    }

    #[tokio::test]
    async fn test_replace_shelf_logs_diff() {
        let (store, engine) = setup();
        store.seed_slots(BRANCH, "A1", &[(1, 1, 1), (1, 2, 2)]);

        let items = vec![
            ShelfItemInput {
                row_no: 1,
                index: 1,
                code_product: 1,
            },
            ShelfItemInput {
                row_no: 1,
                index: 5,
                code_product: 3,
            },
        ];
        let result = engine.replace_shelf(BRANCH, "A1", &items, None).await.unwrap();
        assert_eq!(result.change_logs, 2);
        assert_eq!(row_codes(&store, "A1", 1).await, vec![(1, 1), (2, 3)]);

        let (logs, _) = store.list_change_logs(BRANCH, true, 0, 10).await.unwrap();
        let mut actions: Vec<(ChangeAction, i64)> =
            logs.iter().map(|l| (l.action, l.code_product)).collect();
        actions.sort_by_key(|(_, code)| *code);
        assert_eq!(actions, vec![(ChangeAction::Delete, 2), (ChangeAction::Add, 3)]);
    }

    #[tokio::test]
    async fn test_replace_shelf_rejects_duplicate_positions() {
        let (_store, engine) = setup();
        let item = ShelfItemInput {
            row_no: 1,
            index: 1,
            code_product: 1,
        };
        let err = engine
            .replace_shelf(BRANCH, "A1", &[item.clone(), item], None)
            .await
            .unwrap_err();
        assert!(matches!(err, ShelfError::Validation(_)));
    }

    #[tokio::test]
    async fn test_direct_add_and_delete_items() {
        let (store, engine) = setup();
        store.seed_slots(BRANCH, "A1", &[(1, 1, 10), (1, 2, 20)]);

        let items = vec![
            ShelfItemInput {
                row_no: 1,
                index: 1,
                code_product: 30,
            },
            ShelfItemInput {
                row_no: 1,
                index: 1,
                code_product: 31,
            },
        ];
        let added = engine.add_items(BRANCH, "A1", &items, None).await.unwrap();
        assert_eq!(added.change_logs, 2);
        assert_eq!(
            row_codes(&store, "A1", 1).await,
            vec![(1, 31), (2, 30), (3, 10), (4, 20)]
        );
        let added_30 = added.slots.iter().find(|s| s.code_product == 30).unwrap();
        assert_eq!(added_30.index, 2);

        let removed = engine
            .delete_item(
                BRANCH,
                "A1",
                &ShelfItemDelete {
                    row_no: 1,
                    code_product: 10,
                    index: None,
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(removed.slots[0].code_product, 10);
        assert_eq!(
            row_codes(&store, "A1", 1).await,
            vec![(1, 31), (2, 30), (3, 20)]
        );
    }

    #[tokio::test]
    async fn test_layout_groups_rows_with_names() {
        let (store, engine) = setup();
        store.seed_slots(BRANCH, "A1", &[(2, 1, 20), (1, 1, 10), (1, 2, 99)]);

        let layout = engine.layout(BRANCH, "A1").await.unwrap();
        assert_eq!(layout.rows.len(), 2);
        assert_eq!(layout.rows[0].row_no, 1);
        assert_eq!(layout.rows[0].items[0].name.as_deref(), Some("item 10"));
        assert_eq!(layout.rows[0].items[1].barcode, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_stay_compact() {
        let (store, engine) = setup();
        let engine = Arc::new(engine);

        let mut handles = Vec::new();
        for code in 1..=20 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine.apply(BRANCH, &add(code, "A1", 1, 1), None).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let indices: Vec<i32> = row_codes(&store, "A1", 1)
            .await
            .into_iter()
            .map(|(index, _)| index)
            .collect();
        assert_eq!(indices, (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_opposite_moves_do_not_deadlock() {
        let (store, engine) = setup();
        store.seed_slots(BRANCH, "A1", &[(1, 1, 10)]);
        store.seed_slots(BRANCH, "B1", &[(1, 1, 20)]);
        let engine = Arc::new(engine);

        let forward = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .apply(
                        BRANCH,
                        &ShelfChange::Move {
                            barcode: barcode(10),
                            from: SlotPosition::new("A1", 1, 1),
                            to: SlotPosition::new("B1", 1, 1),
                        },
                        None,
                    )
                    .await
            })
        };
        let backward = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .apply(
                        BRANCH,
                        &ShelfChange::Move {
                            barcode: barcode(20),
                            from: SlotPosition::new("B1", 1, 1),
                            to: SlotPosition::new("A1", 1, 1),
                        },
                        None,
                    )
                    .await
            })
        };

        let (a, b) = tokio::time::timeout(Duration::from_secs(5), async {
            (forward.await, backward.await)
        })
        .await
        .unwrap();
        a.unwrap().unwrap();
        b.unwrap().unwrap();

        let total = row_codes(&store, "A1", 1).await.len() + row_codes(&store, "B1", 1).await.len();
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn test_lock_timeout_surfaces_after_retries() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(20));
        store.seed_product(10, "885010", None, None);
        let engine = ShelfEngine::new(
            store.shared(),
            EngineConfig {
                lock_retries: 1,
                lock_backoff: Duration::from_millis(1),
                key_scheme: LockKeyScheme::Hashed,
            },
        );

        let mut holder = store.begin().await.unwrap();
        holder
            .acquire(LockKey::derive(LockKeyScheme::Hashed, BRANCH, "A1"))
            .await
            .unwrap();

        let err = engine
            .apply(BRANCH, &add(10, "A1", 1, 1), None)
            .await
            .unwrap_err();
        assert!(err.is_lock_timeout());
        assert!(err.to_string().contains("A1"));

        drop(holder);
        engine.apply(BRANCH, &add(10, "A1", 1, 1), None).await.unwrap();
    }
}
