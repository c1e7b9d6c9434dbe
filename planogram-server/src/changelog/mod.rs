//! Shelf change log
//!
//! Every committed layout mutation leaves one entry per affected product,
//! grouped by an `update_id`, and raises the branch's update flag so store
//! staff know to look at the new layout.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use shared::models::{
    BranchAckSummary, ChangeAction, ChangeLogPage, ChangeLogQuery, Pagination, Product,
    ShelfSlot, ShelfUpdateFlag,
};
use shared::util::now_millis;

use crate::store::{Store, StoreResult, StoreTx};

/// Placement reference inside one shelf: `(row_no, index)`.
pub type Place = (i32, i32);

/// One product's change on one shelf.
///
/// The log action follows from which side is present, so an `add` can never
/// carry a source position nor a `delete` a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Movement {
    pub shelf_code: String,
    pub code_product: i64,
    pub from: Option<Place>,
    pub to: Option<Place>,
}

impl Movement {
    pub fn added(shelf_code: impl Into<String>, code_product: i64, to: Place) -> Self {
        Self {
            shelf_code: shelf_code.into(),
            code_product,
            from: None,
            to: Some(to),
        }
    }

    pub fn removed(shelf_code: impl Into<String>, code_product: i64, from: Place) -> Self {
        Self {
            shelf_code: shelf_code.into(),
            code_product,
            from: Some(from),
            to: None,
        }
    }

    pub fn moved(shelf_code: impl Into<String>, code_product: i64, from: Place, to: Place) -> Self {
        Self {
            shelf_code: shelf_code.into(),
            code_product,
            from: Some(from),
            to: Some(to),
        }
    }

    /// A product leaving `from_shelf` and landing on `to_shelf`: one move on
    /// the same shelf, a delete plus an add across shelves.
    pub fn relocation(
        code_product: i64,
        from_shelf: &str,
        from: Place,
        to_shelf: &str,
        to: Place,
    ) -> Vec<Self> {
        if from_shelf == to_shelf {
            vec![Self::moved(from_shelf, code_product, from, to)]
        } else {
            vec![
                Self::removed(from_shelf, code_product, from),
                Self::added(to_shelf, code_product, to),
            ]
        }
    }

    pub fn action(&self) -> Option<ChangeAction> {
        match (self.from, self.to) {
            (None, Some(_)) => Some(ChangeAction::Add),
            (Some(_), None) => Some(ChangeAction::Delete),
            (Some(_), Some(_)) => Some(ChangeAction::Move),
            (None, None) => None,
        }
    }
}

/// How a recorder call describes what changed.
#[derive(Debug, Clone, Copy)]
pub enum ChangeLogMode<'a> {
    /// Every item was added (`Add`) or removed (`Delete`) at its position.
    Single {
        action: ChangeAction,
        items: &'a [ShelfSlot],
    },
    /// Compare two snapshots of the same shelf, keyed by product code.
    Diff {
        old: &'a [ShelfSlot],
        new: &'a [ShelfSlot],
    },
}

impl ChangeLogMode<'_> {
    pub fn movements(&self, shelf_code: &str) -> Vec<Movement> {
        match *self {
            ChangeLogMode::Single { action, items } => items
                .iter()
                .filter_map(|slot| {
                    let place = (slot.row_no, slot.index);
                    match action {
                        ChangeAction::Add => {
                            Some(Movement::added(shelf_code, slot.code_product, place))
                        }
                        ChangeAction::Delete => {
                            Some(Movement::removed(shelf_code, slot.code_product, place))
                        }
                        // single mode has no source/target pair
                        ChangeAction::Move => None,
                    }
                })
                .collect(),
            ChangeLogMode::Diff { old, new } => diff_movements(shelf_code, old, new),
        }
    }
}

/// Product-keyed diff of two shelf snapshots: deletes, then adds, then moves.
///
/// A product that occurs several times is represented by its last slot.
pub fn diff_movements(shelf_code: &str, old: &[ShelfSlot], new: &[ShelfSlot]) -> Vec<Movement> {
    let place = |s: &ShelfSlot| (s.row_no, s.index);
    let old_map: HashMap<i64, Place> = old.iter().map(|s| (s.code_product, place(s))).collect();
    let new_map: HashMap<i64, Place> = new.iter().map(|s| (s.code_product, place(s))).collect();

    let mut movements = Vec::new();

    for code in unique_codes(old) {
        if !new_map.contains_key(&code) {
            movements.push(Movement::removed(shelf_code, code, old_map[&code]));
        }
    }
    for code in unique_codes(new) {
        if !old_map.contains_key(&code) {
            movements.push(Movement::added(shelf_code, code, new_map[&code]));
        }
    }
    for code in unique_codes(old) {
        if let (Some(&from), Some(&to)) = (old_map.get(&code), new_map.get(&code))
            && from != to
        {
            movements.push(Movement::moved(shelf_code, code, from, to));
        }
    }

    movements
}

fn unique_codes(slots: &[ShelfSlot]) -> Vec<i64> {
    let mut seen = HashSet::new();
    slots
        .iter()
        .map(|s| s.code_product)
        .filter(|code| seen.insert(*code))
        .collect()
}

/// Row to be written to the change log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChangeLog {
    pub branch_code: String,
    pub shelf_code: String,
    pub update_id: String,
    pub action: ChangeAction,
    pub code_product: i64,
    pub product_name: Option<String>,
    pub from_row: Option<i32>,
    pub from_index: Option<i32>,
    pub to_row: Option<i32>,
    pub to_index: Option<i32>,
    pub created_at: i64,
    pub created_by: Option<String>,
}

/// Display name for a log entry: master name, brand, then the bare code.
/// Unknown products get no name.
fn product_name(products: &HashMap<i64, Product>, code: i64) -> Option<String> {
    products.get(&code).map(|p| {
        p.display_name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("code {code}"))
    })
}

/// Writes change-log entries and keeps branch flags in step.
#[derive(Clone)]
pub struct ChangeLogRecorder {
    store: Arc<dyn Store>,
}

impl ChangeLogRecorder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Build log rows for a set of movements, all under one fresh update id.
    pub async fn build_entries(
        &self,
        branch_code: &str,
        movements: &[Movement],
        actor: Option<&str>,
    ) -> StoreResult<Vec<NewChangeLog>> {
        if movements.is_empty() {
            return Ok(Vec::new());
        }

        let mut codes: Vec<i64> = movements.iter().map(|m| m.code_product).collect();
        codes.sort_unstable();
        codes.dedup();
        let products = self.store.products_by_codes(&codes).await?;

        let update_id = uuid::Uuid::new_v4().to_string();
        let now = now_millis();

        Ok(movements
            .iter()
            .filter_map(|m| {
                let action = m.action()?;
                Some(NewChangeLog {
                    branch_code: branch_code.to_string(),
                    shelf_code: m.shelf_code.clone(),
                    update_id: update_id.clone(),
                    action,
                    code_product: m.code_product,
                    product_name: product_name(&products, m.code_product),
                    from_row: m.from.map(|(row, _)| row),
                    from_index: m.from.map(|(_, index)| index),
                    to_row: m.to.map(|(row, _)| row),
                    to_index: m.to.map(|(_, index)| index),
                    created_at: now,
                    created_by: actor.map(str::to_string),
                })
            })
            .collect())
    }

    /// Record movements inside an open unit of work and raise the branch flag.
    pub async fn record_in(
        &self,
        tx: &mut dyn StoreTx,
        branch_code: &str,
        movements: &[Movement],
        actor: Option<&str>,
    ) -> StoreResult<usize> {
        let entries = self.build_entries(branch_code, movements, actor).await?;
        if entries.is_empty() {
            return Ok(0);
        }
        tx.insert_change_logs(&entries).await?;
        tx.mark_branch_updated(branch_code, actor, now_millis()).await?;
        Ok(entries.len())
    }

    /// Standalone recording for one shelf. Returns the number of entries.
    pub async fn record(
        &self,
        branch_code: &str,
        shelf_code: &str,
        mode: ChangeLogMode<'_>,
        actor: Option<&str>,
    ) -> StoreResult<usize> {
        let movements = mode.movements(shelf_code);
        if movements.is_empty() {
            return Ok(0);
        }
        let mut tx = self.store.begin().await?;
        let count = self
            .record_in(tx.as_mut(), branch_code, &movements, actor)
            .await?;
        tx.commit().await?;
        tracing::info!(branch_code, shelf_code, count, "Shelf change log recorded");
        Ok(count)
    }

    // ── Read / acknowledge side ──

    pub async fn list(&self, branch_code: &str, query: &ChangeLogQuery) -> StoreResult<ChangeLogPage> {
        let (logs, total) = self
            .store
            .list_change_logs(branch_code, query.all, query.offset(), query.limit())
            .await?;
        let unacknowledged_count = self.store.count_unacknowledged(branch_code).await?;
        Ok(ChangeLogPage {
            logs,
            unacknowledged_count,
            pagination: Pagination::new(query.page(), query.limit(), total),
        })
    }

    pub async fn acknowledge(&self, id: i64) -> StoreResult<bool> {
        self.store.acknowledge_change_log(id, now_millis()).await
    }

    pub async fn acknowledge_all(&self, branch_code: &str) -> StoreResult<u64> {
        let count = self
            .store
            .acknowledge_all_change_logs(branch_code, now_millis())
            .await?;
        tracing::info!(branch_code, count, "Change logs acknowledged");
        Ok(count)
    }

    pub async fn update_flag(&self, branch_code: &str) -> StoreResult<ShelfUpdateFlag> {
        Ok(self
            .store
            .get_update_flag(branch_code)
            .await?
            .unwrap_or_else(|| ShelfUpdateFlag::clear(branch_code)))
    }

    pub async fn acknowledge_flag(
        &self,
        branch_code: &str,
        actor: Option<&str>,
    ) -> StoreResult<ShelfUpdateFlag> {
        self.store
            .set_update_flag(branch_code, false, actor, now_millis())
            .await
    }

    pub async fn branch_summary(&self) -> StoreResult<BranchAckSummary> {
        let branches = self.store.branch_ack_statuses().await?;
        Ok(BranchAckSummary::from_branches(branches))
    }
}
