//! In-memory store
//!
//! Same contract as the Postgres backend: per-shelf mutual exclusion with a
//! wait timeout, row locks on requests, and all-or-nothing commits. A unit of
//! work edits private copies of the shelves it touches; `commit` checks
//! position uniqueness and publishes them together with its log entries.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use shared::models::{
    BranchAckStatus, PogDraft, PogRequest, PogRequestFilter, PogStats, PogStatus, Product,
    ShelfChangeLog, ShelfSlot, ShelfUpdateFlag,
};
use tokio::sync::OwnedMutexGuard;

use super::{
    ChangeLogStore, PogStore, ProductCatalog, SlotStore, Store, StoreError, StoreResult, StoreTx,
};
use crate::changelog::NewChangeLog;
use crate::shelf::lock::{LockKey, ShelfLock};
use crate::shelf::{NewSlot, RowRef, SlotCoord};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const PENDING_CONSTRAINT: &str = "uq_pog_requests_pending";

type ShelfKey = (String, String);

/// Named mutexes created on first use.
#[derive(Default)]
struct LockRegistry {
    locks: DashMap<i64, Arc<tokio::sync::Mutex<()>>>,
}

impl LockRegistry {
    async fn acquire(&self, key: i64, timeout: Duration) -> StoreResult<OwnedMutexGuard<()>> {
        let lock = self.locks.entry(key).or_default().clone();
        tokio::time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout)
    }
}

#[derive(Default)]
struct MemoryState {
    last_id: i64,
    shelves: HashMap<ShelfKey, Vec<ShelfSlot>>,
    products: HashMap<i64, Product>,
    barcodes: HashMap<String, i64>,
    change_logs: Vec<ShelfChangeLog>,
    flags: HashMap<String, ShelfUpdateFlag>,
    requests: BTreeMap<i64, PogRequest>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn raise_flag(&mut self, branch_code: &str, has_update: bool, actor: Option<&str>, at: i64) {
        let flag = self
            .flags
            .entry(branch_code.to_string())
            .or_insert_with(|| ShelfUpdateFlag::clear(branch_code));
        flag.has_update = has_update;
        flag.updated_at = Some(at);
        if actor.is_some() || has_update {
            flag.updated_by = actor.map(str::to_string);
        }
    }
}

struct Inner {
    state: Mutex<MemoryState>,
    shelf_locks: LockRegistry,
    request_locks: LockRegistry,
    lock_timeout: Duration,
}

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(MemoryState::default()),
                shelf_locks: LockRegistry::default(),
                request_locks: LockRegistry::default(),
                lock_timeout,
            }),
        }
    }

    pub fn shared(&self) -> Arc<dyn Store> {
        Arc::new(self.clone())
    }

    /// Load a product master record (the ETL's job in production).
    pub fn seed_product(
        &self,
        code_product: i64,
        barcode: &str,
        name_product: Option<&str>,
        name_brand: Option<&str>,
    ) {
        let mut state = self.inner.state.lock();
        state.barcodes.insert(barcode.to_string(), code_product);
        state.products.insert(
            code_product,
            Product {
                code_product,
                barcode: barcode.to_string(),
                name_product: name_product.map(str::to_string),
                name_brand: name_brand.map(str::to_string),
            },
        );
    }

    /// Append committed slots `(row_no, index, code_product)` to a shelf as-is.
    pub fn seed_slots(&self, branch_code: &str, shelf_code: &str, slots: &[(i32, i32, i64)]) {
        let mut state = self.inner.state.lock();
        let mut seeded = Vec::with_capacity(slots.len());
        for &(row_no, index, code_product) in slots {
            seeded.push(ShelfSlot {
                id: state.next_id(),
                branch_code: branch_code.to_string(),
                shelf_code: shelf_code.to_string(),
                row_no,
                index,
                code_product,
            });
        }
        state
            .shelves
            .entry((branch_code.to_string(), shelf_code.to_string()))
            .or_default()
            .extend(seeded);
    }
}

fn sort_slots(slots: &mut [ShelfSlot]) {
    slots.sort_by_key(|s| (s.row_no, s.index, s.id));
}

fn matches_filter(req: &PogRequest, filter: &PogRequestFilter, with_status: bool) -> bool {
    filter
        .branch_code
        .as_deref()
        .is_none_or(|b| req.draft.branch_code == b)
        && filter.action.is_none_or(|a| req.draft.action == a)
        && (!with_status || filter.status.is_none_or(|s| req.status == s))
}

#[async_trait]
impl SlotStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        Ok(Box::new(MemoryTx {
            inner: self.inner.clone(),
            shelf_guards: HashMap::new(),
            request_guards: HashMap::new(),
            shelves: HashMap::new(),
            logs: Vec::new(),
            flags: Vec::new(),
            statuses: Vec::new(),
        }))
    }

    async fn list_shelf(&self, branch_code: &str, shelf_code: &str) -> StoreResult<Vec<ShelfSlot>> {
        let state = self.inner.state.lock();
        let mut slots = state
            .shelves
            .get(&(branch_code.to_string(), shelf_code.to_string()))
            .cloned()
            .unwrap_or_default();
        sort_slots(&mut slots);
        Ok(slots)
    }
}

#[async_trait]
impl ProductCatalog for MemoryStore {
    async fn find_product_by_barcode(&self, barcode: &str) -> StoreResult<Option<Product>> {
        let state = self.inner.state.lock();
        Ok(state
            .barcodes
            .get(barcode)
            .and_then(|code| state.products.get(code))
            .cloned())
    }

    async fn products_by_codes(&self, codes: &[i64]) -> StoreResult<HashMap<i64, Product>> {
        let state = self.inner.state.lock();
        Ok(codes
            .iter()
            .filter_map(|code| state.products.get(code).map(|p| (*code, p.clone())))
            .collect())
    }
}

#[async_trait]
impl ChangeLogStore for MemoryStore {
    async fn list_change_logs(
        &self,
        branch_code: &str,
        include_acknowledged: bool,
        offset: u64,
        limit: u32,
    ) -> StoreResult<(Vec<ShelfChangeLog>, i64)> {
        let state = self.inner.state.lock();
        let mut logs: Vec<ShelfChangeLog> = state
            .change_logs
            .iter()
            .filter(|l| l.branch_code == branch_code && (include_acknowledged || !l.acknowledged))
            .cloned()
            .collect();
        logs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.shelf_code.cmp(&b.shelf_code))
                .then_with(|| a.id.cmp(&b.id))
        });
        let total = logs.len() as i64;
        let page = logs
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn count_unacknowledged(&self, branch_code: &str) -> StoreResult<i64> {
        let state = self.inner.state.lock();
        Ok(state
            .change_logs
            .iter()
            .filter(|l| l.branch_code == branch_code && !l.acknowledged)
            .count() as i64)
    }

    async fn acknowledge_change_log(&self, id: i64, at: i64) -> StoreResult<bool> {
        let mut state = self.inner.state.lock();
        match state.change_logs.iter_mut().find(|l| l.id == id) {
            Some(log) => {
                if !log.acknowledged {
                    log.acknowledged = true;
                    log.acknowledged_at = Some(at);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn acknowledge_all_change_logs(&self, branch_code: &str, at: i64) -> StoreResult<u64> {
        let mut state = self.inner.state.lock();
        let mut count = 0;
        for log in state
            .change_logs
            .iter_mut()
            .filter(|l| l.branch_code == branch_code && !l.acknowledged)
        {
            log.acknowledged = true;
            log.acknowledged_at = Some(at);
            count += 1;
        }
        state.raise_flag(branch_code, false, None, at);
        Ok(count)
    }

    async fn branch_ack_statuses(&self) -> StoreResult<Vec<BranchAckStatus>> {
        let state = self.inner.state.lock();
        let mut by_branch: BTreeMap<&str, BranchAckStatus> = BTreeMap::new();
        for log in &state.change_logs {
            let entry = by_branch
                .entry(log.branch_code.as_str())
                .or_insert_with(|| BranchAckStatus {
                    branch_code: log.branch_code.clone(),
                    pending: 0,
                    acknowledged: 0,
                    total: 0,
                    last_change_at: None,
                    oldest_pending_at: None,
                    status: BranchAckStatus::state_for(0, 0),
                });
            entry.total += 1;
            entry.last_change_at = entry.last_change_at.max(Some(log.created_at));
            if log.acknowledged {
                entry.acknowledged += 1;
            } else {
                entry.pending += 1;
                entry.oldest_pending_at = Some(
                    entry
                        .oldest_pending_at
                        .map_or(log.created_at, |t| t.min(log.created_at)),
                );
            }
        }
        Ok(by_branch
            .into_values()
            .map(|mut s| {
                s.status = BranchAckStatus::state_for(s.pending, s.total);
                s
            })
            .collect())
    }

    async fn get_update_flag(&self, branch_code: &str) -> StoreResult<Option<ShelfUpdateFlag>> {
        Ok(self.inner.state.lock().flags.get(branch_code).cloned())
    }

    async fn set_update_flag(
        &self,
        branch_code: &str,
        has_update: bool,
        actor: Option<&str>,
        at: i64,
    ) -> StoreResult<ShelfUpdateFlag> {
        let mut state = self.inner.state.lock();
        state.raise_flag(branch_code, has_update, actor, at);
        state
            .flags
            .get(branch_code)
            .cloned()
            .ok_or_else(|| StoreError::Internal("update flag vanished".into()))
    }
}

#[async_trait]
impl PogStore for MemoryStore {
    async fn create_pog_request(&self, draft: &PogDraft, at: i64) -> StoreResult<PogRequest> {
        let mut state = self.inner.state.lock();
        let duplicate = state.requests.values().any(|r| {
            r.status == PogStatus::Pending
                && r.draft.branch_code == draft.branch_code
                && r.draft.barcode == draft.barcode
        });
        if duplicate {
            return Err(StoreError::Conflict(PENDING_CONSTRAINT.into()));
        }
        let request = PogRequest {
            id: state.next_id(),
            draft: draft.clone(),
            status: PogStatus::Pending,
            reviewed_by: None,
            created_at: at,
            updated_at: at,
        };
        state.requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn get_pog_request(&self, id: i64) -> StoreResult<Option<PogRequest>> {
        Ok(self.inner.state.lock().requests.get(&id).cloned())
    }

    async fn get_pog_requests(&self, ids: &[i64]) -> StoreResult<Vec<PogRequest>> {
        let state = self.inner.state.lock();
        let wanted: HashSet<i64> = ids.iter().copied().collect();
        Ok(state
            .requests
            .values()
            .filter(|r| wanted.contains(&r.id))
            .cloned()
            .collect())
    }

    async fn list_pog_requests(&self, filter: &PogRequestFilter) -> StoreResult<Vec<PogRequest>> {
        let state = self.inner.state.lock();
        let mut requests: Vec<PogRequest> = state
            .requests
            .values()
            .filter(|r| matches_filter(r, filter, true))
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        requests.truncate(filter.limit() as usize);
        Ok(requests)
    }

    async fn pog_stats(&self, filter: &PogRequestFilter) -> StoreResult<PogStats> {
        let state = self.inner.state.lock();
        let mut stats = PogStats::default();
        for request in state
            .requests
            .values()
            .filter(|r| matches_filter(r, filter, false))
        {
            stats.add(request.status, 1);
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
        // waits for a unit of work that holds the request, like a row lock
        let _guard = self
            .inner
            .request_locks
            .acquire(id, self.inner.lock_timeout)
            .await?;
        let mut state = self.inner.state.lock();
        match state.requests.get_mut(&id) {
            Some(request) if request.status == PogStatus::Pending => {
                request.status = status;
                if let Some(note) = note {
                    request.draft.note = Some(note.to_string());
                }
                if actor.is_some() {
                    request.reviewed_by = actor.map(str::to_string);
                }
                request.updated_at = at;
                Ok(Some(request.clone()))
            }
            _ => Ok(None),
        }
    }
}

/// Unit of work over [`MemoryStore`].
pub struct MemoryTx {
    inner: Arc<Inner>,
    shelf_guards: HashMap<LockKey, OwnedMutexGuard<()>>,
    request_guards: HashMap<i64, OwnedMutexGuard<()>>,
    /// Private copies of every shelf read or written so far
    shelves: HashMap<ShelfKey, Vec<ShelfSlot>>,
    logs: Vec<NewChangeLog>,
    flags: Vec<(String, Option<String>, i64)>,
    statuses: Vec<(i64, PogStatus, Option<String>, Option<String>, i64)>,
}

impl MemoryTx {
    fn shelf(&mut self, branch_code: &str, shelf_code: &str) -> &mut Vec<ShelfSlot> {
        let inner = &self.inner;
        self.shelves
            .entry((branch_code.to_string(), shelf_code.to_string()))
            .or_insert_with_key(|key| inner.state.lock().shelves.get(key).cloned().unwrap_or_default())
    }

    fn row_mut<'a>(
        slots: &'a mut [ShelfSlot],
        row_no: i32,
    ) -> impl Iterator<Item = &'a mut ShelfSlot> + 'a {
        slots.iter_mut().filter(move |s| s.row_no == row_no)
    }
}

#[async_trait]
impl ShelfLock for MemoryTx {
    async fn acquire(&mut self, key: LockKey) -> StoreResult<()> {
        if self.shelf_guards.contains_key(&key) {
            return Ok(());
        }
        let guard = self
            .inner
            .shelf_locks
            .acquire(key.value(), self.inner.lock_timeout)
            .await?;
        self.shelf_guards.insert(key, guard);
        Ok(())
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn list_row(&mut self, row: &RowRef) -> StoreResult<Vec<ShelfSlot>> {
        let mut slots: Vec<ShelfSlot> = self
            .shelf(&row.branch_code, &row.shelf_code)
            .iter()
            .filter(|s| s.row_no == row.row_no)
            .cloned()
            .collect();
        sort_slots(&mut slots);
        Ok(slots)
    }

    async fn list_shelf(
        &mut self,
        branch_code: &str,
        shelf_code: &str,
    ) -> StoreResult<Vec<ShelfSlot>> {
        let mut slots = self.shelf(branch_code, shelf_code).clone();
        sort_slots(&mut slots);
        Ok(slots)
    }

    async fn delete_slot_at(&mut self, coord: &SlotCoord) -> StoreResult<Option<ShelfSlot>> {
        let slots = self.shelf(&coord.row.branch_code, &coord.row.shelf_code);
        let found = slots
            .iter()
            .position(|s| s.row_no == coord.row.row_no && s.index == coord.index);
        Ok(found.map(|pos| slots.remove(pos)))
    }

    async fn delete_slot_by_product(
        &mut self,
        row: &RowRef,
        code_product: i64,
        index_hint: Option<i32>,
    ) -> StoreResult<Option<ShelfSlot>> {
        let slots = self.shelf(&row.branch_code, &row.shelf_code);
        let found = slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.row_no == row.row_no && s.code_product == code_product)
            .min_by_key(|(_, s)| (Some(s.index) != index_hint, s.index, s.id))
            .map(|(pos, _)| pos);
        Ok(found.map(|pos| slots.remove(pos)))
    }

    async fn delete_shelf(&mut self, branch_code: &str, shelf_code: &str) -> StoreResult<u64> {
        let slots = self.shelf(branch_code, shelf_code);
        let count = slots.len() as u64;
        slots.clear();
        Ok(count)
    }

    async fn insert_slot(&mut self, slot: &NewSlot) -> StoreResult<i64> {
        let id = self.inner.state.lock().next_id();
        self.shelf(&slot.row.branch_code, &slot.row.shelf_code)
            .push(ShelfSlot {
                id,
                branch_code: slot.row.branch_code.clone(),
                shelf_code: slot.row.shelf_code.clone(),
                row_no: slot.row.row_no,
                index: slot.index,
                code_product: slot.code_product,
            });
        Ok(id)
    }

    async fn shift_right(&mut self, row: &RowRef, from_index: i32) -> StoreResult<u64> {
        let slots = self.shelf(&row.branch_code, &row.shelf_code);
        let mut count = 0;
        for slot in Self::row_mut(slots, row.row_no).filter(|s| s.index >= from_index) {
            slot.index += 1;
            count += 1;
        }
        Ok(count)
    }

    async fn reindex_row(&mut self, row: &RowRef) -> StoreResult<Vec<ShelfSlot>> {
        let slots = self.shelf(&row.branch_code, &row.shelf_code);
        let mut ordered: Vec<(i32, i64)> = slots
            .iter()
            .filter(|s| s.row_no == row.row_no)
            .map(|s| (s.index, s.id))
            .collect();
        ordered.sort_unstable();
        let positions: HashMap<i64, i32> = ordered
            .iter()
            .enumerate()
            .map(|(pos, &(_, id))| (id, pos as i32 + 1))
            .collect();
        for slot in Self::row_mut(slots, row.row_no) {
            if let Some(&index) = positions.get(&slot.id) {
                slot.index = index;
            }
        }
        self.list_row(row).await
    }

    async fn set_product_at(
        &mut self,
        coord: &SlotCoord,
        code_product: i64,
    ) -> StoreResult<Option<i64>> {
        let slots = self.shelf(&coord.row.branch_code, &coord.row.shelf_code);
        Ok(Self::row_mut(slots, coord.row.row_no)
            .find(|s| s.index == coord.index)
            .map(|slot| std::mem::replace(&mut slot.code_product, code_product)))
    }

    async fn insert_change_logs(&mut self, entries: &[NewChangeLog]) -> StoreResult<u64> {
        self.logs.extend_from_slice(entries);
        Ok(entries.len() as u64)
    }

    async fn mark_branch_updated(
        &mut self,
        branch_code: &str,
        actor: Option<&str>,
        at: i64,
    ) -> StoreResult<()> {
        self.flags
            .push((branch_code.to_string(), actor.map(str::to_string), at));
        Ok(())
    }

    async fn lock_pog_request(&mut self, id: i64) -> StoreResult<Option<PogRequest>> {
        if !self.request_guards.contains_key(&id) {
            let guard = self
                .inner
                .request_locks
                .acquire(id, self.inner.lock_timeout)
                .await?;
            self.request_guards.insert(id, guard);
        }
        Ok(self.inner.state.lock().requests.get(&id).cloned())
    }

    async fn set_pog_status(
        &mut self,
        id: i64,
        status: PogStatus,
        note: Option<&str>,
        actor: Option<&str>,
        at: i64,
    ) -> StoreResult<()> {
        self.statuses.push((
            id,
            status,
            note.map(str::to_string),
            actor.map(str::to_string),
            at,
        ));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx {
            inner,
            shelf_guards,
            request_guards,
            shelves,
            logs,
            flags,
            statuses,
        } = *self;

        for ((branch_code, shelf_code), slots) in &shelves {
            let mut seen = HashSet::new();
            for slot in slots {
                if slot.index < 1 || !seen.insert((slot.row_no, slot.index)) {
                    return Err(StoreError::Conflict(format!(
                        "slot position {branch_code}/{shelf_code} row {} index {}",
                        slot.row_no, slot.index
                    )));
                }
            }
        }

        {
            let mut state = inner.state.lock();
            for (key, slots) in shelves {
                if slots.is_empty() {
                    state.shelves.remove(&key);
                } else {
                    state.shelves.insert(key, slots);
                }
            }
            for entry in logs {
                let id = state.next_id();
                state.change_logs.push(ShelfChangeLog {
                    id,
                    branch_code: entry.branch_code,
                    shelf_code: entry.shelf_code,
                    update_id: entry.update_id,
                    action: entry.action,
                    code_product: entry.code_product,
                    product_name: entry.product_name,
                    from_row: entry.from_row,
                    from_index: entry.from_index,
                    to_row: entry.to_row,
                    to_index: entry.to_index,
                    created_at: entry.created_at,
                    created_by: entry.created_by,
                    acknowledged: false,
                    acknowledged_at: None,
                });
            }
            for (branch_code, actor, at) in flags {
                state.raise_flag(&branch_code, true, actor.as_deref(), at);
            }
            for (id, status, note, actor, at) in statuses {
                if let Some(request) = state.requests.get_mut(&id) {
                    request.status = status;
                    if note.is_some() {
                        request.draft.note = note;
                    }
                    if actor.is_some() {
                        request.reviewed_by = actor;
                    }
                    request.updated_at = at;
                }
            }
        }

        // locks are released only after the new state is visible
        drop(shelf_guards);
        drop(request_guards);
        Ok(())
    }
}
