use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use log::{debug, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::common::config::CYCLE_DETECTION_INTERVAL;
use crate::common::types::{Rid, TableOid, TxnId, INVALID_TXN_ID};
use crate::transaction::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionAbort, TransactionState,
};
use crate::transaction::transaction_manager::TransactionManager;

/// Multi-granularity lock modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

impl LockMode {
    /// Standard hierarchical compatibility matrix: `held` vs `requested`
    pub fn compatible(held: LockMode, requested: LockMode) -> bool {
        use LockMode::*;
        match held {
            IntentionShared => requested != Exclusive,
            IntentionExclusive => matches!(requested, IntentionShared | IntentionExclusive),
            Shared => matches!(requested, IntentionShared | Shared),
            SharedIntentionExclusive => requested == IntentionShared,
            Exclusive => false,
        }
    }

    /// Allowed upgrade transitions
    pub fn can_upgrade(from: LockMode, to: LockMode) -> bool {
        use LockMode::*;
        match from {
            IntentionShared => to != IntentionShared,
            Shared => matches!(to, Exclusive | SharedIntentionExclusive),
            IntentionExclusive => matches!(to, Exclusive | SharedIntentionExclusive),
            SharedIntentionExclusive => to == Exclusive,
            Exclusive => false,
        }
    }

    fn is_shared_class(self) -> bool {
        matches!(
            self,
            LockMode::Shared | LockMode::IntentionShared | LockMode::SharedIntentionExclusive
        )
    }

    fn is_exclusive_class(self) -> bool {
        matches!(
            self,
            LockMode::Exclusive | LockMode::IntentionExclusive | LockMode::SharedIntentionExclusive
        )
    }
}

/// One entry in a resource's request queue
#[derive(Debug, Clone)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

/// Queue body guarded by the per-queue latch. Granted requests form a
/// mutually compatible prefix; waiters follow in FIFO order, except that an
/// upgrading transaction sits at the first waiter position.
struct RequestQueueState {
    requests: Vec<LockRequest>,
    upgrading: TxnId,
}

struct LockRequestQueue {
    state: Mutex<RequestQueueState>,
    cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(RequestQueueState {
                requests: Vec::new(),
                upgrading: INVALID_TXN_ID,
            }),
            cv: Condvar::new(),
        }
    }
}

/// Hierarchical table/row lock manager with strict 2PL enforcement and a
/// background wait-for-graph deadlock detector.
///
/// Mutex order: lock-map mutex, then a queue's latch, never the reverse;
/// the map mutexes are always released before waiting on a queue.
pub struct LockManager {
    table_lock_map: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    row_lock_map: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
    detection_enabled: Arc<AtomicBool>,
    detector: Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
            detection_enabled: Arc::new(AtomicBool::new(false)),
            detector: Mutex::new(None),
        }
    }

    /// Acquire (or upgrade to) a table lock. Blocks until granted; returns
    /// `Ok(false)` if the transaction was aborted by the deadlock detector
    /// while waiting.
    pub fn lock_table(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<bool, TransactionAbort> {
        self.isolation_check(txn, mode)?;
        let queue = self.table_queue(oid);
        let mut state = queue.state.lock();

        let mut is_upgrade = false;
        if let Some(existing) = state
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted)
        {
            let held_mode = state.requests[existing].mode;
            if held_mode == mode {
                return Ok(true);
            }
            if state.upgrading != INVALID_TXN_ID {
                return Err(Self::abort(txn, AbortReason::UpgradeConflict));
            }
            if !LockMode::can_upgrade(held_mode, mode) {
                return Err(Self::abort(txn, AbortReason::IncompatibleUpgrade));
            }
            state.upgrading = txn.id();
            state.requests.remove(existing);
            txn.table_lock_set(held_mode).lock().remove(&oid);

            let first_waiter = state
                .requests
                .iter()
                .position(|r| !r.granted)
                .unwrap_or(state.requests.len());
            state.requests.insert(
                first_waiter,
                LockRequest {
                    txn_id: txn.id(),
                    mode,
                    granted: false,
                },
            );
            is_upgrade = true;
        } else {
            state.requests.push(LockRequest {
                txn_id: txn.id(),
                mode,
                granted: false,
            });
        }

        if !self.wait_until_grantable(&queue, &mut state, txn, mode, is_upgrade) {
            return Ok(false);
        }

        txn.table_lock_set(mode).lock().insert(oid);
        if is_upgrade {
            state.upgrading = INVALID_TXN_ID;
        }
        queue.cv.notify_all();
        Ok(true)
    }

    /// Release a table lock, applying the 2PL state transition
    pub fn unlock_table(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
    ) -> Result<bool, TransactionAbort> {
        let queue = self.table_queue(oid);
        let mut state = queue.state.lock();

        let position = state
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted);
        let Some(position) = position else {
            return Err(Self::abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        if txn.holds_rows_in_table(oid) {
            return Err(Self::abort(
                txn,
                AbortReason::TableUnlockedBeforeUnlockingRows,
            ));
        }

        let mode = state.requests[position].mode;
        Self::apply_unlock_transition(txn, mode);

        txn.table_lock_set(mode).lock().remove(&oid);
        state.requests.remove(position);
        queue.cv.notify_all();
        Ok(true)
    }

    /// Acquire (or upgrade to) a row lock. Row locks are S or X only and
    /// require an appropriate lock on the owning table.
    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> Result<bool, TransactionAbort> {
        if matches!(
            mode,
            LockMode::IntentionShared | LockMode::IntentionExclusive | LockMode::SharedIntentionExclusive
        ) {
            return Err(Self::abort(txn, AbortReason::AttemptedIntentionLockOnRow));
        }
        self.isolation_check(txn, mode)?;
        self.check_table_lock_present(txn, oid, mode)?;

        let queue = self.row_queue(rid);
        let mut state = queue.state.lock();

        let mut is_upgrade = false;
        if let Some(existing) = state
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted)
        {
            let held_mode = state.requests[existing].mode;
            if held_mode == mode {
                return Ok(true);
            }
            if state.upgrading != INVALID_TXN_ID {
                return Err(Self::abort(txn, AbortReason::UpgradeConflict));
            }
            if !LockMode::can_upgrade(held_mode, mode) {
                return Err(Self::abort(txn, AbortReason::IncompatibleUpgrade));
            }
            state.upgrading = txn.id();
            state.requests.remove(existing);
            if let Some(rids) = txn.row_lock_set(held_mode).lock().get_mut(&oid) {
                rids.remove(&rid);
            }

            let first_waiter = state
                .requests
                .iter()
                .position(|r| !r.granted)
                .unwrap_or(state.requests.len());
            state.requests.insert(
                first_waiter,
                LockRequest {
                    txn_id: txn.id(),
                    mode,
                    granted: false,
                },
            );
            is_upgrade = true;
        } else {
            state.requests.push(LockRequest {
                txn_id: txn.id(),
                mode,
                granted: false,
            });
        }

        if !self.wait_until_grantable(&queue, &mut state, txn, mode, is_upgrade) {
            return Ok(false);
        }

        txn.row_lock_set(mode)
            .lock()
            .entry(oid)
            .or_default()
            .insert(rid);
        if is_upgrade {
            state.upgrading = INVALID_TXN_ID;
        }
        queue.cv.notify_all();
        Ok(true)
    }

    /// Release a row lock. With `force` the 2PL state transition is skipped
    /// (used when a scan backs off a tombstoned row).
    pub fn unlock_row(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
        rid: Rid,
        force: bool,
    ) -> Result<bool, TransactionAbort> {
        let queue = self.row_queue(rid);
        let mut state = queue.state.lock();

        let position = state
            .requests
            .iter()
            .position(|r| r.txn_id == txn.id() && r.granted);
        let Some(position) = position else {
            return Err(Self::abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        let mode = state.requests[position].mode;
        if !force {
            Self::apply_unlock_transition(txn, mode);
        }

        if let Some(rids) = txn.row_lock_set(mode).lock().get_mut(&oid) {
            rids.remove(&rid);
        }
        state.requests.remove(position);
        queue.cv.notify_all();
        Ok(true)
    }

    /// Drop every lock the transaction still holds. Called by the
    /// transaction manager at commit/abort; performs no 2PL transitions.
    pub fn unlock_all(&self, txn: &Arc<Transaction>) {
        for (mode, oid, rid) in txn.held_row_locks() {
            let queue = self.row_queue(rid);
            let mut state = queue.state.lock();
            state
                .requests
                .retain(|r| !(r.txn_id == txn.id() && r.granted));
            if let Some(rids) = txn.row_lock_set(mode).lock().get_mut(&oid) {
                rids.remove(&rid);
            }
            queue.cv.notify_all();
        }
        for (mode, oid) in txn.held_table_locks() {
            let queue = self.table_queue(oid);
            let mut state = queue.state.lock();
            state
                .requests
                .retain(|r| !(r.txn_id == txn.id() && r.granted));
            txn.table_lock_set(mode).lock().remove(&oid);
            queue.cv.notify_all();
        }
    }

    /// Spawn the deadlock-detector thread. It holds only a weak reference
    /// to the transaction manager and exits once that is gone.
    pub fn start_deadlock_detection(self: &Arc<Self>, txn_manager: Weak<TransactionManager>) {
        let lock_manager = self.clone();
        let enabled = self.detection_enabled.clone();
        enabled.store(true, Ordering::SeqCst);

        let handle = thread::spawn(move || {
            while enabled.load(Ordering::SeqCst) {
                thread::sleep(CYCLE_DETECTION_INTERVAL);
                let Some(txn_manager) = txn_manager.upgrade() else {
                    break;
                };
                lock_manager.run_detection_pass(&txn_manager);
            }
        });
        *self.detector.lock() = Some(handle);
    }

    /// Stop the detector thread (it also stops on its own when the
    /// transaction manager goes away).
    pub fn stop_deadlock_detection(&self) {
        self.detection_enabled.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector.lock().take() {
            let _ = handle.join();
        }
    }

    fn table_queue(&self, oid: TableOid) -> Arc<LockRequestQueue> {
        let mut map = self.table_lock_map.lock();
        map.entry(oid)
            .or_insert_with(|| Arc::new(LockRequestQueue::new()))
            .clone()
    }

    fn row_queue(&self, rid: Rid) -> Arc<LockRequestQueue> {
        let mut map = self.row_lock_map.lock();
        map.entry(rid)
            .or_insert_with(|| Arc::new(LockRequestQueue::new()))
            .clone()
    }

    /// Block on the queue's condition variable until the transaction's
    /// request can be granted, or until the deadlock detector aborts it.
    /// On abort the request is withdrawn and `false` returned; on grant the
    /// request is marked granted.
    fn wait_until_grantable(
        &self,
        queue: &LockRequestQueue,
        state: &mut MutexGuard<'_, RequestQueueState>,
        txn: &Arc<Transaction>,
        mode: LockMode,
        is_upgrade: bool,
    ) -> bool {
        loop {
            if txn.state() == TransactionState::Aborted {
                state.requests.retain(|r| r.txn_id != txn.id() || r.granted);
                if is_upgrade {
                    state.upgrading = INVALID_TXN_ID;
                }
                queue.cv.notify_all();
                return false;
            }
            if Self::grantable(state, txn.id(), mode, is_upgrade) {
                for request in state.requests.iter_mut() {
                    if request.txn_id == txn.id() && !request.granted {
                        request.granted = true;
                        break;
                    }
                }
                return true;
            }
            queue.cv.wait(state);
        }
    }

    /// A request is grantable when every earlier granted request is
    /// compatible with it and, unless it is an upgrade, no earlier waiter
    /// remains ahead of it.
    fn grantable(state: &RequestQueueState, txn_id: TxnId, mode: LockMode, is_upgrade: bool) -> bool {
        for request in &state.requests {
            if request.txn_id == txn_id && !request.granted {
                break;
            }
            if request.granted {
                if request.txn_id != txn_id && !LockMode::compatible(request.mode, mode) {
                    return false;
                }
            } else if !is_upgrade {
                return false;
            }
        }
        true
    }

    fn isolation_check(&self, txn: &Arc<Transaction>, mode: LockMode) -> Result<(), TransactionAbort> {
        if mode.is_exclusive_class() && txn.state() == TransactionState::Shrinking {
            return Err(Self::abort(txn, AbortReason::LockOnShrinking));
        }
        match txn.isolation_level() {
            IsolationLevel::ReadUncommitted => {
                if mode.is_shared_class() {
                    return Err(Self::abort(txn, AbortReason::LockSharedOnReadUncommitted));
                }
            }
            IsolationLevel::RepeatableRead => {
                if txn.state() == TransactionState::Shrinking {
                    return Err(Self::abort(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadCommitted => {}
        }
        Ok(())
    }

    /// Row locks require a table lock that covers them: S rows need any
    /// table lock, X rows need IX, SIX or X on the table.
    fn check_table_lock_present(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
        row_mode: LockMode,
    ) -> Result<(), TransactionAbort> {
        let allowed: &[LockMode] = if row_mode == LockMode::Exclusive {
            &[
                LockMode::IntentionExclusive,
                LockMode::SharedIntentionExclusive,
                LockMode::Exclusive,
            ]
        } else {
            &[
                LockMode::IntentionShared,
                LockMode::IntentionExclusive,
                LockMode::Shared,
                LockMode::SharedIntentionExclusive,
                LockMode::Exclusive,
            ]
        };
        if allowed.iter().any(|&m| txn.holds_table_lock(m, oid)) {
            Ok(())
        } else {
            Err(Self::abort(txn, AbortReason::TableLockNotPresent))
        }
    }

    /// Unlocking X moves to shrinking under every isolation level;
    /// unlocking S does so only under repeatable read.
    fn apply_unlock_transition(txn: &Arc<Transaction>, mode: LockMode) {
        if txn.state() != TransactionState::Growing {
            return;
        }
        match mode {
            LockMode::Exclusive => txn.set_state(TransactionState::Shrinking),
            LockMode::Shared => {
                if txn.isolation_level() == IsolationLevel::RepeatableRead {
                    txn.set_state(TransactionState::Shrinking);
                }
            }
            _ => {}
        }
    }

    fn abort(txn: &Arc<Transaction>, reason: AbortReason) -> TransactionAbort {
        txn.set_state(TransactionState::Aborted);
        debug!("txn {} aborted: {:?}", txn.id(), reason);
        TransactionAbort {
            txn_id: txn.id(),
            reason,
        }
    }

    /// One detector pass: snapshot all queues into a wait-for graph, then
    /// abort victims until the graph is acyclic.
    fn run_detection_pass(&self, txn_manager: &TransactionManager) {
        let mut wait_for: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();
        let mut waits_table: HashMap<TxnId, Vec<TableOid>> = HashMap::new();
        let mut waits_rid: HashMap<TxnId, Vec<Rid>> = HashMap::new();

        let is_aborted = |txn_id: TxnId| {
            txn_manager
                .get_transaction(txn_id)
                .map_or(true, |t| t.state() == TransactionState::Aborted)
        };

        let table_queues: Vec<(TableOid, Arc<LockRequestQueue>)> = {
            let map = self.table_lock_map.lock();
            map.iter().map(|(oid, q)| (*oid, q.clone())).collect()
        };
        for (oid, queue) in table_queues {
            let state = queue.state.lock();
            let granted: Vec<TxnId> = state
                .requests
                .iter()
                .filter(|r| r.granted && !is_aborted(r.txn_id))
                .map(|r| r.txn_id)
                .collect();
            for request in state.requests.iter().filter(|r| !r.granted) {
                if is_aborted(request.txn_id) {
                    continue;
                }
                for &holder in &granted {
                    wait_for.entry(request.txn_id).or_default().insert(holder);
                }
                waits_table.entry(request.txn_id).or_default().push(oid);
            }
        }

        let row_queues: Vec<(Rid, Arc<LockRequestQueue>)> = {
            let map = self.row_lock_map.lock();
            map.iter().map(|(rid, q)| (*rid, q.clone())).collect()
        };
        for (rid, queue) in row_queues {
            let state = queue.state.lock();
            let granted: Vec<TxnId> = state
                .requests
                .iter()
                .filter(|r| r.granted && !is_aborted(r.txn_id))
                .map(|r| r.txn_id)
                .collect();
            for request in state.requests.iter().filter(|r| !r.granted) {
                if is_aborted(request.txn_id) {
                    continue;
                }
                for &holder in &granted {
                    wait_for.entry(request.txn_id).or_default().insert(holder);
                }
                waits_rid.entry(request.txn_id).or_default().push(rid);
            }
        }

        while let Some(victim) = Self::find_cycle(&wait_for) {
            warn!("deadlock detected, aborting txn {}", victim);
            if let Some(txn) = txn_manager.get_transaction(victim) {
                txn.set_state(TransactionState::Aborted);
            }

            wait_for.remove(&victim);
            for edges in wait_for.values_mut() {
                edges.remove(&victim);
            }

            for oid in waits_table.get(&victim).into_iter().flatten() {
                self.table_queue(*oid).cv.notify_all();
            }
            for rid in waits_rid.get(&victim).into_iter().flatten() {
                self.row_queue(*rid).cv.notify_all();
            }
        }
    }

    /// DFS in ascending txn-id order; the victim is the youngest (highest
    /// id) transaction on the first cycle found.
    fn find_cycle(wait_for: &BTreeMap<TxnId, BTreeSet<TxnId>>) -> Option<TxnId> {
        fn dfs(
            vertex: TxnId,
            wait_for: &BTreeMap<TxnId, BTreeSet<TxnId>>,
            path: &mut Vec<TxnId>,
            on_path: &mut HashSet<TxnId>,
            visited: &mut HashSet<TxnId>,
        ) -> Option<TxnId> {
            if on_path.contains(&vertex) {
                let start = path.iter().position(|&v| v == vertex)?;
                return path[start..].iter().max().copied();
            }
            if visited.contains(&vertex) {
                return None;
            }
            visited.insert(vertex);
            on_path.insert(vertex);
            path.push(vertex);
            if let Some(neighbors) = wait_for.get(&vertex) {
                for &next in neighbors {
                    if let Some(victim) = dfs(next, wait_for, path, on_path, visited) {
                        return Some(victim);
                    }
                }
            }
            path.pop();
            on_path.remove(&vertex);
            None
        }

        let mut visited = HashSet::new();
        for &start in wait_for.keys() {
            let mut path = Vec::new();
            let mut on_path = HashSet::new();
            if let Some(victim) = dfs(start, wait_for, &mut path, &mut on_path, &mut visited) {
                return Some(victim);
            }
        }
        None
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}
