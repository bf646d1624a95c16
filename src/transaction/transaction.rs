use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Rid, TableOid, TxnId};
use crate::storage::table::TableHeap;
use crate::transaction::lock_manager::LockMode;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Transaction states under strict two-phase locking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// The reason a lock-protocol violation aborted a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockOnShrinking,
    LockSharedOnReadUncommitted,
    UpgradeConflict,
    IncompatibleUpgrade,
    TableLockNotPresent,
    TableUnlockedBeforeUnlockingRows,
    AttemptedUnlockButNoLockHeld,
    AttemptedIntentionLockOnRow,
}

/// Raised by the lock manager after flipping the transaction to `Aborted`
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("transaction {txn_id} aborted: {reason:?}")]
pub struct TransactionAbort {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

/// What a write record undoes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteRecordType {
    Insert,
    Delete,
}

/// One undo entry in a transaction's write log. Carries the heap so that
/// rollback does not need to consult the catalog.
#[derive(Clone)]
pub struct WriteRecord {
    pub oid: TableOid,
    pub rid: Rid,
    pub wtype: WriteRecordType,
    pub heap: Arc<TableHeap>,
}

/// An active database transaction. All bookkeeping is interior-mutable:
/// the lock manager mutates the lock sets under its queue latches, and the
/// deadlock detector flips the state from its own thread.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,

    s_table_lock_set: Mutex<HashSet<TableOid>>,
    x_table_lock_set: Mutex<HashSet<TableOid>>,
    is_table_lock_set: Mutex<HashSet<TableOid>>,
    ix_table_lock_set: Mutex<HashSet<TableOid>>,
    six_table_lock_set: Mutex<HashSet<TableOid>>,

    s_row_lock_set: Mutex<HashMap<TableOid, HashSet<Rid>>>,
    x_row_lock_set: Mutex<HashMap<TableOid, HashSet<Rid>>>,

    write_set: Mutex<Vec<WriteRecord>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: Mutex::new(TransactionState::Growing),
            s_table_lock_set: Mutex::new(HashSet::new()),
            x_table_lock_set: Mutex::new(HashSet::new()),
            is_table_lock_set: Mutex::new(HashSet::new()),
            ix_table_lock_set: Mutex::new(HashSet::new()),
            six_table_lock_set: Mutex::new(HashSet::new()),
            s_row_lock_set: Mutex::new(HashMap::new()),
            x_row_lock_set: Mutex::new(HashMap::new()),
            write_set: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    /// The table-lock set for the given mode
    pub fn table_lock_set(&self, mode: LockMode) -> &Mutex<HashSet<TableOid>> {
        match mode {
            LockMode::Shared => &self.s_table_lock_set,
            LockMode::Exclusive => &self.x_table_lock_set,
            LockMode::IntentionShared => &self.is_table_lock_set,
            LockMode::IntentionExclusive => &self.ix_table_lock_set,
            LockMode::SharedIntentionExclusive => &self.six_table_lock_set,
        }
    }

    /// The row-lock set for the given mode; only S and X rows exist
    pub fn row_lock_set(&self, mode: LockMode) -> &Mutex<HashMap<TableOid, HashSet<Rid>>> {
        match mode {
            LockMode::Exclusive => &self.x_row_lock_set,
            _ => &self.s_row_lock_set,
        }
    }

    pub fn holds_table_lock(&self, mode: LockMode, oid: TableOid) -> bool {
        self.table_lock_set(mode).lock().contains(&oid)
    }

    pub fn holds_row_lock(&self, mode: LockMode, oid: TableOid, rid: Rid) -> bool {
        self.row_lock_set(mode)
            .lock()
            .get(&oid)
            .map_or(false, |rids| rids.contains(&rid))
    }

    /// True if the transaction still holds any row lock under this table
    pub fn holds_rows_in_table(&self, oid: TableOid) -> bool {
        let holds = |set: &Mutex<HashMap<TableOid, HashSet<Rid>>>| {
            set.lock().get(&oid).map_or(false, |rids| !rids.is_empty())
        };
        holds(&self.s_row_lock_set) || holds(&self.x_row_lock_set)
    }

    /// Snapshot of every table lock held, as (mode, oid) pairs
    pub fn held_table_locks(&self) -> Vec<(LockMode, TableOid)> {
        let mut held = Vec::new();
        for mode in [
            LockMode::IntentionShared,
            LockMode::IntentionExclusive,
            LockMode::Shared,
            LockMode::SharedIntentionExclusive,
            LockMode::Exclusive,
        ] {
            for &oid in self.table_lock_set(mode).lock().iter() {
                held.push((mode, oid));
            }
        }
        held
    }

    /// Snapshot of every row lock held, as (mode, oid, rid) triples
    pub fn held_row_locks(&self) -> Vec<(LockMode, TableOid, Rid)> {
        let mut held = Vec::new();
        for mode in [LockMode::Shared, LockMode::Exclusive] {
            for (&oid, rids) in self.row_lock_set(mode).lock().iter() {
                for &rid in rids {
                    held.push((mode, oid, rid));
                }
            }
        }
        held
    }

    pub fn append_write_record(&self, record: WriteRecord) {
        self.write_set.lock().push(record);
    }

    /// Drain the write log for rollback (newest first is the caller's job)
    pub fn take_write_set(&self) -> Vec<WriteRecord> {
        std::mem::take(&mut self.write_set.lock())
    }
}
