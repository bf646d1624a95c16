use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use log::debug;
use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::storage::table::TupleMeta;
use crate::transaction::lock_manager::LockManager;
use crate::transaction::transaction::{
    IsolationLevel, Transaction, TransactionState, WriteRecordType,
};

/// Issues transaction ids, tracks live transactions, and drives
/// commit/abort. Abort walks the write log backwards, undoing inserts by
/// tombstoning and deletes by resurrecting.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    active: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    /// Create the manager and start the lock manager's deadlock detector
    /// against it. The detector holds a weak reference and dies with the
    /// manager.
    pub fn new(lock_manager: Arc<LockManager>) -> Arc<Self> {
        let manager = Arc::new(Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager: lock_manager.clone(),
            active: Mutex::new(HashMap::new()),
        });
        lock_manager.start_deadlock_detection(Arc::downgrade(&manager));
        manager
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    /// Begin a new transaction at the given isolation level
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active.lock().insert(txn_id, txn.clone());
        txn
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active.lock().get(&txn_id).cloned()
    }

    /// Commit: release every lock and retire the transaction
    pub fn commit(&self, txn: &Arc<Transaction>) {
        txn.take_write_set();
        self.lock_manager.unlock_all(txn);
        txn.set_state(TransactionState::Committed);
        self.active.lock().remove(&txn.id());
        debug!("txn {} committed", txn.id());
    }

    /// Abort: undo the write log in reverse, then release every lock
    pub fn abort(&self, txn: &Arc<Transaction>) {
        let write_set = txn.take_write_set();
        for record in write_set.into_iter().rev() {
            let undone = match record.wtype {
                WriteRecordType::Insert => record
                    .heap
                    .update_tuple_meta(TupleMeta { is_deleted: true }, record.rid),
                WriteRecordType::Delete => record
                    .heap
                    .update_tuple_meta(TupleMeta { is_deleted: false }, record.rid),
            };
            if let Err(e) = undone {
                debug!("rollback of txn {} skipped a record: {}", txn.id(), e);
            }
        }
        self.lock_manager.unlock_all(txn);
        txn.set_state(TransactionState::Aborted);
        self.active.lock().remove(&txn.id());
        debug!("txn {} aborted", txn.id());
    }
}
