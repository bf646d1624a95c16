use std::sync::Arc;

use crate::catalog::{Schema, TableInfo};
use crate::common::types::Rid;
use crate::query::executor::result::{QueryError, QueryResult, Tuple};
use crate::query::executor::{Executor, ExecutorContext};
use crate::storage::table::TableIterator;
use crate::transaction::{IsolationLevel, LockMode};

/// Sequential scan over a table heap. Tombstoned tuples are skipped.
///
/// Locking discipline: the plain read path takes IS on the table and S per
/// row (none under read-uncommitted); read-committed drops each row S right
/// after the read and the table IS at end of scan. When the pipeline feeds
/// a delete, the scan takes IX on the table and X per row and keeps them.
pub struct SeqScanExecutor {
    ctx: Arc<ExecutorContext>,
    table: Arc<TableInfo>,
    iter: Option<TableIterator>,
    finished: bool,
}

impl SeqScanExecutor {
    pub fn new(ctx: Arc<ExecutorContext>, table_oid: u32) -> QueryResult<Self> {
        let table = ctx
            .catalog
            .get_table(table_oid)
            .ok_or_else(|| QueryError::TableNotFound(table_oid.to_string()))?;
        Ok(Self {
            ctx,
            table,
            iter: None,
            finished: false,
        })
    }

    fn lock_table(&self) -> QueryResult<()> {
        let txn = &self.ctx.txn;
        let oid = self.table.oid;
        if self.ctx.is_delete {
            let already_covered = txn.holds_table_lock(LockMode::IntentionExclusive, oid)
                || txn.holds_table_lock(LockMode::SharedIntentionExclusive, oid)
                || txn.holds_table_lock(LockMode::Exclusive, oid);
            if !already_covered
                && !self
                    .ctx
                    .lock_manager
                    .lock_table(txn, LockMode::IntentionExclusive, oid)?
            {
                return Err(QueryError::LockFailed(txn.id()));
            }
        } else if txn.isolation_level() != IsolationLevel::ReadUncommitted {
            let already_covered = txn.holds_table_lock(LockMode::IntentionShared, oid)
                || txn.holds_table_lock(LockMode::IntentionExclusive, oid)
                || txn.holds_table_lock(LockMode::Shared, oid)
                || txn.holds_table_lock(LockMode::SharedIntentionExclusive, oid)
                || txn.holds_table_lock(LockMode::Exclusive, oid);
            if !already_covered
                && !self
                    .ctx
                    .lock_manager
                    .lock_table(txn, LockMode::IntentionShared, oid)?
            {
                return Err(QueryError::LockFailed(txn.id()));
            }
        }
        Ok(())
    }

    /// Take the per-row lock the discipline calls for. Returns whether this
    /// call acquired a lock (as opposed to riding an existing one).
    fn lock_row(&self, rid: Rid) -> QueryResult<bool> {
        let txn = &self.ctx.txn;
        let oid = self.table.oid;
        if self.ctx.is_delete {
            if txn.holds_row_lock(LockMode::Exclusive, oid, rid) {
                return Ok(false);
            }
            if !self
                .ctx
                .lock_manager
                .lock_row(txn, LockMode::Exclusive, oid, rid)?
            {
                return Err(QueryError::LockFailed(txn.id()));
            }
            return Ok(true);
        }
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            return Ok(false);
        }
        if txn.holds_row_lock(LockMode::Exclusive, oid, rid)
            || txn.holds_row_lock(LockMode::Shared, oid, rid)
        {
            return Ok(false);
        }
        if !self
            .ctx
            .lock_manager
            .lock_row(txn, LockMode::Shared, oid, rid)?
        {
            return Err(QueryError::LockFailed(txn.id()));
        }
        Ok(true)
    }
}

impl Executor for SeqScanExecutor {
    fn init(&mut self) -> QueryResult<()> {
        self.lock_table()?;
        self.iter = Some(self.table.heap.iter());
        self.finished = false;
        Ok(())
    }

    fn next(&mut self) -> QueryResult<Option<(Tuple, Rid)>> {
        if self.finished {
            return Ok(None);
        }
        if self.iter.is_none() {
            self.init()?;
        }
        let txn = self.ctx.txn.clone();
        let oid = self.table.oid;

        loop {
            let Some(iter) = self.iter.as_mut() else {
                return Ok(None);
            };
            let Some((rid, _, _)) = iter.next() else {
                break;
            };

            let locked_now = self.lock_row(rid)?;

            // Re-read under the lock so the visible state is current
            let (meta, tuple) = self.table.heap.get_tuple(rid)?;
            if meta.is_deleted {
                if locked_now {
                    self.ctx.lock_manager.unlock_row(&txn, oid, rid, true)?;
                }
                continue;
            }

            if !self.ctx.is_delete
                && locked_now
                && txn.isolation_level() == IsolationLevel::ReadCommitted
            {
                // Read committed holds the row lock only across the read
                self.ctx.lock_manager.unlock_row(&txn, oid, rid, false)?;
            }

            return Ok(Some((tuple, rid)));
        }

        self.finished = true;
        if !self.ctx.is_delete
            && txn.isolation_level() == IsolationLevel::ReadCommitted
            && txn.holds_table_lock(LockMode::IntentionShared, oid)
        {
            self.ctx.lock_manager.unlock_table(&txn, oid)?;
        }
        Ok(None)
    }

    fn output_schema(&self) -> &Schema {
        &self.table.schema
    }
}
