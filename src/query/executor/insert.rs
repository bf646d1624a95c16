use std::sync::Arc;

use crate::catalog::{Column, DataType, IndexInfo, Schema, TableInfo};
use crate::common::types::{Rid, TableOid, INVALID_PAGE_ID};
use crate::query::executor::result::{DataValue, QueryError, QueryResult, Tuple};
use crate::query::executor::{Executor, ExecutorContext};
use crate::storage::table::TupleMeta;
use crate::transaction::{LockMode, WriteRecord, WriteRecordType};

/// Insert every child tuple into the table heap and all of its indexes,
/// then emit a single `(count)` tuple. Takes IX on the table up front and
/// X on each new row; both are held to commit.
pub struct InsertExecutor {
    ctx: Arc<ExecutorContext>,
    table: Arc<TableInfo>,
    indexes: Vec<Arc<IndexInfo>>,
    child: Box<dyn Executor>,
    schema: Schema,
    done: bool,
}

impl InsertExecutor {
    pub fn new(
        ctx: Arc<ExecutorContext>,
        table_oid: TableOid,
        child: Box<dyn Executor>,
    ) -> QueryResult<Self> {
        let table = ctx
            .catalog
            .get_table(table_oid)
            .ok_or_else(|| QueryError::TableNotFound(table_oid.to_string()))?;
        let indexes = ctx.catalog.get_table_indexes(&table.name);
        Ok(Self {
            ctx,
            table,
            indexes,
            child,
            schema: count_schema(),
            done: false,
        })
    }
}

impl Executor for InsertExecutor {
    fn init(&mut self) -> QueryResult<()> {
        self.child.init()?;
        let txn = &self.ctx.txn;
        let oid = self.table.oid;
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
        self.done = false;
        Ok(())
    }

    fn next(&mut self) -> QueryResult<Option<(Tuple, Rid)>> {
        if self.done {
            return Ok(None);
        }

        let mut count: i64 = 0;
        while let Some((tuple, _)) = self.child.next()? {
            let rid = self.table.heap.insert_tuple(TupleMeta::live(), &tuple)?;
            if !self
                .ctx
                .lock_manager
                .lock_row(&self.ctx.txn, LockMode::Exclusive, self.table.oid, rid)?
            {
                return Err(QueryError::LockFailed(self.ctx.txn.id()));
            }
            self.ctx.txn.append_write_record(WriteRecord {
                oid: self.table.oid,
                rid,
                wtype: WriteRecordType::Insert,
                heap: self.table.heap.clone(),
            });

            for index in &self.indexes {
                let key = index.key_of(&tuple).ok_or_else(|| {
                    QueryError::TypeMismatch(format!(
                        "index {} expects an integer key column",
                        index.name
                    ))
                })?;
                index.index.insert(key, rid)?;
            }
            count += 1;
        }

        self.done = true;
        Ok(Some((
            Tuple::new(vec![DataValue::Integer(count)]),
            Rid::new(INVALID_PAGE_ID, 0),
        )))
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }
}

pub(crate) fn count_schema() -> Schema {
    Schema::new(vec![Column::new("count", DataType::Integer)])
}
