use std::sync::Arc;

use crate::catalog::{IndexInfo, Schema, TableInfo};
use crate::common::types::{Rid, TableOid, INVALID_PAGE_ID};
use crate::query::executor::insert::count_schema;
use crate::query::executor::result::{DataValue, QueryError, QueryResult, Tuple};
use crate::query::executor::{Executor, ExecutorContext};
use crate::storage::table::TupleMeta;
use crate::transaction::{WriteRecord, WriteRecordType};

/// Tombstone every child tuple, remove it from all indexes, and emit a
/// single `(count)` tuple. The child scan runs with the delete locking
/// discipline (IX table, X rows, held to commit).
pub struct DeleteExecutor {
    ctx: Arc<ExecutorContext>,
    table: Arc<TableInfo>,
    indexes: Vec<Arc<IndexInfo>>,
    child: Box<dyn Executor>,
    schema: Schema,
    done: bool,
}

impl DeleteExecutor {
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

impl Executor for DeleteExecutor {
    fn init(&mut self) -> QueryResult<()> {
        self.child.init()?;
        self.done = false;
        Ok(())
    }

    fn next(&mut self) -> QueryResult<Option<(Tuple, Rid)>> {
        if self.done {
            return Ok(None);
        }

        let mut count: i64 = 0;
        while let Some((tuple, rid)) = self.child.next()? {
            self.table
                .heap
                .update_tuple_meta(TupleMeta { is_deleted: true }, rid)?;
            self.ctx.txn.append_write_record(WriteRecord {
                oid: self.table.oid,
                rid,
                wtype: WriteRecordType::Delete,
                heap: self.table.heap.clone(),
            });

            for index in &self.indexes {
                if let Some(key) = index.key_of(&tuple) {
                    index.index.remove(&key)?;
                }
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
