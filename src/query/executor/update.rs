use std::sync::Arc;

use crate::catalog::{IndexInfo, Schema, TableInfo};
use crate::common::types::{Rid, TableOid, INVALID_PAGE_ID};
use crate::query::executor::insert::count_schema;
use crate::query::executor::result::{DataValue, QueryError, QueryResult, Tuple};
use crate::query::executor::{Executor, ExecutorContext};
use crate::query::expression::Expression;
use crate::storage::table::TupleMeta;
use crate::transaction::{WriteRecord, WriteRecordType};

/// Update is modeled as delete-then-insert per row: the old version is
/// tombstoned, the new version appended, and every index is repointed.
pub struct UpdateExecutor {
    ctx: Arc<ExecutorContext>,
    table: Arc<TableInfo>,
    indexes: Vec<Arc<IndexInfo>>,
    target_expressions: Vec<Expression>,
    child: Box<dyn Executor>,
    schema: Schema,
    done: bool,
}

impl UpdateExecutor {
    pub fn new(
        ctx: Arc<ExecutorContext>,
        table_oid: TableOid,
        target_expressions: Vec<Expression>,
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
            target_expressions,
            child,
            schema: count_schema(),
            done: false,
        })
    }
}

impl Executor for UpdateExecutor {
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
        while let Some((old_tuple, old_rid)) = self.child.next()? {
            self.table
                .heap
                .update_tuple_meta(TupleMeta { is_deleted: true }, old_rid)?;
            self.ctx.txn.append_write_record(WriteRecord {
                oid: self.table.oid,
                rid: old_rid,
                wtype: WriteRecordType::Delete,
                heap: self.table.heap.clone(),
            });

            let values = self
                .target_expressions
                .iter()
                .map(|expr| expr.evaluate(&old_tuple))
                .collect::<QueryResult<Vec<DataValue>>>()?;
            let new_tuple = Tuple::new(values);
            let new_rid = self.table.heap.insert_tuple(TupleMeta::live(), &new_tuple)?;
            self.ctx.txn.append_write_record(WriteRecord {
                oid: self.table.oid,
                rid: new_rid,
                wtype: WriteRecordType::Insert,
                heap: self.table.heap.clone(),
            });

            for index in &self.indexes {
                if let Some(old_key) = index.key_of(&old_tuple) {
                    index.index.remove(&old_key)?;
                }
                let new_key = index.key_of(&new_tuple).ok_or_else(|| {
                    QueryError::TypeMismatch(format!(
                        "index {} expects an integer key column",
                        index.name
                    ))
                })?;
                index.index.insert(new_key, new_rid)?;
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
