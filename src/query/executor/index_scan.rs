use std::sync::Arc;

use crate::catalog::{IndexInfo, IndexOid, Schema, TableInfo};
use crate::common::types::Rid;
use crate::index::btree::BTreeIterator;
use crate::query::executor::result::{QueryError, QueryResult, Tuple};
use crate::query::executor::{Executor, ExecutorContext};

/// Scan a B+Tree index in key order, dereferencing each rid into the table
/// heap. Tombstoned tuples are skipped.
pub struct IndexScanExecutor {
    index_info: Arc<IndexInfo>,
    table: Arc<TableInfo>,
    iter: Option<BTreeIterator<i64>>,
}

impl IndexScanExecutor {
    pub fn new(ctx: Arc<ExecutorContext>, index_oid: IndexOid) -> QueryResult<Self> {
        let index_info = ctx
            .catalog
            .get_index(index_oid)
            .ok_or_else(|| QueryError::IndexNotFound(index_oid.to_string()))?;
        let table = ctx
            .catalog
            .get_table_by_name(&index_info.table_name)
            .ok_or_else(|| QueryError::TableNotFound(index_info.table_name.clone()))?;
        Ok(Self {
            index_info,
            table,
            iter: None,
        })
    }
}

impl Executor for IndexScanExecutor {
    fn init(&mut self) -> QueryResult<()> {
        self.iter = Some(self.index_info.index.iter()?);
        Ok(())
    }

    fn next(&mut self) -> QueryResult<Option<(Tuple, Rid)>> {
        if self.iter.is_none() {
            self.init()?;
        }
        loop {
            let Some(iter) = self.iter.as_mut() else {
                return Ok(None);
            };
            let Some((_, rid)) = iter.next() else {
                return Ok(None);
            };
            let (meta, tuple) = self.table.heap.get_tuple(rid)?;
            if meta.is_deleted {
                continue;
            }
            return Ok(Some((tuple, rid)));
        }
    }

    fn output_schema(&self) -> &Schema {
        &self.table.schema
    }
}
