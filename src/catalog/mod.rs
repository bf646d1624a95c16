// Catalog: name and oid lookup for tables and indexes. The executors use
// it read-only; tables and indexes are registered at setup time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use parking_lot::RwLock;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::common::config::{BTREE_INTERNAL_MAX_SIZE, BTREE_LEAF_MAX_SIZE};
use crate::common::types::TableOid;
use crate::index::btree::{BPlusTree, BTreeError};
use crate::query::executor::result::{DataValue, Tuple};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::table::{TableError, TableHeap};

pub type IndexOid = u32;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Table {0} already exists")]
    DuplicateTable(String),

    #[error("Table {0} not found")]
    TableNotFound(String),

    #[error("Index key column {0} is not an integer column")]
    BadKeyColumn(usize),

    #[error("Table error: {0}")]
    TableError(#[from] TableError),

    #[error("Index error: {0}")]
    BTreeError(#[from] BTreeError),
}

/// Data types supported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Float,
    Text,
    Boolean,
}

/// A column in a table schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    name: String,
    data_type: DataType,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }
}

/// An ordered list of columns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// The concatenation of two schemas, as produced by a join
    pub fn joined(left: &Schema, right: &Schema) -> Schema {
        let mut columns = left.columns.clone();
        columns.extend(right.columns.iter().cloned());
        Schema::new(columns)
    }
}

/// Everything the executors need to know about a table
pub struct TableInfo {
    pub oid: TableOid,
    pub name: String,
    pub schema: Schema,
    pub heap: Arc<TableHeap>,
}

/// Everything the executors need to know about an index. Keys are drawn
/// from a single integer column of the base table.
pub struct IndexInfo {
    pub oid: IndexOid,
    pub name: String,
    pub table_name: String,
    pub key_attrs: Vec<usize>,
    pub index: Arc<BPlusTree<i64>>,
}

impl IndexInfo {
    /// Extract this index's key from a base-table tuple
    pub fn key_of(&self, tuple: &Tuple) -> Option<i64> {
        match tuple.values.get(self.key_attrs[0]) {
            Some(DataValue::Integer(v)) => Some(*v),
            _ => None,
        }
    }
}

pub struct Catalog {
    bpm: Arc<BufferPoolManager>,
    tables: RwLock<HashMap<TableOid, Arc<TableInfo>>>,
    table_names: RwLock<HashMap<String, TableOid>>,
    indexes: RwLock<HashMap<IndexOid, Arc<IndexInfo>>>,
    table_indexes: RwLock<HashMap<String, Vec<IndexOid>>>,
    next_oid: AtomicU32,
}

impl Catalog {
    pub fn new(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            tables: RwLock::new(HashMap::new()),
            table_names: RwLock::new(HashMap::new()),
            indexes: RwLock::new(HashMap::new()),
            table_indexes: RwLock::new(HashMap::new()),
            next_oid: AtomicU32::new(1),
        }
    }

    pub fn create_table(
        &self,
        name: impl Into<String>,
        schema: Schema,
    ) -> Result<Arc<TableInfo>, CatalogError> {
        let name = name.into();
        if self.table_names.read().contains_key(&name) {
            return Err(CatalogError::DuplicateTable(name));
        }

        let heap = Arc::new(TableHeap::new(self.bpm.clone())?);
        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);
        let info = Arc::new(TableInfo {
            oid,
            name: name.clone(),
            schema,
            heap,
        });

        self.tables.write().insert(oid, info.clone());
        self.table_names.write().insert(name.clone(), oid);
        self.table_indexes.write().entry(name).or_default();
        Ok(info)
    }

    /// Create an index over one integer column of an existing table and
    /// backfill it from the live tuples already in the heap.
    pub fn create_index(
        &self,
        index_name: impl Into<String>,
        table_name: &str,
        key_attrs: Vec<usize>,
    ) -> Result<Arc<IndexInfo>, CatalogError> {
        let table = self
            .get_table_by_name(table_name)
            .ok_or_else(|| CatalogError::TableNotFound(table_name.to_string()))?;

        let index = Arc::new(BPlusTree::new(
            self.bpm.clone(),
            BTREE_LEAF_MAX_SIZE,
            BTREE_INTERNAL_MAX_SIZE,
        )?);

        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);
        let info = Arc::new(IndexInfo {
            oid,
            name: index_name.into(),
            table_name: table_name.to_string(),
            key_attrs,
            index,
        });

        for (rid, meta, tuple) in table.heap.iter() {
            if meta.is_deleted {
                continue;
            }
            let key = info
                .key_of(&tuple)
                .ok_or(CatalogError::BadKeyColumn(info.key_attrs[0]))?;
            info.index.insert(key, rid)?;
        }

        self.indexes.write().insert(oid, info.clone());
        self.table_indexes
            .write()
            .entry(table_name.to_string())
            .or_default()
            .push(oid);
        Ok(info)
    }

    pub fn get_table(&self, oid: TableOid) -> Option<Arc<TableInfo>> {
        self.tables.read().get(&oid).cloned()
    }

    pub fn get_table_by_name(&self, name: &str) -> Option<Arc<TableInfo>> {
        let oid = *self.table_names.read().get(name)?;
        self.get_table(oid)
    }

    pub fn get_index(&self, oid: IndexOid) -> Option<Arc<IndexInfo>> {
        self.indexes.read().get(&oid).cloned()
    }

    pub fn get_table_indexes(&self, table_name: &str) -> Vec<Arc<IndexInfo>> {
        let oids = self
            .table_indexes
            .read()
            .get(table_name)
            .cloned()
            .unwrap_or_default();
        let indexes = self.indexes.read();
        oids.iter().filter_map(|oid| indexes.get(oid).cloned()).collect()
    }
}
