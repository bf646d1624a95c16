// Execution value and tuple types, plus the error surface of the query
// layer.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::common::types::TxnId;
use crate::index::btree::BTreeError;
use crate::storage::buffer::BufferPoolError;
use crate::storage::table::TableError;
use crate::transaction::TransactionAbort;

/// Possible data values in a tuple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
}

impl Eq for DataValue {}

impl Hash for DataValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Type discriminant first to avoid collisions between types
        match self {
            DataValue::Null => 0.hash(state),
            DataValue::Integer(i) => {
                1.hash(state);
                i.hash(state);
            }
            DataValue::Float(f) => {
                2.hash(state);
                f.to_bits().hash(state);
            }
            DataValue::Text(s) => {
                3.hash(state);
                s.hash(state);
            }
            DataValue::Boolean(b) => {
                4.hash(state);
                b.hash(state);
            }
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Null => write!(f, "NULL"),
            DataValue::Integer(i) => write!(f, "{}", i),
            DataValue::Float(fl) => write!(f, "{}", fl),
            DataValue::Text(s) => write!(f, "\"{}\"", s),
            DataValue::Boolean(b) => write!(f, "{}", b),
        }
    }
}

/// SQL-style three-valued comparison outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpBool {
    CmpTrue,
    CmpFalse,
    CmpNull,
}

impl DataValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DataValue::Null)
    }

    /// SQL equality: any null operand compares to null (never true)
    pub fn compare_equals(&self, other: &DataValue) -> CmpBool {
        match self.numeric_cmp(other) {
            None => CmpBool::CmpNull,
            Some(Ordering::Equal) => CmpBool::CmpTrue,
            Some(_) => CmpBool::CmpFalse,
        }
    }

    pub fn compare_less_than(&self, other: &DataValue) -> CmpBool {
        match self.numeric_cmp(other) {
            None => CmpBool::CmpNull,
            Some(Ordering::Less) => CmpBool::CmpTrue,
            Some(_) => CmpBool::CmpFalse,
        }
    }

    pub fn compare_greater_than(&self, other: &DataValue) -> CmpBool {
        match self.numeric_cmp(other) {
            None => CmpBool::CmpNull,
            Some(Ordering::Greater) => CmpBool::CmpTrue,
            Some(_) => CmpBool::CmpFalse,
        }
    }

    /// Value comparison with int/float coercion; `None` when either side is
    /// null or the types are incomparable.
    fn numeric_cmp(&self, other: &DataValue) -> Option<Ordering> {
        match (self, other) {
            (DataValue::Null, _) | (_, DataValue::Null) => None,
            (DataValue::Integer(a), DataValue::Integer(b)) => Some(a.cmp(b)),
            (DataValue::Float(a), DataValue::Float(b)) => a.partial_cmp(b),
            (DataValue::Integer(a), DataValue::Float(b)) => (*a as f64).partial_cmp(b),
            (DataValue::Float(a), DataValue::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (DataValue::Text(a), DataValue::Text(b)) => Some(a.cmp(b)),
            (DataValue::Boolean(a), DataValue::Boolean(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total order for sorting: nulls first, then by value, with mixed
    /// incomparable types ranked by discriminant so the order is stable.
    pub fn sort_cmp(&self, other: &DataValue) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }
        match self.numeric_cmp(other) {
            Some(ordering) => ordering,
            None => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            DataValue::Null => 0,
            DataValue::Integer(_) => 1,
            DataValue::Float(_) => 2,
            DataValue::Text(_) => 3,
            DataValue::Boolean(_) => 4,
        }
    }
}

/// A positional row of values
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    pub values: Vec<DataValue>,
}

impl Tuple {
    pub fn new(values: Vec<DataValue>) -> Self {
        Self { values }
    }

    pub fn empty() -> Self {
        Self { values: Vec::new() }
    }

    pub fn value(&self, index: usize) -> &DataValue {
        &self.values[index]
    }

    pub fn width(&self) -> usize {
        self.values.len()
    }
}

/// Errors surfaced by query execution
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Transaction {0} aborted while waiting for a lock")]
    LockFailed(TxnId),

    #[error("Transaction aborted: {0}")]
    Abort(#[from] TransactionAbort),

    #[error("Storage error: {0}")]
    Storage(#[from] TableError),

    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("Index error: {0}")]
    Index(#[from] BTreeError),
}

pub type QueryResult<T> = Result<T, QueryError>;
