use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::catalog::Schema;
use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::query::executor::result::{DataValue, QueryResult, Tuple};
use crate::query::executor::sort::{compare_sort_keys, sort_keys_of};
use crate::query::executor::Executor;
use crate::query::plan::OrderBy;

/// Heap entry ordered by the sort keys; the max-heap therefore keeps the
/// worst of the current best-N on top, ready to be displaced.
struct HeapEntry {
    keys: Vec<DataValue>,
    tuple: Tuple,
    order_by: Arc<Vec<OrderBy>>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_sort_keys(&self.keys, &other.keys, &self.order_by)
    }
}

/// Top-N via a bounded priority queue of size `n`. `init` drains the child
/// through the heap, then lays the survivors out in output order.
pub struct TopNExecutor {
    n: usize,
    order_by: Arc<Vec<OrderBy>>,
    child: Box<dyn Executor>,
    schema: Schema,
    output: Vec<Tuple>,
    cursor: usize,
}

impl TopNExecutor {
    pub fn new(n: usize, order_by: Vec<OrderBy>, child: Box<dyn Executor>) -> Self {
        let schema = child.output_schema().clone();
        Self {
            n,
            order_by: Arc::new(order_by),
            child,
            schema,
            output: Vec::new(),
            cursor: 0,
        }
    }
}

impl Executor for TopNExecutor {
    fn init(&mut self) -> QueryResult<()> {
        self.child.init()?;
        self.output.clear();
        self.cursor = 0;

        let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::new();
        while let Some((tuple, _)) = self.child.next()? {
            let entry = HeapEntry {
                keys: sort_keys_of(&tuple, &self.order_by)?,
                tuple,
                order_by: self.order_by.clone(),
            };
            heap.push(entry);
            if heap.len() > self.n {
                heap.pop();
            }
        }

        self.output = heap
            .into_sorted_vec()
            .into_iter()
            .map(|entry| entry.tuple)
            .collect();
        Ok(())
    }

    fn next(&mut self) -> QueryResult<Option<(Tuple, Rid)>> {
        let Some(tuple) = self.output.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        Ok(Some((tuple.clone(), Rid::new(INVALID_PAGE_ID, 0))))
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }
}
