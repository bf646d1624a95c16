use std::cmp::Ordering;

use crate::catalog::Schema;
use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::query::executor::result::{DataValue, QueryResult, Tuple};
use crate::query::executor::Executor;
use crate::query::plan::{OrderBy, OrderByType};

/// Compare two precomputed sort-key vectors under an order-by list.
/// `Default` sorts ascending.
pub(crate) fn compare_sort_keys(a: &[DataValue], b: &[DataValue], order_by: &[OrderBy]) -> Ordering {
    for (i, (direction, _)) in order_by.iter().enumerate() {
        let ordering = a[i].sort_cmp(&b[i]);
        let ordering = match direction {
            OrderByType::Desc => ordering.reverse(),
            OrderByType::Asc | OrderByType::Default => ordering,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

pub(crate) fn sort_keys_of(tuple: &Tuple, order_by: &[OrderBy]) -> QueryResult<Vec<DataValue>> {
    order_by
        .iter()
        .map(|(_, expr)| expr.evaluate(tuple))
        .collect()
}

/// Full materializing sort. The child is drained in `init`; the sort is
/// stable, so ties keep their input order.
pub struct SortExecutor {
    order_by: Vec<OrderBy>,
    child: Box<dyn Executor>,
    schema: Schema,
    sorted: Vec<Tuple>,
    cursor: usize,
}

impl SortExecutor {
    pub fn new(order_by: Vec<OrderBy>, child: Box<dyn Executor>) -> Self {
        let schema = child.output_schema().clone();
        Self {
            order_by,
            child,
            schema,
            sorted: Vec::new(),
            cursor: 0,
        }
    }
}

impl Executor for SortExecutor {
    fn init(&mut self) -> QueryResult<()> {
        self.child.init()?;
        self.sorted.clear();
        self.cursor = 0;

        let mut keyed: Vec<(Vec<DataValue>, Tuple)> = Vec::new();
        while let Some((tuple, _)) = self.child.next()? {
            keyed.push((sort_keys_of(&tuple, &self.order_by)?, tuple));
        }
        keyed.sort_by(|(a, _), (b, _)| compare_sort_keys(a, b, &self.order_by));
        self.sorted = keyed.into_iter().map(|(_, tuple)| tuple).collect();
        Ok(())
    }

    fn next(&mut self) -> QueryResult<Option<(Tuple, Rid)>> {
        let Some(tuple) = self.sorted.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        Ok(Some((tuple.clone(), Rid::new(INVALID_PAGE_ID, 0))))
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }
}
