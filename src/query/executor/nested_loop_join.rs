use crate::catalog::Schema;
use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::query::executor::result::{DataValue, QueryResult, Tuple};
use crate::query::executor::Executor;
use crate::query::expression::Expression;
use crate::query::plan::JoinType;

/// Nested-loop join over two child executors; INNER and LEFT only. The
/// inner side is re-initialized each time the outer side advances.
pub struct NestedLoopJoinExecutor {
    join_type: JoinType,
    predicate: Expression,
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    schema: Schema,
    left_tuple: Option<Tuple>,
    left_matched: bool,
}

impl NestedLoopJoinExecutor {
    pub fn new(
        join_type: JoinType,
        predicate: Expression,
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
    ) -> Self {
        let schema = Schema::joined(left.output_schema(), right.output_schema());
        Self {
            join_type,
            predicate,
            left,
            right,
            schema,
            left_tuple: None,
            left_matched: false,
        }
    }

    fn joined(&self, left: &Tuple, right: &Tuple) -> Tuple {
        let mut values = left.values.clone();
        values.extend(right.values.iter().cloned());
        Tuple::new(values)
    }

    fn null_padded(&self, left: &Tuple) -> Tuple {
        let mut values = left.values.clone();
        values.extend(
            std::iter::repeat(DataValue::Null).take(self.right.output_schema().column_count()),
        );
        Tuple::new(values)
    }
}

impl Executor for NestedLoopJoinExecutor {
    fn init(&mut self) -> QueryResult<()> {
        self.left.init()?;
        self.right.init()?;
        self.left_tuple = self.left.next()?.map(|(tuple, _)| tuple);
        self.left_matched = false;
        Ok(())
    }

    fn next(&mut self) -> QueryResult<Option<(Tuple, Rid)>> {
        loop {
            let Some(left_tuple) = self.left_tuple.clone() else {
                return Ok(None);
            };

            while let Some((right_tuple, _)) = self.right.next()? {
                let verdict = self.predicate.evaluate_join(&left_tuple, &right_tuple)?;
                if verdict == DataValue::Boolean(true) {
                    if self.join_type == JoinType::Left {
                        self.left_matched = true;
                    }
                    let out = self.joined(&left_tuple, &right_tuple);
                    return Ok(Some((out, Rid::new(INVALID_PAGE_ID, 0))));
                }
            }

            // Inner side exhausted: rewind it and advance the outer side
            self.right.init()?;
            let unmatched = self.join_type == JoinType::Left && !self.left_matched;
            self.left_tuple = self.left.next()?.map(|(tuple, _)| tuple);
            self.left_matched = false;
            if unmatched {
                let out = self.null_padded(&left_tuple);
                return Ok(Some((out, Rid::new(INVALID_PAGE_ID, 0))));
            }
        }
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }
}
