use crate::catalog::Schema;
use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::query::executor::result::{QueryResult, Tuple};
use crate::query::executor::Executor;
use crate::query::expression::Expression;

/// Emits a fixed list of literal rows; the usual child of an insert
pub struct ValuesExecutor {
    schema: Schema,
    rows: Vec<Vec<Expression>>,
    cursor: usize,
}

impl ValuesExecutor {
    pub fn new(schema: Schema, rows: Vec<Vec<Expression>>) -> Self {
        Self {
            schema,
            rows,
            cursor: 0,
        }
    }
}

impl Executor for ValuesExecutor {
    fn init(&mut self) -> QueryResult<()> {
        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self) -> QueryResult<Option<(Tuple, Rid)>> {
        let Some(row) = self.rows.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;

        let empty = Tuple::empty();
        let values = row
            .iter()
            .map(|expr| expr.evaluate(&empty))
            .collect::<QueryResult<Vec<_>>>()?;
        Ok(Some((Tuple::new(values), Rid::new(INVALID_PAGE_ID, 0))))
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }
}
