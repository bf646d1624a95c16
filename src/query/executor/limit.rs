use crate::catalog::Schema;
use crate::common::types::Rid;
use crate::query::executor::result::{QueryResult, Tuple};
use crate::query::executor::Executor;

/// Pass through at most `limit` child tuples
pub struct LimitExecutor {
    limit: usize,
    child: Box<dyn Executor>,
    schema: Schema,
    emitted: usize,
}

impl LimitExecutor {
    pub fn new(limit: usize, child: Box<dyn Executor>) -> Self {
        let schema = child.output_schema().clone();
        Self {
            limit,
            child,
            schema,
            emitted: 0,
        }
    }
}

impl Executor for LimitExecutor {
    fn init(&mut self) -> QueryResult<()> {
        self.child.init()?;
        self.emitted = 0;
        Ok(())
    }

    fn next(&mut self) -> QueryResult<Option<(Tuple, Rid)>> {
        if self.emitted >= self.limit {
            return Ok(None);
        }
        match self.child.next()? {
            Some(row) => {
                self.emitted += 1;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }
}
