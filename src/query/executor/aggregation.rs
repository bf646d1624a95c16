use std::collections::HashMap;

use crate::catalog::{Column, DataType, Schema};
use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::query::executor::result::{CmpBool, DataValue, QueryResult, Tuple};
use crate::query::executor::Executor;
use crate::query::expression::Expression;
use crate::query::plan::AggregationType;

/// Group-by key. Unlike join keys, grouping uses structural equality so
/// that null group values collapse into one group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AggregateKey(Vec<DataValue>);

/// Hash aggregation: the child is fully consumed in `init` into a table of
/// running aggregates, one slot per aggregate expression.
pub struct AggregationExecutor {
    group_by: Vec<Expression>,
    aggregates: Vec<(AggregationType, Expression)>,
    child: Box<dyn Executor>,
    schema: Schema,
    results: Vec<(Vec<DataValue>, Vec<DataValue>)>,
    cursor: usize,
    emitted_empty: bool,
}

impl AggregationExecutor {
    pub fn new(
        group_by: Vec<Expression>,
        aggregates: Vec<(AggregationType, Expression)>,
        child: Box<dyn Executor>,
    ) -> Self {
        let mut columns = Vec::new();
        for i in 0..group_by.len() {
            columns.push(Column::new(format!("group_by_{}", i), DataType::Integer));
        }
        for i in 0..aggregates.len() {
            columns.push(Column::new(format!("agg_{}", i), DataType::Integer));
        }
        Self {
            group_by,
            aggregates,
            child,
            schema: Schema::new(columns),
            results: Vec::new(),
            cursor: 0,
            emitted_empty: false,
        }
    }

    fn initial_values(&self) -> Vec<DataValue> {
        self.aggregates
            .iter()
            .map(|(agg_type, _)| match agg_type {
                AggregationType::CountStar => DataValue::Integer(0),
                _ => DataValue::Null,
            })
            .collect()
    }

    fn combine(agg_type: AggregationType, current: &mut DataValue, input: DataValue) {
        if agg_type != AggregationType::CountStar && input.is_null() {
            return;
        }
        let updated = match agg_type {
            AggregationType::CountStar => match &*current {
                DataValue::Integer(n) => DataValue::Integer(n + 1),
                other => other.clone(),
            },
            AggregationType::Count => match &*current {
                DataValue::Integer(n) => DataValue::Integer(n + 1),
                _ => DataValue::Integer(1),
            },
            AggregationType::Sum => match (&*current, &input) {
                (DataValue::Null, _) => input.clone(),
                (DataValue::Integer(a), DataValue::Integer(b)) => DataValue::Integer(a + b),
                (DataValue::Integer(a), DataValue::Float(b)) => DataValue::Float(*a as f64 + b),
                (DataValue::Float(a), DataValue::Integer(b)) => DataValue::Float(a + *b as f64),
                (DataValue::Float(a), DataValue::Float(b)) => DataValue::Float(a + b),
                (other, _) => other.clone(),
            },
            AggregationType::Min => {
                if current.is_null() || input.compare_less_than(current) == CmpBool::CmpTrue {
                    input.clone()
                } else {
                    current.clone()
                }
            }
            AggregationType::Max => {
                if current.is_null() || input.compare_greater_than(current) == CmpBool::CmpTrue {
                    input.clone()
                } else {
                    current.clone()
                }
            }
        };
        *current = updated;
    }
}

impl Executor for AggregationExecutor {
    fn init(&mut self) -> QueryResult<()> {
        self.child.init()?;
        self.results.clear();
        self.cursor = 0;
        self.emitted_empty = false;

        let mut table: HashMap<AggregateKey, Vec<DataValue>> = HashMap::new();
        while let Some((tuple, _)) = self.child.next()? {
            let key = AggregateKey(
                self.group_by
                    .iter()
                    .map(|expr| expr.evaluate(&tuple))
                    .collect::<QueryResult<Vec<_>>>()?,
            );
            let inputs = self
                .aggregates
                .iter()
                .map(|(_, expr)| expr.evaluate(&tuple))
                .collect::<QueryResult<Vec<_>>>()?;

            let initial = self.initial_values();
            let entry = table.entry(key).or_insert(initial);
            for (slot, ((agg_type, _), input)) in
                self.aggregates.iter().zip(inputs).enumerate()
            {
                Self::combine(*agg_type, &mut entry[slot], input);
            }
        }

        self.results = table.into_iter().map(|(k, v)| (k.0, v)).collect();
        Ok(())
    }

    fn next(&mut self) -> QueryResult<Option<(Tuple, Rid)>> {
        if let Some((group_values, agg_values)) = self.results.get(self.cursor) {
            self.cursor += 1;
            let mut values = group_values.clone();
            values.extend(agg_values.iter().cloned());
            return Ok(Some((Tuple::new(values), Rid::new(INVALID_PAGE_ID, 0))));
        }

        // No input rows and no grouping: emit one row of initial aggregate
        // values, provided the output is aggregates only.
        if self.results.is_empty()
            && !self.emitted_empty
            && self.schema.column_count() == self.aggregates.len()
        {
            self.emitted_empty = true;
            return Ok(Some((
                Tuple::new(self.initial_values()),
                Rid::new(INVALID_PAGE_ID, 0),
            )));
        }

        Ok(None)
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }
}
