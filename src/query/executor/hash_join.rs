use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::catalog::Schema;
use crate::common::types::{Rid, INVALID_PAGE_ID};
use crate::query::executor::result::{CmpBool, DataValue, QueryResult, Tuple};
use crate::query::executor::Executor;
use crate::query::expression::Expression;
use crate::query::plan::JoinType;

/// Join key: equality follows SQL comparison semantics, so a null key
/// never equals anything, itself included. Nulls are skipped when hashing,
/// matching the equality rule.
#[derive(Debug, Clone)]
struct JoinKey {
    values: Vec<DataValue>,
}

impl PartialEq for JoinKey {
    fn eq(&self, other: &Self) -> bool {
        self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(other.values.iter())
                .all(|(a, b)| a.compare_equals(b) == CmpBool::CmpTrue)
    }
}

impl Eq for JoinKey {}

impl Hash for JoinKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for value in &self.values {
            if !value.is_null() {
                value.hash(state);
            }
        }
    }
}

/// Hash join over two child executors; INNER and LEFT only. The right
/// (inner) side is built into an in-memory multi-map during `init`; the
/// left side streams and probes.
pub struct HashJoinExecutor {
    join_type: JoinType,
    left_key_expressions: Vec<Expression>,
    right_key_expressions: Vec<Expression>,
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    schema: Schema,
    hash_table: HashMap<JoinKey, Vec<Tuple>>,
    current_left: Option<Tuple>,
    current_matches: Vec<Tuple>,
    match_index: usize,
}

impl HashJoinExecutor {
    pub fn new(
        join_type: JoinType,
        left_key_expressions: Vec<Expression>,
        right_key_expressions: Vec<Expression>,
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
    ) -> Self {
        let schema = Schema::joined(left.output_schema(), right.output_schema());
        Self {
            join_type,
            left_key_expressions,
            right_key_expressions,
            left,
            right,
            schema,
            hash_table: HashMap::new(),
            current_left: None,
            current_matches: Vec::new(),
            match_index: 0,
        }
    }

    fn make_key(tuple: &Tuple, expressions: &[Expression]) -> QueryResult<JoinKey> {
        let values = expressions
            .iter()
            .map(|expr| expr.evaluate(tuple))
            .collect::<QueryResult<Vec<_>>>()?;
        Ok(JoinKey { values })
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

impl Executor for HashJoinExecutor {
    fn init(&mut self) -> QueryResult<()> {
        self.left.init()?;
        self.right.init()?;
        self.hash_table.clear();
        self.current_left = None;
        self.current_matches = Vec::new();
        self.match_index = 0;

        // Build phase: materialize the right side keyed by its join keys
        while let Some((tuple, _)) = self.right.next()? {
            let key = Self::make_key(&tuple, &self.right_key_expressions)?;
            self.hash_table.entry(key).or_default().push(tuple);
        }
        Ok(())
    }

    fn next(&mut self) -> QueryResult<Option<(Tuple, Rid)>> {
        loop {
            if self.match_index < self.current_matches.len() {
                let right_tuple = self.current_matches[self.match_index].clone();
                self.match_index += 1;
                let left_tuple = self.current_left.clone().unwrap_or_else(Tuple::empty);
                let out = self.joined(&left_tuple, &right_tuple);
                return Ok(Some((out, Rid::new(INVALID_PAGE_ID, 0))));
            }

            // Probe phase: advance the left side
            let Some((left_tuple, _)) = self.left.next()? else {
                return Ok(None);
            };
            let key = Self::make_key(&left_tuple, &self.left_key_expressions)?;
            let matches = self.hash_table.get(&key).cloned().unwrap_or_default();

            if matches.is_empty() {
                if self.join_type == JoinType::Left {
                    let out = self.null_padded(&left_tuple);
                    return Ok(Some((out, Rid::new(INVALID_PAGE_ID, 0))));
                }
                continue;
            }

            self.current_left = Some(left_tuple);
            self.current_matches = matches;
            self.match_index = 0;
        }
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }
}
