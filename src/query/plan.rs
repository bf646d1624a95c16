// Plan nodes are a tagged enum: the planner itself is out of scope, so
// plans are built directly by callers and by the optimizer rules.

use crate::catalog::{IndexOid, Schema};
use crate::common::types::TableOid;
use crate::query::expression::Expression;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderByType {
    Default,
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationType {
    CountStar,
    Count,
    Sum,
    Min,
    Max,
}

pub type OrderBy = (OrderByType, Expression);

#[derive(Clone)]
pub enum PlanNode {
    SeqScan {
        table_oid: TableOid,
    },
    IndexScan {
        index_oid: IndexOid,
    },
    /// Literal rows, the usual child of an insert
    Values {
        schema: Schema,
        rows: Vec<Vec<Expression>>,
    },
    Insert {
        table_oid: TableOid,
        child: Box<PlanNode>,
    },
    Delete {
        table_oid: TableOid,
        child: Box<PlanNode>,
    },
    Update {
        table_oid: TableOid,
        target_expressions: Vec<Expression>,
        child: Box<PlanNode>,
    },
    NestedLoopJoin {
        join_type: JoinType,
        predicate: Expression,
        left: Box<PlanNode>,
        right: Box<PlanNode>,
    },
    HashJoin {
        join_type: JoinType,
        left_key_expressions: Vec<Expression>,
        right_key_expressions: Vec<Expression>,
        left: Box<PlanNode>,
        right: Box<PlanNode>,
    },
    Aggregation {
        group_by: Vec<Expression>,
        aggregates: Vec<(AggregationType, Expression)>,
        child: Box<PlanNode>,
    },
    Sort {
        order_by: Vec<OrderBy>,
        child: Box<PlanNode>,
    },
    TopN {
        n: usize,
        order_by: Vec<OrderBy>,
        child: Box<PlanNode>,
    },
    Limit {
        limit: usize,
        child: Box<PlanNode>,
    },
}
