// The two rewrite rules exposed to the planner: equi-predicate nested-loop
// joins become hash joins, and a limit directly over a sort becomes top-N.

use crate::query::expression::{ComparisonType, Expression, LogicType};
use crate::query::plan::PlanNode;

/// Apply both rules bottom-up
pub fn optimize(plan: PlanNode) -> PlanNode {
    sort_limit_as_top_n(nlj_as_hash_join(plan))
}

/// Rewrite a nested-loop join whose predicate is `col = col`, or
/// `(col = col) AND (col = col)`, with one column from each side, into a
/// hash join with ordered key lists (left side = tuple index 0).
pub fn nlj_as_hash_join(plan: PlanNode) -> PlanNode {
    rewrite_bottom_up(plan, &|plan| match plan {
        PlanNode::NestedLoopJoin {
            join_type,
            predicate,
            left,
            right,
        } => match extract_equi_keys(&predicate) {
            Some((left_keys, right_keys)) => PlanNode::HashJoin {
                join_type,
                left_key_expressions: left_keys,
                right_key_expressions: right_keys,
                left,
                right,
            },
            None => PlanNode::NestedLoopJoin {
                join_type,
                predicate,
                left,
                right,
            },
        },
        other => other,
    })
}

/// Rewrite a limit whose sole child is a sort into a single top-N
pub fn sort_limit_as_top_n(plan: PlanNode) -> PlanNode {
    rewrite_bottom_up(plan, &|plan| match plan {
        PlanNode::Limit { limit, child } => match *child {
            PlanNode::Sort { order_by, child } => PlanNode::TopN {
                n: limit,
                order_by,
                child,
            },
            other => PlanNode::Limit {
                limit,
                child: Box::new(other),
            },
        },
        other => other,
    })
}

/// Split an equality predicate into per-side key expression lists.
/// Key columns are re-anchored at tuple index 0, since each list is
/// evaluated against its own side.
fn extract_equi_keys(predicate: &Expression) -> Option<(Vec<Expression>, Vec<Expression>)> {
    match predicate {
        Expression::Comparison { .. } => {
            let (l, r) = extract_key_pair(predicate)?;
            Some((vec![l], vec![r]))
        }
        Expression::Logic {
            op: LogicType::And,
            left,
            right,
        } => {
            let (l1, r1) = extract_key_pair(left)?;
            let (l2, r2) = extract_key_pair(right)?;
            Some((vec![l1, l2], vec![r1, r2]))
        }
        _ => None,
    }
}

fn extract_key_pair(expr: &Expression) -> Option<(Expression, Expression)> {
    let Expression::Comparison {
        op: ComparisonType::Equal,
        left,
        right,
    } = expr
    else {
        return None;
    };
    let Expression::ColumnValue {
        tuple_index: left_side,
        column_index: left_column,
    } = **left
    else {
        return None;
    };
    let Expression::ColumnValue {
        tuple_index: right_side,
        column_index: right_column,
    } = **right
    else {
        return None;
    };

    match (left_side, right_side) {
        (0, 1) => Some((
            Expression::column(left_column),
            Expression::column(right_column),
        )),
        (1, 0) => Some((
            Expression::column(right_column),
            Expression::column(left_column),
        )),
        _ => None,
    }
}

/// Rebuild the plan with the rule applied to every node, children first
fn rewrite_bottom_up(plan: PlanNode, rule: &dyn Fn(PlanNode) -> PlanNode) -> PlanNode {
    let plan = match plan {
        PlanNode::SeqScan { .. } | PlanNode::IndexScan { .. } | PlanNode::Values { .. } => plan,
        PlanNode::Insert { table_oid, child } => PlanNode::Insert {
            table_oid,
            child: Box::new(rewrite_bottom_up(*child, rule)),
        },
        PlanNode::Delete { table_oid, child } => PlanNode::Delete {
            table_oid,
            child: Box::new(rewrite_bottom_up(*child, rule)),
        },
        PlanNode::Update {
            table_oid,
            target_expressions,
            child,
        } => PlanNode::Update {
            table_oid,
            target_expressions,
            child: Box::new(rewrite_bottom_up(*child, rule)),
        },
        PlanNode::NestedLoopJoin {
            join_type,
            predicate,
            left,
            right,
        } => PlanNode::NestedLoopJoin {
            join_type,
            predicate,
            left: Box::new(rewrite_bottom_up(*left, rule)),
            right: Box::new(rewrite_bottom_up(*right, rule)),
        },
        PlanNode::HashJoin {
            join_type,
            left_key_expressions,
            right_key_expressions,
            left,
            right,
        } => PlanNode::HashJoin {
            join_type,
            left_key_expressions,
            right_key_expressions,
            left: Box::new(rewrite_bottom_up(*left, rule)),
            right: Box::new(rewrite_bottom_up(*right, rule)),
        },
        PlanNode::Aggregation {
            group_by,
            aggregates,
            child,
        } => PlanNode::Aggregation {
            group_by,
            aggregates,
            child: Box::new(rewrite_bottom_up(*child, rule)),
        },
        PlanNode::Sort { order_by, child } => PlanNode::Sort {
            order_by,
            child: Box::new(rewrite_bottom_up(*child, rule)),
        },
        PlanNode::TopN { n, order_by, child } => PlanNode::TopN {
            n,
            order_by,
            child: Box::new(rewrite_bottom_up(*child, rule)),
        },
        PlanNode::Limit { limit, child } => PlanNode::Limit {
            limit,
            child: Box::new(rewrite_bottom_up(*child, rule)),
        },
    };
    rule(plan)
}
