// Pull-based executor pipeline. Every operator implements `Executor`:
// an idempotent `init`, a `next` that produces tuples until exhaustion,
// and an `output_schema` describing what it emits.

pub mod result;

pub mod aggregation;
pub mod delete;
pub mod hash_join;
pub mod index_scan;
pub mod insert;
pub mod limit;
pub mod nested_loop_join;
pub mod seq_scan;
pub mod sort;
pub mod topn;
pub mod update;
pub mod values;

use std::sync::Arc;

use crate::catalog::{Catalog, Schema};
use crate::common::types::Rid;
use crate::query::executor::result::{QueryResult, Tuple};
use crate::query::plan::PlanNode;
use crate::storage::buffer::BufferPoolManager;
use crate::transaction::{LockManager, Transaction, TransactionManager};

/// The iterator interface every operator implements
pub trait Executor {
    /// Idempotent reset; blocking operators materialize their input here
    fn init(&mut self) -> QueryResult<()>;

    /// Produce the next output tuple, or `None` at end of stream
    fn next(&mut self) -> QueryResult<Option<(Tuple, Rid)>>;

    /// The schema of the tuples this operator emits
    fn output_schema(&self) -> &Schema;
}

/// Shared services handed to every executor in a query. `is_delete` marks
/// pipelines that feed a delete (or update), which upgrades the scan-side
/// locking discipline.
#[derive(Clone)]
pub struct ExecutorContext {
    pub bpm: Arc<BufferPoolManager>,
    pub catalog: Arc<Catalog>,
    pub lock_manager: Arc<LockManager>,
    pub txn_manager: Arc<TransactionManager>,
    pub txn: Arc<Transaction>,
    pub is_delete: bool,
}

impl ExecutorContext {
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        catalog: Arc<Catalog>,
        txn_manager: Arc<TransactionManager>,
        txn: Arc<Transaction>,
    ) -> Self {
        Self {
            bpm,
            catalog,
            lock_manager: txn_manager.lock_manager().clone(),
            txn_manager,
            txn,
            is_delete: false,
        }
    }

    fn as_delete(&self) -> Arc<Self> {
        let mut ctx = self.clone();
        ctx.is_delete = true;
        Arc::new(ctx)
    }
}

/// Build the executor tree for a plan
pub fn create_executor(
    ctx: &Arc<ExecutorContext>,
    plan: &PlanNode,
) -> QueryResult<Box<dyn Executor>> {
    match plan {
        PlanNode::SeqScan { table_oid } => Ok(Box::new(seq_scan::SeqScanExecutor::new(
            ctx.clone(),
            *table_oid,
        )?)),
        PlanNode::IndexScan { index_oid } => Ok(Box::new(index_scan::IndexScanExecutor::new(
            ctx.clone(),
            *index_oid,
        )?)),
        PlanNode::Values { schema, rows } => Ok(Box::new(values::ValuesExecutor::new(
            schema.clone(),
            rows.clone(),
        ))),
        PlanNode::Insert { table_oid, child } => {
            let child = create_executor(ctx, child)?;
            Ok(Box::new(insert::InsertExecutor::new(
                ctx.clone(),
                *table_oid,
                child,
            )?))
        }
        PlanNode::Delete { table_oid, child } => {
            let delete_ctx = ctx.as_delete();
            let child = create_executor(&delete_ctx, child)?;
            Ok(Box::new(delete::DeleteExecutor::new(
                delete_ctx,
                *table_oid,
                child,
            )?))
        }
        PlanNode::Update {
            table_oid,
            target_expressions,
            child,
        } => {
            let delete_ctx = ctx.as_delete();
            let child = create_executor(&delete_ctx, child)?;
            Ok(Box::new(update::UpdateExecutor::new(
                delete_ctx,
                *table_oid,
                target_expressions.clone(),
                child,
            )?))
        }
        PlanNode::NestedLoopJoin {
            join_type,
            predicate,
            left,
            right,
        } => {
            let left = create_executor(ctx, left)?;
            let right = create_executor(ctx, right)?;
            Ok(Box::new(nested_loop_join::NestedLoopJoinExecutor::new(
                *join_type,
                predicate.clone(),
                left,
                right,
            )))
        }
        PlanNode::HashJoin {
            join_type,
            left_key_expressions,
            right_key_expressions,
            left,
            right,
        } => {
            let left = create_executor(ctx, left)?;
            let right = create_executor(ctx, right)?;
            Ok(Box::new(hash_join::HashJoinExecutor::new(
                *join_type,
                left_key_expressions.clone(),
                right_key_expressions.clone(),
                left,
                right,
            )))
        }
        PlanNode::Aggregation {
            group_by,
            aggregates,
            child,
        } => {
            let child = create_executor(ctx, child)?;
            Ok(Box::new(aggregation::AggregationExecutor::new(
                group_by.clone(),
                aggregates.clone(),
                child,
            )))
        }
        PlanNode::Sort { order_by, child } => {
            let child = create_executor(ctx, child)?;
            Ok(Box::new(sort::SortExecutor::new(order_by.clone(), child)))
        }
        PlanNode::TopN { n, order_by, child } => {
            let child = create_executor(ctx, child)?;
            Ok(Box::new(topn::TopNExecutor::new(
                *n,
                order_by.clone(),
                child,
            )))
        }
        PlanNode::Limit { limit, child } => {
            let child = create_executor(ctx, child)?;
            Ok(Box::new(limit::LimitExecutor::new(*limit, child)))
        }
    }
}
