use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use terndb::catalog::{Catalog, Column, DataType, Schema, TableInfo};
use terndb::query::executor::result::{DataValue, Tuple};
use terndb::query::executor::{create_executor, Executor, ExecutorContext};
use terndb::query::plan::PlanNode;
use terndb::storage::buffer::BufferPoolManager;
use terndb::transaction::{IsolationLevel, LockManager, Transaction, TransactionManager};

/// Scratch database file. The handle keeps the file alive; the path is
/// handy for reopening the same database with a second pool.
#[allow(dead_code)]
pub fn temp_db_path() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().display().to_string();
    Ok((file, path))
}

/// Buffer pool over its own scratch file, sized as requested
#[allow(dead_code)]
pub fn test_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (file, path) = temp_db_path()?;
    Ok((Arc::new(BufferPoolManager::new(pool_size, path)?), file))
}

/// Everything an executor test needs, wired up the way the engine is at
/// startup: one buffer pool, one catalog, one lock manager, one
/// transaction manager.
#[allow(dead_code)]
pub struct TestDb {
    pub bpm: Arc<BufferPoolManager>,
    pub catalog: Arc<Catalog>,
    pub lock_manager: Arc<LockManager>,
    pub txn_manager: Arc<TransactionManager>,
    _file: NamedTempFile,
}

#[allow(dead_code)]
pub fn create_test_db(pool_size: usize) -> Result<TestDb> {
    let (bpm, file) = test_pool(pool_size)?;
    let catalog = Arc::new(Catalog::new(bpm.clone()));
    let lock_manager = Arc::new(LockManager::new());
    let txn_manager = TransactionManager::new(lock_manager.clone());
    Ok(TestDb {
        bpm,
        catalog,
        lock_manager,
        txn_manager,
        _file: file,
    })
}

#[allow(dead_code)]
pub fn users_schema() -> Schema {
    Schema::new(vec![
        Column::new("id", DataType::Integer),
        Column::new("name", DataType::Text),
        Column::new("age", DataType::Integer),
    ])
}

#[allow(dead_code)]
pub fn user_row(id: i64, name: &str, age: i64) -> Vec<DataValue> {
    vec![
        DataValue::Integer(id),
        DataValue::Text(name.to_string()),
        DataValue::Integer(age),
    ]
}

#[allow(dead_code)]
pub fn create_users_table(db: &TestDb) -> Result<Arc<TableInfo>> {
    Ok(db.catalog.create_table("users", users_schema())?)
}

#[allow(dead_code)]
pub fn exec_ctx(db: &TestDb, txn: &Arc<Transaction>) -> Arc<ExecutorContext> {
    Arc::new(ExecutorContext::new(
        db.bpm.clone(),
        db.catalog.clone(),
        db.txn_manager.clone(),
        txn.clone(),
    ))
}

/// Run a plan to completion inside the given transaction
#[allow(dead_code)]
pub fn run_plan(db: &TestDb, txn: &Arc<Transaction>, plan: &PlanNode) -> Result<Vec<Tuple>> {
    let ctx = exec_ctx(db, txn);
    let mut executor = create_executor(&ctx, plan)?;
    collect(executor.as_mut())
}

#[allow(dead_code)]
pub fn collect(executor: &mut dyn Executor) -> Result<Vec<Tuple>> {
    executor.init()?;
    let mut rows = Vec::new();
    while let Some((tuple, _)) = executor.next()? {
        rows.push(tuple);
    }
    Ok(rows)
}

/// Run a plan in a fresh committed transaction
#[allow(dead_code)]
pub fn run_committed(db: &TestDb, plan: &PlanNode) -> Result<Vec<Tuple>> {
    let txn = db.txn_manager.begin(IsolationLevel::RepeatableRead);
    let rows = run_plan(db, &txn, plan)?;
    db.txn_manager.commit(&txn);
    Ok(rows)
}

/// An insert-from-literals plan
#[allow(dead_code)]
pub fn insert_plan(table_oid: u32, schema: Schema, rows: Vec<Vec<DataValue>>) -> PlanNode {
    use terndb::query::expression::Expression;
    let rows = rows
        .into_iter()
        .map(|row| row.into_iter().map(Expression::Constant).collect())
        .collect();
    PlanNode::Insert {
        table_oid,
        child: Box::new(PlanNode::Values { schema, rows }),
    }
}

/// Sort tuples by their first column so result multisets compare stably
#[allow(dead_code)]
pub fn sorted_rows(mut rows: Vec<Tuple>) -> Vec<Tuple> {
    rows.sort_by(|a, b| {
        format!("{:?}", a.values).cmp(&format!("{:?}", b.values))
    });
    rows
}
