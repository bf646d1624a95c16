use anyhow::Result;

mod common;
use common::{
    create_test_db, create_users_table, insert_plan, run_committed, run_plan, sorted_rows,
    user_row, users_schema,
};

use terndb::catalog::{Column, DataType, Schema};
use terndb::query::executor::result::{DataValue, Tuple};
use terndb::query::expression::{ArithmeticType, Expression};
use terndb::query::optimizer;
use terndb::query::plan::{AggregationType, JoinType, OrderByType, PlanNode};
use terndb::transaction::{IsolationLevel, LockMode};

fn seed_users(db: &common::TestDb) -> Result<u32> {
    let table = create_users_table(db)?;
    let rows = vec![
        user_row(1, "ada", 36),
        user_row(2, "grace", 45),
        user_row(3, "edsger", 72),
        user_row(4, "barbara", 45),
    ];
    let result = run_committed(db, &insert_plan(table.oid, users_schema(), rows))?;
    assert_eq!(result[0].values, vec![DataValue::Integer(4)]);
    Ok(table.oid)
}

fn scan(table_oid: u32) -> PlanNode {
    PlanNode::SeqScan { table_oid }
}

#[test]
fn test_insert_then_seq_scan() -> Result<()> {
    let db = create_test_db(64)?;
    let oid = seed_users(&db)?;

    let rows = run_committed(&db, &scan(oid))?;
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0].values, user_row(1, "ada", 36));
    assert_eq!(rows[3].values, user_row(4, "barbara", 45));
    Ok(())
}

#[test]
fn test_delete_tombstones_are_skipped() -> Result<()> {
    let db = create_test_db(64)?;
    let oid = seed_users(&db)?;

    // Delete everything with one pipeline: scan feeds delete
    let delete = PlanNode::Delete {
        table_oid: oid,
        child: Box::new(scan(oid)),
    };
    let result = run_committed(&db, &delete)?;
    assert_eq!(result[0].values, vec![DataValue::Integer(4)]);

    let rows = run_committed(&db, &scan(oid))?;
    assert!(rows.is_empty());
    Ok(())
}

#[test]
fn test_delete_path_takes_exclusive_locks() -> Result<()> {
    let db = create_test_db(64)?;
    let oid = seed_users(&db)?;

    let txn = db.txn_manager.begin(IsolationLevel::RepeatableRead);
    let delete = PlanNode::Delete {
        table_oid: oid,
        child: Box::new(scan(oid)),
    };
    run_plan(&db, &txn, &delete)?;

    // IX on the table and X per row, all held until commit
    assert!(txn.holds_table_lock(LockMode::IntentionExclusive, oid));
    assert_eq!(txn.held_row_locks().len(), 4);
    db.txn_manager.commit(&txn);
    assert!(txn.held_row_locks().is_empty());
    Ok(())
}

#[test]
fn test_read_uncommitted_scan_takes_no_locks() -> Result<()> {
    let db = create_test_db(64)?;
    let oid = seed_users(&db)?;

    let txn = db.txn_manager.begin(IsolationLevel::ReadUncommitted);
    let rows = run_plan(&db, &txn, &scan(oid))?;
    assert_eq!(rows.len(), 4);
    assert!(txn.held_table_locks().is_empty());
    assert!(txn.held_row_locks().is_empty());
    db.txn_manager.commit(&txn);
    Ok(())
}

#[test]
fn test_repeatable_read_scan_holds_shared_locks() -> Result<()> {
    let db = create_test_db(64)?;
    let oid = seed_users(&db)?;

    let txn = db.txn_manager.begin(IsolationLevel::RepeatableRead);
    let rows = run_plan(&db, &txn, &scan(oid))?;
    assert_eq!(rows.len(), 4);
    assert!(txn.holds_table_lock(LockMode::IntentionShared, oid));
    assert_eq!(txn.held_row_locks().len(), 4);
    db.txn_manager.commit(&txn);
    Ok(())
}

#[test]
fn test_read_committed_scan_releases_as_it_goes() -> Result<()> {
    let db = create_test_db(64)?;
    let oid = seed_users(&db)?;

    let txn = db.txn_manager.begin(IsolationLevel::ReadCommitted);
    let rows = run_plan(&db, &txn, &scan(oid))?;
    assert_eq!(rows.len(), 4);
    // Row locks went away after each read, the table IS at end of scan
    assert!(txn.held_row_locks().is_empty());
    assert!(txn.held_table_locks().is_empty());
    db.txn_manager.commit(&txn);
    Ok(())
}

#[test]
fn test_update_is_delete_plus_insert() -> Result<()> {
    let db = create_test_db(64)?;
    let oid = seed_users(&db)?;

    // age = age + 1, other columns unchanged
    let update = PlanNode::Update {
        table_oid: oid,
        target_expressions: vec![
            Expression::column(0),
            Expression::column(1),
            Expression::Arithmetic {
                op: ArithmeticType::Add,
                left: Box::new(Expression::column(2)),
                right: Box::new(Expression::Constant(DataValue::Integer(1))),
            },
        ],
        child: Box::new(scan(oid)),
    };
    let result = run_committed(&db, &update)?;
    assert_eq!(result[0].values, vec![DataValue::Integer(4)]);

    let rows = sorted_rows(run_committed(&db, &scan(oid))?);
    let ages: Vec<&DataValue> = rows.iter().map(|t| t.value(2)).collect();
    assert!(ages.contains(&&DataValue::Integer(37)));
    assert!(ages.contains(&&DataValue::Integer(73)));
    assert_eq!(rows.len(), 4);
    Ok(())
}

#[test]
fn test_abort_rolls_back_inserts_and_deletes() -> Result<()> {
    let db = create_test_db(64)?;
    let oid = seed_users(&db)?;

    // An aborted insert leaves nothing behind
    let txn = db.txn_manager.begin(IsolationLevel::RepeatableRead);
    run_plan(
        &db,
        &txn,
        &insert_plan(oid, users_schema(), vec![user_row(9, "ghost", 1)]),
    )?;
    db.txn_manager.abort(&txn);
    let rows = run_committed(&db, &scan(oid))?;
    assert_eq!(rows.len(), 4);

    // An aborted delete resurrects its tombstones
    let txn = db.txn_manager.begin(IsolationLevel::RepeatableRead);
    let delete = PlanNode::Delete {
        table_oid: oid,
        child: Box::new(scan(oid)),
    };
    run_plan(&db, &txn, &delete)?;
    db.txn_manager.abort(&txn);
    let rows = run_committed(&db, &scan(oid))?;
    assert_eq!(rows.len(), 4);
    Ok(())
}

#[test]
fn test_index_scan_in_key_order() -> Result<()> {
    let db = create_test_db(64)?;
    let table = create_users_table(&db)?;
    let index = db.catalog.create_index("users_by_id", "users", vec![0])?;

    // Insert out of id order; the insert executor maintains the index
    let rows = vec![
        user_row(3, "edsger", 72),
        user_row(1, "ada", 36),
        user_row(2, "grace", 45),
    ];
    run_committed(&db, &insert_plan(table.oid, users_schema(), rows))?;

    let plan = PlanNode::IndexScan {
        index_oid: index.oid,
    };
    let rows = run_committed(&db, &plan)?;
    let ids: Vec<&DataValue> = rows.iter().map(|t| t.value(0)).collect();
    assert_eq!(
        ids,
        vec![
            &DataValue::Integer(1),
            &DataValue::Integer(2),
            &DataValue::Integer(3)
        ]
    );

    // Deleted rows disappear from the index scan too
    let delete = PlanNode::Delete {
        table_oid: table.oid,
        child: Box::new(scan(table.oid)),
    };
    run_committed(&db, &delete)?;
    let rows = run_committed(&db, &plan)?;
    assert!(rows.is_empty());
    Ok(())
}

fn seed_join_tables(db: &common::TestDb) -> Result<(u32, u32)> {
    let left_schema = Schema::new(vec![
        Column::new("id", DataType::Integer),
        Column::new("name", DataType::Text),
    ]);
    let right_schema = Schema::new(vec![
        Column::new("owner_id", DataType::Integer),
        Column::new("item", DataType::Text),
    ]);
    let left = db.catalog.create_table("people", left_schema.clone())?;
    let right = db.catalog.create_table("items", right_schema.clone())?;

    run_committed(
        db,
        &insert_plan(
            left.oid,
            left_schema,
            vec![
                vec![DataValue::Integer(1), DataValue::Text("ada".into())],
                vec![DataValue::Integer(2), DataValue::Text("grace".into())],
                vec![DataValue::Integer(3), DataValue::Text("edsger".into())],
            ],
        ),
    )?;
    run_committed(
        db,
        &insert_plan(
            right.oid,
            right_schema,
            vec![
                vec![DataValue::Integer(1), DataValue::Text("pen".into())],
                vec![DataValue::Integer(1), DataValue::Text("book".into())],
                vec![DataValue::Integer(2), DataValue::Text("card".into())],
                vec![DataValue::Integer(9), DataValue::Text("stray".into())],
            ],
        ),
    )?;
    Ok((left.oid, right.oid))
}

fn join_predicate() -> Expression {
    Expression::equals(Expression::side_column(0, 0), Expression::side_column(1, 0))
}

#[test]
fn test_nlj_and_hash_join_agree_on_inner() -> Result<()> {
    let db = create_test_db(64)?;
    let (people, items) = seed_join_tables(&db)?;

    let nlj = PlanNode::NestedLoopJoin {
        join_type: JoinType::Inner,
        predicate: join_predicate(),
        left: Box::new(scan(people)),
        right: Box::new(scan(items)),
    };
    let hash = optimizer::nlj_as_hash_join(nlj.clone());
    assert!(matches!(hash, PlanNode::HashJoin { .. }));

    let nlj_rows = sorted_rows(run_committed(&db, &nlj)?);
    let hash_rows = sorted_rows(run_committed(&db, &hash)?);
    assert_eq!(nlj_rows.len(), 3);
    assert_eq!(nlj_rows, hash_rows);
    Ok(())
}

#[test]
fn test_nlj_and_hash_join_agree_on_left() -> Result<()> {
    let db = create_test_db(64)?;
    let (people, items) = seed_join_tables(&db)?;

    let nlj = PlanNode::NestedLoopJoin {
        join_type: JoinType::Left,
        predicate: join_predicate(),
        left: Box::new(scan(people)),
        right: Box::new(scan(items)),
    };
    let hash = optimizer::nlj_as_hash_join(nlj.clone());

    let nlj_rows = sorted_rows(run_committed(&db, &nlj)?);
    let hash_rows = sorted_rows(run_committed(&db, &hash)?);
    // Three matches plus the unmatched left row (edsger) padded with nulls
    assert_eq!(nlj_rows.len(), 4);
    assert_eq!(nlj_rows, hash_rows);

    let padded: Vec<&Tuple> = nlj_rows
        .iter()
        .filter(|t| t.value(2).is_null())
        .collect();
    assert_eq!(padded.len(), 1);
    assert_eq!(padded[0].value(1), &DataValue::Text("edsger".into()));
    assert!(padded[0].value(3).is_null());
    Ok(())
}

#[test]
fn test_aggregation_with_group_by() -> Result<()> {
    let db = create_test_db(64)?;
    let oid = seed_users(&db)?;

    // Group by age: count(*) and min(id)
    let plan = PlanNode::Aggregation {
        group_by: vec![Expression::column(2)],
        aggregates: vec![
            (AggregationType::CountStar, Expression::column(0)),
            (AggregationType::Min, Expression::column(0)),
        ],
        child: Box::new(scan(oid)),
    };
    let rows = sorted_rows(run_committed(&db, &plan)?);
    assert_eq!(rows.len(), 3);

    // The age-45 group has two members, the youngest being grace (id 2)
    let group_45: Vec<&Tuple> = rows
        .iter()
        .filter(|t| t.value(0) == &DataValue::Integer(45))
        .collect();
    assert_eq!(group_45.len(), 1);
    assert_eq!(group_45[0].value(1), &DataValue::Integer(2));
    assert_eq!(group_45[0].value(2), &DataValue::Integer(2));
    Ok(())
}

#[test]
fn test_aggregation_on_empty_input() -> Result<()> {
    let db = create_test_db(64)?;
    let table = create_users_table(&db)?;

    // No rows, no group-by: one row of initial aggregate values
    let plan = PlanNode::Aggregation {
        group_by: vec![],
        aggregates: vec![
            (AggregationType::CountStar, Expression::column(0)),
            (AggregationType::Sum, Expression::column(2)),
            (AggregationType::Max, Expression::column(2)),
        ],
        child: Box::new(scan(table.oid)),
    };
    let rows = run_committed(&db, &plan)?;
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].values,
        vec![DataValue::Integer(0), DataValue::Null, DataValue::Null]
    );

    // With a group-by clause an empty input yields no groups
    let plan = PlanNode::Aggregation {
        group_by: vec![Expression::column(2)],
        aggregates: vec![(AggregationType::CountStar, Expression::column(0))],
        child: Box::new(scan(table.oid)),
    };
    let rows = run_committed(&db, &plan)?;
    assert!(rows.is_empty());
    Ok(())
}

#[test]
fn test_sum_and_count_skip_nulls() -> Result<()> {
    let db = create_test_db(64)?;
    let schema = Schema::new(vec![Column::new("v", DataType::Integer)]);
    let table = db.catalog.create_table("vals", schema.clone())?;
    run_committed(
        &db,
        &insert_plan(
            table.oid,
            schema,
            vec![
                vec![DataValue::Integer(10)],
                vec![DataValue::Null],
                vec![DataValue::Integer(5)],
            ],
        ),
    )?;

    let plan = PlanNode::Aggregation {
        group_by: vec![],
        aggregates: vec![
            (AggregationType::CountStar, Expression::column(0)),
            (AggregationType::Count, Expression::column(0)),
            (AggregationType::Sum, Expression::column(0)),
        ],
        child: Box::new(scan(table.oid)),
    };
    let rows = run_committed(&db, &plan)?;
    assert_eq!(
        rows[0].values,
        vec![
            DataValue::Integer(3),
            DataValue::Integer(2),
            DataValue::Integer(15)
        ]
    );
    Ok(())
}

#[test]
fn test_sort_orders_rows() -> Result<()> {
    let db = create_test_db(64)?;
    let oid = seed_users(&db)?;

    let plan = PlanNode::Sort {
        order_by: vec![
            (OrderByType::Desc, Expression::column(2)),
            (OrderByType::Asc, Expression::column(0)),
        ],
        child: Box::new(scan(oid)),
    };
    let rows = run_committed(&db, &plan)?;
    let ids: Vec<&DataValue> = rows.iter().map(|t| t.value(0)).collect();
    // ages desc: 72, then the two 45s tie-broken by id, then 36
    assert_eq!(
        ids,
        vec![
            &DataValue::Integer(3),
            &DataValue::Integer(2),
            &DataValue::Integer(4),
            &DataValue::Integer(1)
        ]
    );
    Ok(())
}

#[test]
fn test_sort_limit_matches_top_n() -> Result<()> {
    let db = create_test_db(64)?;
    let oid = seed_users(&db)?;

    let order_by = vec![
        (OrderByType::Asc, Expression::column(2)),
        (OrderByType::Asc, Expression::column(0)),
    ];
    let sort_limit = PlanNode::Limit {
        limit: 3,
        child: Box::new(PlanNode::Sort {
            order_by: order_by.clone(),
            child: Box::new(scan(oid)),
        }),
    };

    // The rewrite produces a single top-n node
    let top_n = optimizer::sort_limit_as_top_n(sort_limit.clone());
    assert!(matches!(top_n, PlanNode::TopN { n: 3, .. }));

    let expected = run_committed(&db, &sort_limit)?;
    let actual = run_committed(&db, &top_n)?;
    assert_eq!(expected.len(), 3);
    assert_eq!(expected, actual);
    Ok(())
}

#[test]
fn test_top_n_descending() -> Result<()> {
    let db = create_test_db(64)?;
    let oid = seed_users(&db)?;

    let plan = PlanNode::TopN {
        n: 2,
        order_by: vec![
            (OrderByType::Desc, Expression::column(2)),
            (OrderByType::Asc, Expression::column(0)),
        ],
        child: Box::new(scan(oid)),
    };
    let rows = run_committed(&db, &plan)?;
    let ids: Vec<&DataValue> = rows.iter().map(|t| t.value(0)).collect();
    assert_eq!(ids, vec![&DataValue::Integer(3), &DataValue::Integer(2)]);
    Ok(())
}

#[test]
fn test_optimize_applies_both_rules() -> Result<()> {
    let db = create_test_db(64)?;
    let (people, items) = seed_join_tables(&db)?;

    // Limit over sort over an equi-join: both rewrites fire. The second
    // sort key makes the expected prefix unambiguous.
    let plan = PlanNode::Limit {
        limit: 2,
        child: Box::new(PlanNode::Sort {
            order_by: vec![
                (OrderByType::Asc, Expression::column(0)),
                (OrderByType::Asc, Expression::column(3)),
            ],
            child: Box::new(PlanNode::NestedLoopJoin {
                join_type: JoinType::Inner,
                predicate: join_predicate(),
                left: Box::new(scan(people)),
                right: Box::new(scan(items)),
            }),
        }),
    };
    let optimized = optimizer::optimize(plan.clone());
    let PlanNode::TopN { ref child, .. } = optimized else {
        panic!("expected top-n at the root");
    };
    assert!(matches!(**child, PlanNode::HashJoin { .. }));

    let expected = run_committed(&db, &plan)?;
    let actual = run_committed(&db, &optimized)?;
    assert_eq!(expected, actual);
    Ok(())
}
