use std::sync::Arc;
use std::thread;
use std::time::Duration;
use anyhow::Result;

use terndb::common::types::Rid;
use terndb::transaction::{
    AbortReason, IsolationLevel, LockManager, LockMode, TransactionManager, TransactionState,
};

fn setup() -> (Arc<LockManager>, Arc<TransactionManager>) {
    let lock_manager = Arc::new(LockManager::new());
    let txn_manager = TransactionManager::new(lock_manager.clone());
    (lock_manager, txn_manager)
}

#[test]
fn test_lock_unlock_round_trip() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn, LockMode::Shared, 1)?);
    assert!(txn.holds_table_lock(LockMode::Shared, 1));

    assert!(lm.unlock_table(&txn, 1)?);
    assert!(!txn.holds_table_lock(LockMode::Shared, 1));
    // Unlocking S under repeatable read starts the shrinking phase
    assert_eq!(txn.state(), TransactionState::Shrinking);
    Ok(())
}

#[test]
fn test_same_mode_relock_is_a_noop() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn, LockMode::IntentionShared, 1)?);
    assert!(lm.lock_table(&txn, LockMode::IntentionShared, 1)?);
    assert!(lm.unlock_table(&txn, 1)?);
    // A second unlock has nothing to release
    assert_eq!(
        lm.unlock_table(&txn, 1).unwrap_err().reason,
        AbortReason::AttemptedUnlockButNoLockHeld
    );
    Ok(())
}

#[test]
fn test_upgrade_is_to_x() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn, LockMode::IntentionShared, 1)?);
    assert!(lm.lock_table(&txn, LockMode::Exclusive, 1)?);
    assert!(!txn.holds_table_lock(LockMode::IntentionShared, 1));
    assert!(txn.holds_table_lock(LockMode::Exclusive, 1));
    Ok(())
}

#[test]
fn test_incompatible_upgrade_aborts() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn, LockMode::Exclusive, 1)?);
    let err = lm.lock_table(&txn, LockMode::Shared, 1).unwrap_err();
    assert_eq!(err.reason, AbortReason::IncompatibleUpgrade);
    assert_eq!(txn.state(), TransactionState::Aborted);
    Ok(())
}

#[test]
fn test_read_uncommitted_rejects_shared_locks() {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::ReadUncommitted);

    let err = lm.lock_table(&txn, LockMode::Shared, 1).unwrap_err();
    assert_eq!(err.reason, AbortReason::LockSharedOnReadUncommitted);
    assert_eq!(txn.state(), TransactionState::Aborted);
}

#[test]
fn test_read_uncommitted_allows_exclusive_locks() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::ReadUncommitted);

    assert!(lm.lock_table(&txn, LockMode::IntentionExclusive, 1)?);
    assert!(lm.lock_table(&txn, LockMode::Exclusive, 2)?);
    Ok(())
}

#[test]
fn test_lock_on_shrinking_aborts() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn, LockMode::Shared, 1)?);
    assert!(lm.unlock_table(&txn, 1)?);
    assert_eq!(txn.state(), TransactionState::Shrinking);

    let err = lm.lock_table(&txn, LockMode::Shared, 2).unwrap_err();
    assert_eq!(err.reason, AbortReason::LockOnShrinking);
    Ok(())
}

#[test]
fn test_read_committed_may_take_s_while_shrinking() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::ReadCommitted);

    assert!(lm.lock_table(&txn, LockMode::Exclusive, 1)?);
    assert!(lm.unlock_table(&txn, 1)?);
    assert_eq!(txn.state(), TransactionState::Shrinking);

    // IS and S stay permitted under read committed
    assert!(lm.lock_table(&txn, LockMode::IntentionShared, 2)?);
    assert!(lm.lock_table(&txn, LockMode::Shared, 3)?);

    // Exclusive-class modes do not
    let err = lm.lock_table(&txn, LockMode::IntentionExclusive, 4).unwrap_err();
    assert_eq!(err.reason, AbortReason::LockOnShrinking);
    Ok(())
}

#[test]
fn test_row_lock_requires_table_lock() -> Result<()> {
    let (lm, tm) = setup();
    let rid = Rid::new(5, 0);

    // No table lock at all
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    let err = lm.lock_row(&txn, LockMode::Shared, 1, rid).unwrap_err();
    assert_eq!(err.reason, AbortReason::TableLockNotPresent);

    // S on the table is not enough for an X row
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&txn, LockMode::Shared, 1)?);
    let err = lm.lock_row(&txn, LockMode::Exclusive, 1, rid).unwrap_err();
    assert_eq!(err.reason, AbortReason::TableLockNotPresent);

    // IX covers X rows
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&txn, LockMode::IntentionExclusive, 1)?);
    assert!(lm.lock_row(&txn, LockMode::Exclusive, 1, rid)?);
    assert!(txn.holds_row_lock(LockMode::Exclusive, 1, rid));
    tm.commit(&txn);
    Ok(())
}

#[test]
fn test_intention_lock_on_row_aborts() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&txn, LockMode::IntentionShared, 1)?);

    let err = lm
        .lock_row(&txn, LockMode::IntentionShared, 1, Rid::new(5, 0))
        .unwrap_err();
    assert_eq!(err.reason, AbortReason::AttemptedIntentionLockOnRow);
    Ok(())
}

#[test]
fn test_table_unlock_blocked_by_row_locks() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(5, 0);

    assert!(lm.lock_table(&txn, LockMode::IntentionExclusive, 1)?);
    assert!(lm.lock_row(&txn, LockMode::Exclusive, 1, rid)?);

    let err = lm.unlock_table(&txn, 1).unwrap_err();
    assert_eq!(err.reason, AbortReason::TableUnlockedBeforeUnlockingRows);
    Ok(())
}

#[test]
fn test_forced_row_unlock_skips_2pl_transition() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(5, 0);

    assert!(lm.lock_table(&txn, LockMode::IntentionShared, 1)?);
    assert!(lm.lock_row(&txn, LockMode::Shared, 1, rid)?);
    assert!(lm.unlock_row(&txn, 1, rid, true)?);

    // A forced unlock keeps the growing phase open
    assert_eq!(txn.state(), TransactionState::Growing);
    assert!(!txn.holds_row_lock(LockMode::Shared, 1, rid));
    Ok(())
}

#[test]
fn test_shared_locks_are_concurrent() -> Result<()> {
    let (lm, tm) = setup();
    let txn_a = tm.begin(IsolationLevel::RepeatableRead);
    let txn_b = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn_a, LockMode::Shared, 1)?);
    assert!(lm.lock_table(&txn_b, LockMode::Shared, 1)?);
    tm.commit(&txn_a);
    tm.commit(&txn_b);
    Ok(())
}

#[test]
fn test_exclusive_lock_blocks_until_release() -> Result<()> {
    let (lm, tm) = setup();
    let txn_a = tm.begin(IsolationLevel::RepeatableRead);
    let txn_b = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn_a, LockMode::Exclusive, 1)?);

    let waiter = {
        let lm = lm.clone();
        let txn_b = txn_b.clone();
        thread::spawn(move || lm.lock_table(&txn_b, LockMode::Exclusive, 1))
    };

    // Give the waiter time to block, then release
    thread::sleep(Duration::from_millis(100));
    tm.commit(&txn_a);

    let granted = waiter.join().expect("waiter panicked")?;
    assert!(granted);
    tm.commit(&txn_b);
    Ok(())
}

#[test]
fn test_deadlock_detection_aborts_youngest() -> Result<()> {
    let (lm, tm) = setup();
    let txn_a = tm.begin(IsolationLevel::RepeatableRead);
    let txn_b = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn_a, LockMode::Exclusive, 1)?);
    assert!(lm.lock_table(&txn_b, LockMode::Exclusive, 2)?);

    // A waits for B's table while B waits for A's: a cycle the detector
    // must break by aborting the younger transaction (B).
    let handle_a = {
        let (lm, txn_a) = (lm.clone(), txn_a.clone());
        thread::spawn(move || lm.lock_table(&txn_a, LockMode::Exclusive, 2))
    };
    let handle_b = {
        let (lm, txn_b) = (lm.clone(), txn_b.clone());
        thread::spawn(move || lm.lock_table(&txn_b, LockMode::Exclusive, 1))
    };

    let result_b = handle_b.join().expect("txn b thread panicked")?;
    assert!(!result_b, "the victim's lock call must return false");
    assert_eq!(txn_b.state(), TransactionState::Aborted);

    // Releasing the victim's locks lets the survivor finish
    tm.abort(&txn_b);
    let result_a = handle_a.join().expect("txn a thread panicked")?;
    assert!(result_a);
    tm.commit(&txn_a);
    Ok(())
}

#[test]
fn test_upgrade_conflict_aborts_second_upgrader() -> Result<()> {
    let (lm, tm) = setup();
    let txn_a = tm.begin(IsolationLevel::RepeatableRead);
    let txn_b = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&txn_a, LockMode::Shared, 1)?);
    assert!(lm.lock_table(&txn_b, LockMode::Shared, 1)?);

    // A starts an upgrade and blocks on B's shared lock
    let handle_a = {
        let (lm, txn_a) = (lm.clone(), txn_a.clone());
        thread::spawn(move || lm.lock_table(&txn_a, LockMode::Exclusive, 1))
    };
    thread::sleep(Duration::from_millis(100));

    // B's competing upgrade hits the occupied upgrade slot
    let err = lm.lock_table(&txn_b, LockMode::Exclusive, 1).unwrap_err();
    assert_eq!(err.reason, AbortReason::UpgradeConflict);

    // Releasing B unblocks A's upgrade
    tm.abort(&txn_b);
    let granted = handle_a.join().expect("txn a thread panicked")?;
    assert!(granted);
    assert!(txn_a.holds_table_lock(LockMode::Exclusive, 1));
    tm.commit(&txn_a);
    Ok(())
}

#[test]
fn test_commit_releases_everything() -> Result<()> {
    let (lm, tm) = setup();
    let txn = tm.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(9, 3);

    assert!(lm.lock_table(&txn, LockMode::IntentionExclusive, 1)?);
    assert!(lm.lock_row(&txn, LockMode::Exclusive, 1, rid)?);
    tm.commit(&txn);

    assert!(txn.held_table_locks().is_empty());
    assert!(txn.held_row_locks().is_empty());

    // Another transaction can grab the table exclusively right away
    let txn2 = tm.begin(IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&txn2, LockMode::Exclusive, 1)?);
    tm.commit(&txn2);
    Ok(())
}
