//! Close-recovery scenarios: dust, vanished balances, executed exits, and
//! retry backoff.

mod common;

use chrono::Utc;
use common::*;
use rust_decimal_macros::dec;
use wontrader::domain::position::{CloseReason, PositionStatus};
use wontrader::domain::recovery::RecoveryStatus;
use wontrader::domain::repositories::{PositionRepository, RecoveryTaskRepository};
use wontrader::infrastructure::exchange::simulated::SimFailure;

#[tokio::test]
async fn test_dust_position_is_closed_with_warning() {
    let h = harness();
    // 5 XRP at 200 KRW = 1000 KRW, well under the 5100 minimum
    let position = insert_open_position(&h, krw_xrp(), "DCA", dec!(200), dec!(5)).await;
    h.exchange.set_price(&krw_xrp(), dec!(200));
    h.exchange.set_balance("XRP", dec!(5));

    h.recovery
        .enqueue(
            "DCA",
            &position.id,
            krw_xrp(),
            dec!(5),
            dec!(200),
            dec!(200),
            "sell rejected",
        )
        .await
        .unwrap();
    h.recovery.poll_once().await.unwrap();

    let closed = h.positions.find_by_id(&position.id).await.unwrap().unwrap();
    assert_eq!(closed.status, PositionStatus::Closed);
    assert_eq!(closed.exit_reason, Some(CloseReason::RecoveryDust));
    assert!(h.notifier.has_alert_containing("Dust position closed"));

    let task = h
        .recovery_tasks
        .find_active_by_position("DCA", &position.id)
        .await
        .unwrap();
    assert!(task.is_none(), "completed task is no longer active");
}

#[tokio::test]
async fn test_vanished_balance_closes_position() {
    let h = harness();
    let position = insert_open_position(&h, krw_xrp(), "DCA", dec!(200), dec!(50)).await;
    h.exchange.set_price(&krw_xrp(), dec!(210));
    h.exchange.set_balance("XRP", dec!(0));

    h.recovery
        .enqueue(
            "DCA",
            &position.id,
            krw_xrp(),
            dec!(50),
            dec!(200),
            dec!(205),
            "api error on exit",
        )
        .await
        .unwrap();
    h.recovery.poll_once().await.unwrap();

    let closed = h.positions.find_by_id(&position.id).await.unwrap().unwrap();
    assert_eq!(closed.exit_reason, Some(CloseReason::RecoveryNoBalance));
    // Closed at the last known price carried by the task
    assert_eq!(closed.exit_price, Some(dec!(205)));
}

#[tokio::test]
async fn test_recovery_executes_the_exit() {
    let h = harness();
    let position = insert_open_position(&h, krw_xrp(), "DCA", dec!(200), dec!(50)).await;
    h.exchange.set_price(&krw_xrp(), dec!(210));
    h.exchange.set_balance("XRP", dec!(50));

    h.recovery
        .enqueue(
            "DCA",
            &position.id,
            krw_xrp(),
            dec!(50),
            dec!(200),
            dec!(205),
            "sell rejected",
        )
        .await
        .unwrap();
    h.recovery.poll_once().await.unwrap();

    let closed = h.positions.find_by_id(&position.id).await.unwrap().unwrap();
    assert_eq!(closed.status, PositionStatus::Closed);
    assert_eq!(closed.exit_reason, Some(CloseReason::RecoveryExecuted));
    assert!(closed.pnl_percent.unwrap() > 0.0);

    // The exit went through the executor and left a sell trade behind
    use wontrader::domain::repositories::TradeRepository;
    let trades = h.trades.find_by_market(&krw_xrp(), false).await.unwrap();
    assert_eq!(trades.len(), 1);
}

#[tokio::test]
async fn test_already_closed_position_completes_task() {
    let h = harness();
    let position = insert_open_position(&h, krw_xrp(), "DCA", dec!(200), dec!(50)).await;

    let task = h
        .recovery
        .enqueue(
            "DCA",
            &position.id,
            krw_xrp(),
            dec!(50),
            dec!(200),
            dec!(205),
            "sell rejected",
        )
        .await
        .unwrap();

    // Reconciliation (or an operator) closes it first
    use wontrader::domain::position::CloseFill;
    let fill = CloseFill::from_prices(
        dec!(200),
        dec!(50),
        dec!(210),
        Utc::now(),
        CloseReason::Manual,
    );
    h.positions.close(&position.id, &fill).await.unwrap();

    h.recovery.poll_once().await.unwrap();

    let stored = h
        .recovery_tasks
        .find_active_by_position("DCA", &position.id)
        .await
        .unwrap();
    assert!(stored.is_none());
    // The manual close reason is preserved
    let closed = h.positions.find_by_id(&position.id).await.unwrap().unwrap();
    assert_eq!(closed.exit_reason, Some(CloseReason::Manual));
    drop(task);
}

#[tokio::test]
async fn test_failed_exit_backs_off_and_warns_eventually() {
    let h = harness_with(|_, workers, _| {
        workers.recovery_warn_every = 2;
    });
    let position = insert_open_position(&h, krw_xrp(), "DCA", dec!(200), dec!(50)).await;
    h.exchange.set_price(&krw_xrp(), dec!(210));
    h.exchange.set_balance("XRP", dec!(50));

    h.recovery
        .enqueue(
            "DCA",
            &position.id,
            krw_xrp(),
            dec!(50),
            dec!(200),
            dec!(205),
            "sell rejected",
        )
        .await
        .unwrap();

    // First attempt fails at submission
    h.exchange.fail_next_order(SimFailure::Rejected);
    h.recovery.poll_once().await.unwrap();

    let task = h
        .recovery_tasks
        .find_active_by_position("DCA", &position.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.status, RecoveryStatus::Retrying);
    assert_eq!(task.attempt_count, 1);
    assert!(task.next_attempt_at > Utc::now());

    // Not due yet: polling again does nothing
    h.recovery.poll_once().await.unwrap();
    let unchanged = h
        .recovery_tasks
        .find_active_by_position("DCA", &position.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unchanged.attempt_count, 1);

    // Force the task due and fail again: attempt 2 hits the warn cadence
    let mut due_now = unchanged.clone();
    due_now.next_attempt_at = Utc::now();
    h.recovery_tasks.update(&due_now).await.unwrap();
    h.exchange.fail_next_order(SimFailure::Rejected);
    h.recovery.poll_once().await.unwrap();

    assert!(h.notifier.has_alert_containing("Close recovery keeps failing"));
    let position_state = h.positions.find_by_id(&position.id).await.unwrap().unwrap();
    assert_eq!(position_state.status, PositionStatus::Open);
}

#[tokio::test]
async fn test_duplicate_enqueue_keeps_single_task() {
    let h = harness();
    let position = insert_open_position(&h, krw_xrp(), "DCA", dec!(200), dec!(50)).await;

    let first = h
        .recovery
        .enqueue(
            "DCA",
            &position.id,
            krw_xrp(),
            dec!(50),
            dec!(200),
            dec!(205),
            "first failure",
        )
        .await
        .unwrap();
    let second = h
        .recovery
        .enqueue(
            "DCA",
            &position.id,
            krw_xrp(),
            dec!(48),
            dec!(200),
            dec!(199),
            "second failure",
        )
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.target_quantity, dec!(48));
    assert_eq!(second.reason, "second failure");

    let due = h.recovery_tasks.find_due(Utc::now(), 10).await.unwrap();
    assert_eq!(due.len(), 1);
}
