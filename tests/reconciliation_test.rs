//! Reconciliation scenarios: confirmed sell fills, vanished balances,
//! quantity mismatches, and idempotence.

mod common;

use chrono::{Duration, Utc};
use common::*;
use rust_decimal_macros::dec;
use uuid::Uuid;
use wontrader::application::reconciliation::ReconcileAction;
use wontrader::domain::exchange::{ExchangeOrder, ExchangeSide, OrderState};
use wontrader::domain::position::{CloseReason, PositionStatus};
use wontrader::domain::repositories::PositionRepository;

fn sell_fill(market: wontrader::domain::market::Market, price: rust_decimal::Decimal, quantity: rust_decimal::Decimal, at: chrono::DateTime<Utc>) -> ExchangeOrder {
    ExchangeOrder {
        uuid: Uuid::new_v4().to_string(),
        market,
        side: ExchangeSide::Ask,
        state: OrderState::Done,
        price: Some(price),
        volume: Some(quantity),
        executed_volume: quantity,
        locked: rust_decimal::Decimal::ZERO,
        paid_fee: rust_decimal::Decimal::ZERO,
        created_at: at,
    }
}

#[tokio::test]
async fn test_confirmed_sell_fill_closes_position() {
    let h = harness();
    let position = insert_open_position(&h, krw_xrp(), "DCA", dec!(200), dec!(5)).await;

    // Balance is gone; a matching sell fill exists ten minutes after entry
    h.exchange.set_price(&krw_xrp(), dec!(210));
    h.exchange.set_balance("XRP", dec!(0));
    h.exchange.push_done_order(sell_fill(
        krw_xrp(),
        dec!(210),
        dec!(5),
        position.entry_time + Duration::minutes(10),
    ));

    let report = h.reconciliation.reconcile_once().await.unwrap();
    assert_eq!(report.fixed, 1);
    assert!(matches!(
        report.actions[0],
        ReconcileAction::ClosedConfirmed { .. }
    ));

    let closed = h.positions.find_by_id(&position.id).await.unwrap().unwrap();
    assert_eq!(closed.status, PositionStatus::Closed);
    assert_eq!(closed.exit_reason, Some(CloseReason::SyncConfirmed));
    assert_eq!(closed.exit_price, Some(dec!(210)));
    assert!((closed.pnl_percent.unwrap() - 5.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_no_matching_fill_closes_with_estimate() {
    let h = harness();
    let position = insert_open_position(&h, krw_xrp(), "DCA", dec!(200), dec!(5)).await;

    h.exchange.set_price(&krw_xrp(), dec!(195));
    h.exchange.set_balance("XRP", dec!(0));
    // No sell fill anywhere in the recent history

    let report = h.reconciliation.reconcile_once().await.unwrap();
    assert_eq!(report.fixed, 1);
    assert!(matches!(
        report.actions[0],
        ReconcileAction::ClosedNoBalance { .. }
    ));

    let closed = h.positions.find_by_id(&position.id).await.unwrap().unwrap();
    assert_eq!(closed.exit_reason, Some(CloseReason::SyncNoBalance));
    assert_eq!(closed.exit_price, Some(dec!(195)));
}

#[tokio::test]
async fn test_fill_quantity_outside_tolerance_is_ignored() {
    let h = harness();
    let position = insert_open_position(&h, krw_xrp(), "DCA", dec!(200), dec!(5)).await;

    h.exchange.set_price(&krw_xrp(), dec!(210));
    h.exchange.set_balance("XRP", dec!(0));
    // 3.0 sold vs 5.0 held: outside the 10% tolerance, so not "the" exit
    h.exchange.push_done_order(sell_fill(
        krw_xrp(),
        dec!(210),
        dec!(3),
        position.entry_time + Duration::minutes(5),
    ));

    let report = h.reconciliation.reconcile_once().await.unwrap();
    assert_eq!(report.fixed, 1);
    assert!(matches!(
        report.actions[0],
        ReconcileAction::ClosedNoBalance { .. }
    ));
}

#[tokio::test]
async fn test_quantity_mismatch_is_reported_not_fixed() {
    let h = harness();
    let position = insert_open_position(&h, krw_xrp(), "DCA", dec!(200), dec!(5)).await;

    h.exchange.set_price(&krw_xrp(), dec!(200));
    h.exchange.set_balance("XRP", dec!(4));

    let report = h.reconciliation.reconcile_once().await.unwrap();
    assert_eq!(report.fixed, 0);
    assert_eq!(report.verified, 0);
    assert!(matches!(
        report.actions[0],
        ReconcileAction::QuantityMismatch { .. }
    ));
    assert!(h.notifier.has_alert_containing("quantity mismatch")
        || h.notifier.has_alert_containing("Position quantity mismatch"));

    // The position itself is untouched
    let still_open = h.positions.find_by_id(&position.id).await.unwrap().unwrap();
    assert_eq!(still_open.status, PositionStatus::Open);
}

#[tokio::test]
async fn test_matching_balance_verifies_positions() {
    let h = harness();
    insert_open_position(&h, krw_xrp(), "DCA", dec!(200), dec!(5)).await;
    insert_open_position(&h, krw_xrp(), "SCALPER", dec!(205), dec!(2)).await;

    h.exchange.set_price(&krw_xrp(), dec!(200));
    // Aggregate across strategies: 7 coins held, tiny dust difference
    h.exchange.set_balance("XRP", dec!(7.0001));

    let report = h.reconciliation.reconcile_once().await.unwrap();
    assert_eq!(report.fixed, 0);
    assert_eq!(report.verified, 2);
    assert!(report.actions.is_empty());
}

#[tokio::test]
async fn test_reconciliation_is_idempotent() {
    let h = harness();
    let position = insert_open_position(&h, krw_xrp(), "DCA", dec!(200), dec!(5)).await;

    h.exchange.set_price(&krw_xrp(), dec!(210));
    h.exchange.set_balance("XRP", dec!(0));
    h.exchange.push_done_order(sell_fill(
        krw_xrp(),
        dec!(210),
        dec!(5),
        position.entry_time + Duration::minutes(10),
    ));

    let first = h.reconciliation.reconcile_once().await.unwrap();
    assert_eq!(first.fixed, 1);

    // Second pass with no intervening events: nothing changes
    let second = h.reconciliation.reconcile_once().await.unwrap();
    assert_eq!(second.fixed, 0);
    assert!(second.actions.is_empty());
}

#[tokio::test]
async fn test_audit_log_records_fixes() {
    let h = harness();
    insert_open_position(&h, krw_xrp(), "DCA", dec!(200), dec!(5)).await;
    h.exchange.set_price(&krw_xrp(), dec!(200));
    h.exchange.set_balance("XRP", dec!(0));

    h.reconciliation.reconcile_once().await.unwrap();

    let entries = h.audit.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, "RECONCILE");
    assert!(entries[0].detail.contains("SYNC_NO_BALANCE"));
}
