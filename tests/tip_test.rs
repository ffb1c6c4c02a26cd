mod common;

use common::{CELEBRITY, harness, new_order};
use rust_decimal_macros::dec;
use shoutout::application::reconciler::ReconcileOutcome;
use shoutout::domain::alert::AlertKind;
use shoutout::domain::money::Cents;
use shoutout::domain::payout::{LedgerStatus, TransferKind};
use shoutout::domain::tip::TipPaymentStatus;
use shoutout::error::SettlementError;

#[tokio::test]
async fn test_tip_is_forwarded_in_full() {
    let h = harness();
    h.register_celebrity().await;
    let order = h.paid("SO-1").await;

    let tip = h
        .lifecycle
        .add_tip("SO-1", Cents::from_major(dec!(20.00)).unwrap())
        .await
        .unwrap();
    let intent = tip.payment_intent_id.clone().unwrap();
    let event = h
        .gateway
        .payment_event(&intent, true, Some("evt_tip_1".to_string()))
        .await
        .unwrap();
    assert_eq!(h.deliver(&event).await.unwrap(), ReconcileOutcome::Applied);

    let view = h.view("SO-1").await;
    assert_eq!(view.tips.len(), 1);
    assert_eq!(view.tips[0].payment_status, TipPaymentStatus::Succeeded);
    assert_eq!(view.transfers.len(), 1);
    let transfer = &view.transfers[0];
    assert_eq!(transfer.kind, TransferKind::Tip);
    assert_eq!(transfer.amount, Cents::new(2000).unwrap());
    assert_eq!(transfer.tip_id, Some(tip.id));
    assert_eq!(transfer.status, LedgerStatus::InTransit);

    // tips never touch the order's split or payout
    assert_eq!(view.order.platform_fee, None);
    assert_eq!(view.order.transfer_status, order.transfer_status);
    assert!(view.payouts.is_empty());

    let sent = h
        .gateway
        .transfer_by_key(&tip.transfer_idempotency_key())
        .await
        .unwrap();
    let paid = h
        .gateway
        .transfer_event(&sent.id, true, None, Some("evt_tip_paid".to_string()))
        .await
        .unwrap();
    assert_eq!(h.deliver(&paid).await.unwrap(), ReconcileOutcome::Applied);
    assert_eq!(h.view("SO-1").await.transfers[0].status, LedgerStatus::Paid);
}

#[tokio::test]
async fn test_tip_without_payout_account_is_held() {
    let h = harness();
    h.paid("SO-1").await;
    let tip = h
        .lifecycle
        .add_tip("SO-1", Cents::new(500).unwrap())
        .await
        .unwrap();
    let event = h
        .gateway
        .payment_event(tip.payment_intent_id.as_deref().unwrap(), true, None)
        .await
        .unwrap();
    assert_eq!(h.deliver(&event).await.unwrap(), ReconcileOutcome::Applied);

    let view = h.view("SO-1").await;
    assert_eq!(view.tips[0].payment_status, TipPaymentStatus::Succeeded);
    assert_eq!(view.transfers[0].status, LedgerStatus::Failed);
    assert!(view.transfers[0].destination.is_none());
    assert_eq!(h.gateway.transfer_calls().await, 0);

    let alerts = h.lifecycle.alerts().await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::TipTransferFailed);
    assert!(alerts[0].message.contains(CELEBRITY));
}

#[tokio::test]
async fn test_tips_need_a_paid_live_order() {
    let h = harness();
    h.lifecycle.checkout(new_order("SO-1")).await.unwrap();
    assert!(matches!(
        h.lifecycle.add_tip("SO-1", Cents::new(500).unwrap()).await,
        Err(SettlementError::InvalidStateTransition { .. })
    ));

    h.paid("SO-2").await;
    h.lifecycle.decline("SO-2", CELEBRITY, "No").await.unwrap();
    assert!(matches!(
        h.lifecycle.add_tip("SO-2", Cents::new(500).unwrap()).await,
        Err(SettlementError::InvalidStateTransition { .. })
    ));
    assert!(matches!(
        h.lifecycle.add_tip("SO-2", Cents::ZERO).await,
        Err(SettlementError::InvalidStateTransition { .. }) | Err(SettlementError::ValidationError(_))
    ));
}
