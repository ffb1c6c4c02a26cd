use super::locks::OrderLocks;
use super::payout::{PayoutDispatcher, RetryPolicy, TransferOutcome};
use crate::domain::alert::{AdminAlert, AlertKind};
use crate::domain::booking::Booking;
use crate::domain::event::{META_IDEMPOTENCY_KEY, META_ORDER_ID, META_TIP_ID};
use crate::domain::ledger::ChangeSet;
use crate::domain::money::{Cents, FeeRate};
use crate::domain::order::{NewOrder, Order, OrderId, OrderStatus, PaymentStatus, TransferStatus};
use crate::domain::payout::{LedgerStatus, Payout, Transfer, TransferKind};
use crate::domain::ports::{
    LedgerStoreRef, Notification, NotificationKind, NotifierRef, PaymentGatewayRef,
    PayoutAccountRegistryRef, TransferRequest,
};
use crate::domain::settlement::split;
use crate::domain::tip::Tip;
use crate::error::{Result, SettlementError};
use crate::settings::Settings;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const MAX_CONFLICT_RETRIES: u32 = 3;

/// How a transfer event identifies the transfer it is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEventRef {
    pub transfer_ref: String,
    pub order_id: Option<OrderId>,
    pub idempotency_key: Option<String>,
}

/// An order with every row it owns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderView {
    pub order: Order,
    pub booking: Option<Booking>,
    pub tips: Vec<Tip>,
    pub payouts: Vec<Payout>,
    pub transfers: Vec<Transfer>,
}

/// The Order Lifecycle Engine.
///
/// Every transition takes the order's lock, re-reads the order from the
/// store, applies the domain transition and commits all affected rows in one
/// `ChangeSet`. A rejected transition leaves the store untouched.
pub struct OrderLifecycle {
    store: LedgerStoreRef,
    gateway: PaymentGatewayRef,
    dispatcher: PayoutDispatcher,
    notifier: NotifierRef,
    locks: OrderLocks,
    fee_rate: FeeRate,
    currency: String,
}

fn transfer_metadata(order_id: OrderId, tip_id: Option<Uuid>, key: &str) -> HashMap<String, String> {
    let mut metadata = HashMap::from([
        (META_ORDER_ID.to_string(), order_id.to_string()),
        (META_IDEMPOTENCY_KEY.to_string(), key.to_string()),
    ]);
    if let Some(tip_id) = tip_id {
        metadata.insert(META_TIP_ID.to_string(), tip_id.to_string());
    }
    metadata
}

fn ensure_party(order: &Order, actor: &str, expected: &str) -> Result<()> {
    if actor != expected {
        return Err(SettlementError::NotOwner {
            order: order.order_number.clone(),
            actor: actor.to_string(),
        });
    }
    Ok(())
}

impl OrderLifecycle {
    pub fn new(
        store: LedgerStoreRef,
        gateway: PaymentGatewayRef,
        registry: PayoutAccountRegistryRef,
        notifier: NotifierRef,
        settings: &Settings,
    ) -> Result<Self> {
        let dispatcher = PayoutDispatcher::new(
            gateway.clone(),
            registry,
            RetryPolicy::from_settings(&settings.gateway),
        );
        Ok(Self {
            store,
            gateway,
            dispatcher,
            notifier,
            locks: OrderLocks::new(),
            fee_rate: settings.fee_rate()?,
            currency: settings.currency.to_ascii_lowercase(),
        })
    }

    pub fn store(&self) -> &LedgerStoreRef {
        &self.store
    }

    pub fn locks(&self) -> &OrderLocks {
        &self.locks
    }

    pub fn fee_rate(&self) -> FeeRate {
        self.fee_rate
    }

    async fn retry_on_conflict<T, F, Fut>(&self, order_number: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(SettlementError::ConcurrentModification(_)) if attempt + 1 < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    debug!(order = %order_number, attempt, "concurrent modification; retrying");
                }
                other => return other,
            }
        }
    }

    async fn by_id(&self, id: OrderId) -> Result<Order> {
        self.store
            .order(id)
            .await?
            .ok_or_else(|| SettlementError::NotFound {
                entity: "order",
                key: id.to_string(),
            })
    }

    async fn by_number(&self, order_number: &str) -> Result<Order> {
        self.store
            .order_by_number(order_number)
            .await?
            .ok_or_else(|| SettlementError::NotFound {
                entity: "order",
                key: order_number.to_string(),
            })
    }

    /// Takes the order's lock and re-reads it, so the caller sees the latest committed state.
    async fn lock(&self, order_id: OrderId) -> Result<(OwnedMutexGuard<()>, Order)> {
        let guard = self.locks.acquire(order_id).await;
        let order = self.by_id(order_id).await?;
        Ok((guard, order))
    }

    async fn commit(&self, mut changes: ChangeSet) -> Result<Order> {
        changes.order.updated_at = Utc::now();
        self.store.commit(changes).await
    }

    async fn booking_for(&self, order: &Order) -> Result<Booking> {
        match self.store.booking(order.id).await? {
            Some(booking) => Ok(booking),
            None => {
                warn!(order = %order.order_number, "booking missing; synthesizing from order");
                let mut booking = Booking::for_order(order, Utc::now());
                booking.repaired = true;
                Ok(booking)
            }
        }
    }

    /// Notifications never affect the outcome of a transition.
    async fn notify(&self, kind: NotificationKind, order: &Order, recipient: &str, reason: Option<String>) {
        let notification = Notification {
            kind,
            order_number: order.order_number.clone(),
            recipient: recipient.to_string(),
            reason,
        };
        if let Err(e) = self.notifier.notify(notification).await {
            warn!(order = %order.order_number, ?kind, error = %e, "notification failed");
        }
    }

    async fn create_intent(&self, amount: Cents, currency: &str, metadata: HashMap<String, String>) -> Result<String> {
        let gateway = self.gateway.clone();
        let intent = self
            .dispatcher
            .policy()
            .run("create_payment_intent", || {
                let gateway = gateway.clone();
                let currency = currency.to_string();
                let metadata = metadata.clone();
                async move { gateway.create_payment_intent(amount, &currency, metadata).await }
            })
            .await?;
        Ok(intent.id)
    }

    /// Creates the order and its payment intent.
    #[instrument(skip_all, fields(order = %new.order_number))]
    pub async fn checkout(&self, mut new: NewOrder) -> Result<Order> {
        if new.order_number.trim().is_empty() {
            return Err(SettlementError::ValidationError(
                "order number must not be empty".to_string(),
            ));
        }
        if new.total_amount.is_zero() {
            return Err(SettlementError::ValidationError(
                "order amount must be positive".to_string(),
            ));
        }
        if new.currency.trim().is_empty() {
            new.currency = self.currency.clone();
        }
        new.currency = new.currency.to_ascii_lowercase();
        if self.store.order_by_number(&new.order_number).await?.is_some() {
            return Err(SettlementError::ValidationError(format!(
                "order number {} already exists",
                new.order_number
            )));
        }

        let mut order = Order::checkout(new, Utc::now());
        let metadata = HashMap::from([(META_ORDER_ID.to_string(), order.id.to_string())]);
        let intent_id = self
            .create_intent(order.total_amount, &order.currency, metadata)
            .await?;
        order.payment_intent_id = Some(intent_id);

        let order = self.commit(ChangeSet::new(order)).await?;
        info!(total = %order.total_amount, "order created");
        Ok(order)
    }

    /// Payment webhook success for an order or tip intent.
    #[instrument(skip(self))]
    pub async fn record_payment_succeeded(&self, intent_id: &str, amount: Cents) -> Result<Order> {
        if let Some(order) = self.store.order_by_payment_intent(intent_id).await? {
            return self
                .retry_on_conflict(&order.order_number, || self.apply_order_payment(order.id, amount))
                .await;
        }
        if let Some(tip) = self.store.tip_by_payment_intent(intent_id).await? {
            return self
                .retry_on_conflict(intent_id, || self.apply_tip_payment(tip.order_id, tip.id, amount))
                .await;
        }
        Err(SettlementError::DataInconsistency(format!(
            "payment intent {intent_id} matches no order or tip"
        )))
    }

    async fn apply_order_payment(&self, order_id: OrderId, amount: Cents) -> Result<Order> {
        let (_guard, mut order) = self.lock(order_id).await?;
        if order.payment_status == PaymentStatus::Failed {
            return self.refund_late_capture(order).await;
        }
        order.record_payment(amount)?;

        // the booking is written in the same commit as the payment
        let mut changes = ChangeSet::new(order.clone());
        if self.store.booking(order_id).await?.is_none() {
            changes = changes.with_booking(Booking::for_order(&order, Utc::now()));
        }
        let order = self.commit(changes).await?;
        info!(order = %order.order_number, "payment recorded");

        if order.status == OrderStatus::Cancelled {
            // declined while the payment was still settling
            return self.refund_declined(order).await;
        }
        self.notify(NotificationKind::PaymentReceived, &order, &order.celebrity_id, None)
            .await;
        Ok(order)
    }

    async fn apply_tip_payment(&self, order_id: OrderId, tip_id: Uuid, amount: Cents) -> Result<Order> {
        let (_guard, order) = self.lock(order_id).await?;
        let mut tip = self
            .store
            .tip(tip_id)
            .await?
            .ok_or_else(|| SettlementError::NotFound {
                entity: "tip",
                key: tip_id.to_string(),
            })?;
        tip.record_payment(amount)?;

        let now = Utc::now();
        let mut changes = ChangeSet::new(order.clone()).with_tip(tip.clone());
        let transfer = match self.dispatcher.resolve_destination(&order.celebrity_id).await {
            Ok(destination) => {
                let mut transfer = Transfer::tip(&tip, Some(destination.clone()), now);
                let outcome = self
                    .dispatcher
                    .dispatch(TransferRequest {
                        destination,
                        amount: tip.amount,
                        currency: tip.currency.clone(),
                        idempotency_key: transfer.idempotency_key.clone(),
                        metadata: transfer_metadata(order.id, Some(tip.id), &transfer.idempotency_key),
                    })
                    .await;
                match outcome {
                    TransferOutcome::Submitted { transfer_ref } => {
                        transfer.mark_in_transit(Some(transfer_ref), now)?;
                    }
                    TransferOutcome::Unknown => {
                        transfer.mark_in_transit(None, now)?;
                        changes = changes.with_alert(AdminAlert::new(
                            Some(order.id),
                            AlertKind::TransferOutcomeUnknown,
                            format!("tip {} transfer timed out; outcome unknown", tip.id),
                            now,
                        ));
                    }
                    TransferOutcome::Failed { reason } => {
                        transfer.mark_failed(reason.clone(), now)?;
                        changes = changes.with_alert(AdminAlert::new(
                            Some(order.id),
                            AlertKind::TipTransferFailed,
                            format!("tip {} transfer failed: {reason}", tip.id),
                            now,
                        ));
                    }
                }
                transfer
            }
            Err(SettlementError::PayoutAccountMissing { celebrity }) => {
                let mut transfer = Transfer::tip(&tip, None, now);
                transfer.mark_failed("no chargeable payout account".to_string(), now)?;
                changes = changes.with_alert(AdminAlert::new(
                    Some(order.id),
                    AlertKind::TipTransferFailed,
                    format!("tip {} held: celebrity {celebrity} has no payout account", tip.id),
                    now,
                ));
                transfer
            }
            Err(e) => return Err(e),
        };

        let order = self.commit(changes.with_transfer(transfer)).await?;
        info!(order = %order.order_number, tip = %tip.id, "tip payment recorded");
        Ok(order)
    }

    /// Payment webhook failure for an order or tip intent.
    #[instrument(skip(self))]
    pub async fn record_payment_failed(&self, intent_id: &str, reason: Option<String>) -> Result<Order> {
        if let Some(order) = self.store.order_by_payment_intent(intent_id).await? {
            return self
                .retry_on_conflict(&order.order_number, || async {
                    let (_guard, mut order) = self.lock(order.id).await?;
                    order.record_payment_failure(reason.clone())?;
                    let order = self.commit(ChangeSet::new(order)).await?;
                    info!(order = %order.order_number, "payment failed; order cancelled");
                    Ok(order)
                })
                .await;
        }
        if let Some(tip) = self.store.tip_by_payment_intent(intent_id).await? {
            return self
                .retry_on_conflict(intent_id, || async {
                    let (_guard, order) = self.lock(tip.order_id).await?;
                    let mut tip = self.store.tip(tip.id).await?.ok_or_else(|| {
                        SettlementError::NotFound {
                            entity: "tip",
                            key: tip.id.to_string(),
                        }
                    })?;
                    tip.record_payment_failure()?;
                    self.commit(ChangeSet::new(order).with_tip(tip)).await
                })
                .await;
        }
        Err(SettlementError::DataInconsistency(format!(
            "payment intent {intent_id} matches no order or tip"
        )))
    }

    /// Celebrity accepts the request.
    #[instrument(skip(self))]
    pub async fn accept(&self, order_number: &str, celebrity_id: &str) -> Result<Order> {
        let id = self.by_number(order_number).await?.id;
        let order = self
            .retry_on_conflict(order_number, || async {
                let (_guard, mut order) = self.lock(id).await?;
                ensure_party(&order, celebrity_id, &order.celebrity_id)?;
                order.accept()?;
                let mut booking = self.booking_for(&order).await?;
                booking.sync_with(&order);
                self.commit(ChangeSet::new(order).with_booking(booking)).await
            })
            .await?;
        self.notify(NotificationKind::BookingConfirmed, &order, &order.customer_id, None)
            .await;
        Ok(order)
    }

    /// Celebrity declines. A captured payment is refunded right away.
    #[instrument(skip(self))]
    pub async fn decline(&self, order_number: &str, celebrity_id: &str, reason: &str) -> Result<Order> {
        let id = self.by_number(order_number).await?.id;
        self.retry_on_conflict(order_number, || async {
            let (_guard, mut order) = self.lock(id).await?;
            ensure_party(&order, celebrity_id, &order.celebrity_id)?;
            let needs_refund = order.decline(reason.to_string())?;
            let mut booking = self.booking_for(&order).await?;
            booking.sync_with(&order);
            let order = self.commit(ChangeSet::new(order).with_booking(booking)).await?;
            info!(order = %order.order_number, needs_refund, "order declined");
            self.notify(
                NotificationKind::BookingDeclined,
                &order,
                &order.customer_id,
                order.status_reason.clone(),
            )
            .await;

            if needs_refund {
                self.refund_declined(order).await
            } else {
                Ok(order)
            }
        })
        .await
    }

    /// Refunds a declined, paid order. The caller holds the order lock.
    async fn refund_declined(&self, mut order: Order) -> Result<Order> {
        let now = Utc::now();
        let Some(intent_id) = order.payment_intent_id.clone() else {
            let alert = AdminAlert::new(
                Some(order.id),
                AlertKind::RefundFailed,
                format!("order {} has no payment intent to refund", order.order_number),
                now,
            );
            return self.commit(ChangeSet::new(order).with_alert(alert)).await;
        };

        match self
            .dispatcher
            .refund(&intent_id, &order.refund_idempotency_key())
            .await
        {
            Ok(refund_id) => {
                order.record_decline_refund(refund_id)?;
                let order = self.commit(ChangeSet::new(order)).await?;
                info!(order = %order.order_number, "declined order refunded");
                self.notify(
                    NotificationKind::Refunded,
                    &order,
                    &order.customer_id,
                    order.status_reason.clone(),
                )
                .await;
                Ok(order)
            }
            Err(e) => {
                warn!(order = %order.order_number, error = %e, "refund after decline failed");
                let alert = AdminAlert::new(
                    Some(order.id),
                    AlertKind::RefundFailed,
                    format!("refund for declined order {} failed: {e}", order.order_number),
                    now,
                );
                self.commit(ChangeSet::new(order).with_alert(alert)).await
            }
        }
    }

    /// The gateway captured a payment it had already reported as failed.
    /// The order stays cancelled; the capture is refunded and flagged for
    /// reconciliation. The caller holds the order lock.
    async fn refund_late_capture(&self, mut order: Order) -> Result<Order> {
        warn!(order = %order.order_number, "payment captured after it was reported failed");
        let now = Utc::now();
        let intent_id = order.payment_intent_id.clone().ok_or_else(|| {
            SettlementError::internal(format!(
                "order {} has no payment intent",
                order.order_number
            ))
        })?;

        let alert = match self
            .dispatcher
            .refund(&intent_id, &order.refund_idempotency_key())
            .await
        {
            Ok(refund_id) => {
                order.record_late_capture_refund(refund_id)?;
                AdminAlert::new(
                    Some(order.id),
                    AlertKind::LateCaptureRefunded,
                    format!(
                        "payment for order {} captured after failure; refunded",
                        order.order_number
                    ),
                    now,
                )
            }
            Err(e) => AdminAlert::new(
                Some(order.id),
                AlertKind::RefundFailed,
                format!(
                    "late capture on order {} could not be refunded: {e}",
                    order.order_number
                ),
                now,
            ),
        };

        let order = self.commit(ChangeSet::new(order).with_alert(alert)).await?;
        if order.payment_status == PaymentStatus::Refunded {
            self.notify(
                NotificationKind::Refunded,
                &order,
                &order.customer_id,
                order.status_reason.clone(),
            )
            .await;
        }
        Ok(order)
    }

    /// Celebrity uploads the video.
    #[instrument(skip(self))]
    pub async fn deliver(&self, order_number: &str, celebrity_id: &str, video_url: &str) -> Result<Order> {
        if video_url.trim().is_empty() {
            return Err(SettlementError::ValidationError(
                "video url must not be empty".to_string(),
            ));
        }
        let id = self.by_number(order_number).await?.id;
        let order = self
            .retry_on_conflict(order_number, || async {
                let (_guard, mut order) = self.lock(id).await?;
                ensure_party(&order, celebrity_id, &order.celebrity_id)?;
                order.deliver(video_url.to_string())?;
                self.commit(ChangeSet::new(order)).await
            })
            .await?;
        self.notify(NotificationKind::VideoDelivered, &order, &order.customer_id, None)
            .await;
        Ok(order)
    }

    /// Customer approves the video: the split is fixed and the payout dispatched.
    ///
    /// Fails with `PayoutAccountMissing` before anything is written if the
    /// celebrity cannot receive money. A transfer failure does not undo the
    /// approval; the order is left with `transfer_status = FAILED` and an alert.
    #[instrument(skip(self))]
    pub async fn approve(&self, order_number: &str, customer_id: &str) -> Result<Order> {
        let id = self.by_number(order_number).await?.id;
        let order = self
            .retry_on_conflict(order_number, || async {
                let (_guard, mut order) = self.lock(id).await?;
                ensure_party(&order, customer_id, &order.customer_id)?;
                order.ensure_can_approve()?;
                let destination = self
                    .dispatcher
                    .resolve_destination(&order.celebrity_id)
                    .await?;

                order.approve(split(order.total_amount, self.fee_rate), self.fee_rate)?;
                let mut booking = self.booking_for(&order).await?;
                booking.sync_with(&order);
                let changes = self.dispatch_order_transfer(order, destination).await?;
                self.commit(changes.with_booking(booking)).await
            })
            .await?;

        info!(
            order = %order.order_number,
            platform_fee = ?order.platform_fee.map(|c| c.value()),
            celebrity_amount = ?order.celebrity_amount.map(|c| c.value()),
            transfer_status = %order.transfer_status,
            "order approved"
        );
        self.notify(NotificationKind::OrderApproved, &order, &order.celebrity_id, None)
            .await;
        if order.transfer_status == TransferStatus::Failed {
            self.notify(NotificationKind::PayoutFailed, &order, &order.celebrity_id, None)
                .await;
        }
        Ok(order)
    }

    /// Requests the transfer for an order whose `transfer_status` is IN_TRANSIT
    /// and returns the change set recording it.
    async fn dispatch_order_transfer(&self, mut order: Order, destination: String) -> Result<ChangeSet> {
        let now = Utc::now();
        let mut payout = Payout::for_order(&order, now)?;
        let mut transfer = Transfer::booking_payment(&order, Some(destination.clone()), now)?;
        let key = order.transfer_idempotency_key();

        let outcome = self
            .dispatcher
            .dispatch(TransferRequest {
                destination,
                amount: payout.amount,
                currency: order.currency.clone(),
                idempotency_key: key.clone(),
                metadata: transfer_metadata(order.id, None, &key),
            })
            .await;

        let alert = match outcome {
            TransferOutcome::Submitted { transfer_ref } => {
                payout.mark_in_transit(Some(transfer_ref.clone()), now)?;
                transfer.mark_in_transit(Some(transfer_ref), now)?;
                None
            }
            TransferOutcome::Unknown => {
                payout.mark_in_transit(None, now)?;
                transfer.mark_in_transit(None, now)?;
                Some(AdminAlert::new(
                    Some(order.id),
                    AlertKind::TransferOutcomeUnknown,
                    format!(
                        "transfer {key} for order {} timed out; awaiting gateway confirmation",
                        order.order_number
                    ),
                    now,
                ))
            }
            TransferOutcome::Failed { reason } => {
                order.mark_transfer_failed()?;
                payout.mark_failed(reason.clone(), now)?;
                transfer.mark_failed(reason.clone(), now)?;
                Some(AdminAlert::new(
                    Some(order.id),
                    AlertKind::TransferFailed,
                    format!("transfer for order {} failed: {reason}", order.order_number),
                    now,
                ))
            }
        };

        let mut changes = ChangeSet::new(order).with_payout(payout).with_transfer(transfer);
        if let Some(alert) = alert {
            changes = changes.with_alert(alert);
        }
        Ok(changes)
    }

    async fn find_transfer(&self, event: &TransferEventRef) -> Result<Transfer> {
        if let Some(transfer) = self.store.transfer_by_ref(&event.transfer_ref).await? {
            return Ok(transfer);
        }
        // a timed-out request has no reference yet; match on the idempotency key
        if let (Some(order_id), Some(key)) = (event.order_id, event.idempotency_key.as_deref())
            && let Some(transfer) = self
                .store
                .transfers(order_id)
                .await?
                .into_iter()
                .find(|t| t.idempotency_key == key)
        {
            return Ok(transfer);
        }
        Err(SettlementError::DataInconsistency(format!(
            "transfer {} is not recorded",
            event.transfer_ref
        )))
    }

    /// Transfer webhook success.
    #[instrument(skip(self), fields(transfer_ref = %event.transfer_ref))]
    pub async fn record_transfer_paid(&self, event: &TransferEventRef) -> Result<Order> {
        self.settle_transfer(event, None).await
    }

    /// Transfer webhook failure. Approval and completion are not reversed.
    #[instrument(skip(self), fields(transfer_ref = %event.transfer_ref))]
    pub async fn record_transfer_failed(&self, event: &TransferEventRef, reason: &str) -> Result<Order> {
        let order = self.settle_transfer(event, Some(reason)).await?;
        if order.transfer_status == TransferStatus::Failed {
            self.notify(
                NotificationKind::PayoutFailed,
                &order,
                &order.celebrity_id,
                Some(reason.to_string()),
            )
            .await;
        }
        Ok(order)
    }

    async fn settle_transfer(&self, event: &TransferEventRef, failure: Option<&str>) -> Result<Order> {
        let located = self.find_transfer(event).await?;
        let order_id = located.order_id;

        self.retry_on_conflict(&event.transfer_ref, || async {
            let (_guard, mut order) = self.lock(order_id).await?;
            if order.payment_status != PaymentStatus::Succeeded
                && located.kind == TransferKind::BookingPayment
            {
                return Err(SettlementError::DataInconsistency(format!(
                    "transfer event for order {} before its payment was recorded",
                    order.order_number
                )));
            }

            let mut transfer = self
                .store
                .transfers(order_id)
                .await?
                .into_iter()
                .find(|t| t.id == located.id)
                .ok_or_else(|| SettlementError::NotFound {
                    entity: "transfer",
                    key: located.id.to_string(),
                })?;
            if transfer.status != LedgerStatus::InTransit {
                return Err(SettlementError::InvalidStateTransition {
                    order: order.order_number.clone(),
                    action: "settle transfer",
                    state: format!("transfer {} {:?}", transfer.idempotency_key, transfer.status),
                });
            }
            transfer.transfer_ref.get_or_insert_with(|| event.transfer_ref.clone());

            let now = Utc::now();
            let mut changes = ChangeSet::new(order.clone());
            match transfer.kind {
                TransferKind::BookingPayment => {
                    let mut payout = self
                        .store
                        .payouts(order_id)
                        .await?
                        .into_iter()
                        .find(|p| p.idempotency_key == transfer.idempotency_key)
                        .ok_or_else(|| {
                            SettlementError::DataInconsistency(format!(
                                "no payout for transfer {}",
                                transfer.idempotency_key
                            ))
                        })?;
                    payout.transfer_ref.get_or_insert_with(|| event.transfer_ref.clone());
                    let current_epoch = transfer.idempotency_key == order.transfer_idempotency_key();

                    match failure {
                        None => {
                            payout.mark_paid(now)?;
                            transfer.mark_paid(now)?;
                            if current_epoch {
                                order.mark_transfer_paid()?;
                            }
                        }
                        Some(reason) => {
                            payout.mark_failed(reason.to_string(), now)?;
                            transfer.mark_failed(reason.to_string(), now)?;
                            if current_epoch {
                                order.mark_transfer_failed()?;
                            }
                            changes = changes.with_alert(AdminAlert::new(
                                Some(order.id),
                                AlertKind::TransferFailed,
                                format!(
                                    "transfer for order {} failed: {reason}",
                                    order.order_number
                                ),
                                now,
                            ));
                        }
                    }
                    changes.order = order;
                    changes = changes.with_payout(payout);
                }
                TransferKind::Tip => match failure {
                    None => transfer.mark_paid(now)?,
                    Some(reason) => {
                        transfer.mark_failed(reason.to_string(), now)?;
                        changes = changes.with_alert(AdminAlert::new(
                            Some(order_id),
                            AlertKind::TipTransferFailed,
                            format!("transfer {} failed: {reason}", transfer.idempotency_key),
                            now,
                        ));
                    }
                },
            }

            let order = self.commit(changes.with_transfer(transfer)).await?;
            info!(order = %order.order_number, transfer_status = %order.transfer_status, "transfer settled");
            Ok(order)
        })
        .await
    }

    /// Admin refund of a paid order that has not completed.
    #[instrument(skip(self))]
    pub async fn refund(&self, order_number: &str, reason: &str) -> Result<Order> {
        let id = self.by_number(order_number).await?.id;
        let order = self
            .retry_on_conflict(order_number, || async {
                let (_guard, order) = self.lock(id).await?;
                let mut refunded = order.clone();
                refunded.refund(reason.to_string())?;

                let intent_id = order.payment_intent_id.clone().ok_or_else(|| {
                    SettlementError::DataInconsistency(format!(
                        "order {} has no payment intent",
                        order.order_number
                    ))
                })?;
                let refund_id = self
                    .dispatcher
                    .refund(&intent_id, &order.refund_idempotency_key())
                    .await?;
                refunded.refund_id = Some(refund_id);

                let mut booking = self.booking_for(&refunded).await?;
                booking.sync_with(&refunded);
                self.commit(ChangeSet::new(refunded).with_booking(booking)).await
            })
            .await?;
        info!(order = %order.order_number, "order refunded");
        self.notify(
            NotificationKind::Refunded,
            &order,
            &order.customer_id,
            order.status_reason.clone(),
        )
        .await;
        Ok(order)
    }

    /// Admin retry of a FAILED transfer under a new idempotency key.
    #[instrument(skip(self))]
    pub async fn retry_transfer(&self, order_number: &str) -> Result<Order> {
        let id = self.by_number(order_number).await?.id;
        let order = self
            .retry_on_conflict(order_number, || async {
                let (_guard, mut order) = self.lock(id).await?;
                order.retry_transfer()?;
                let destination = self
                    .dispatcher
                    .resolve_destination(&order.celebrity_id)
                    .await?;
                let changes = self.dispatch_order_transfer(order, destination).await?;
                self.commit(changes).await
            })
            .await?;
        info!(
            order = %order.order_number,
            attempt = order.transfer_attempt,
            transfer_status = %order.transfer_status,
            "transfer retried"
        );
        if order.transfer_status == TransferStatus::Failed {
            self.notify(NotificationKind::PayoutFailed, &order, &order.celebrity_id, None)
                .await;
        }
        Ok(order)
    }

    /// Starts a tip payment on a paid order.
    #[instrument(skip(self), fields(amount = amount.value()))]
    pub async fn add_tip(&self, order_number: &str, amount: Cents) -> Result<Tip> {
        let id = self.by_number(order_number).await?.id;
        self.retry_on_conflict(order_number, || async {
            let (_guard, order) = self.lock(id).await?;
            order.ensure_accepts_tips()?;
            let mut tip = Tip::new(order.id, amount, order.currency.clone(), Utc::now())?;
            let metadata = HashMap::from([
                (META_ORDER_ID.to_string(), order.id.to_string()),
                (META_TIP_ID.to_string(), tip.id.to_string()),
            ]);
            tip.payment_intent_id = Some(self.create_intent(amount, &order.currency, metadata).await?);
            self.commit(ChangeSet::new(order).with_tip(tip.clone())).await?;
            Ok(tip)
        })
        .await
    }

    pub async fn order_view(&self, order_number: &str) -> Result<OrderView> {
        let order = self.by_number(order_number).await?;
        Ok(OrderView {
            booking: self.store.booking(order.id).await?,
            tips: self.store.tips(order.id).await?,
            payouts: self.store.payouts(order.id).await?,
            transfers: self.store.transfers(order.id).await?,
            order,
        })
    }

    /// Orders needing an admin: a failed transfer awaiting retry, or a
    /// cancelled order still holding the customer's payment.
    pub async fn reconciliation_queue(&self) -> Result<Vec<Order>> {
        Ok(self
            .store
            .orders()
            .await?
            .into_iter()
            .filter(|o| {
                o.transfer_status == TransferStatus::Failed
                    || (o.status == OrderStatus::Cancelled
                        && o.payment_status == PaymentStatus::Succeeded)
            })
            .collect())
    }

    pub async fn alerts(&self) -> Result<Vec<AdminAlert>> {
        self.store.alerts().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{ApprovalStatus, VideoRequest};
    use crate::domain::ports::PayoutAccount;
    use crate::infrastructure::in_memory::{
        InMemoryLedgerStore, InMemoryPayoutAccountRegistry, RecordingNotifier,
    };
    use crate::infrastructure::sandbox::SandboxGateway;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct Fixture {
        lifecycle: OrderLifecycle,
        registry: InMemoryPayoutAccountRegistry,
        notifier: RecordingNotifier,
    }

    fn fixture_with(notifier: RecordingNotifier) -> Fixture {
        let registry = InMemoryPayoutAccountRegistry::new();
        let lifecycle = OrderLifecycle::new(
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(SandboxGateway::new("whsec", 300)),
            Arc::new(registry.clone()),
            Arc::new(notifier.clone()),
            &Settings::default(),
        )
        .unwrap();
        Fixture {
            lifecycle,
            registry,
            notifier,
        }
    }

    fn new_order(number: &str) -> NewOrder {
        NewOrder {
            order_number: number.to_string(),
            customer_id: "fan-1".to_string(),
            celebrity_id: "celeb-1".to_string(),
            total_amount: Cents::from_major(dec!(299.00)).unwrap(),
            currency: String::new(),
            request: VideoRequest {
                recipient_name: "Sam".to_string(),
                ..Default::default()
            },
        }
    }

    async fn delivered(f: &Fixture, number: &str) -> Order {
        let order = f.lifecycle.checkout(new_order(number)).await.unwrap();
        let intent = order.payment_intent_id.clone().unwrap();
        f.lifecycle
            .record_payment_succeeded(&intent, order.total_amount)
            .await
            .unwrap();
        f.lifecycle.accept(number, "celeb-1").await.unwrap();
        f.lifecycle
            .deliver(number, "celeb-1", "https://cdn/v.mp4")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_checkout_uses_default_currency() {
        let f = fixture_with(RecordingNotifier::new());
        let order = f.lifecycle.checkout(new_order("SO-1")).await.unwrap();
        assert_eq!(order.currency, "usd");
        assert!(order.payment_intent_id.is_some());
        assert!(f.lifecycle.checkout(new_order("SO-1")).await.is_err());
    }

    #[tokio::test]
    async fn test_only_the_celebrity_may_accept() {
        let f = fixture_with(RecordingNotifier::new());
        let order = f.lifecycle.checkout(new_order("SO-1")).await.unwrap();
        f.lifecycle
            .record_payment_succeeded(order.payment_intent_id.as_deref().unwrap(), order.total_amount)
            .await
            .unwrap();

        let result = f.lifecycle.accept("SO-1", "celeb-2").await;
        assert!(matches!(result, Err(SettlementError::NotOwner { .. })));
        let view = f.lifecycle.order_view("SO-1").await.unwrap();
        assert_eq!(view.order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_missing_payout_account_blocks_approval() {
        let f = fixture_with(RecordingNotifier::new());
        let before = delivered(&f, "SO-1").await;

        let result = f.lifecycle.approve("SO-1", "fan-1").await;
        assert!(matches!(
            result,
            Err(SettlementError::PayoutAccountMissing { .. })
        ));

        let view = f.lifecycle.order_view("SO-1").await.unwrap();
        assert_eq!(view.order, before);
        assert!(view.payouts.is_empty());
        assert!(view.transfers.is_empty());
    }

    #[tokio::test]
    async fn test_approval_snapshots_fee_rate() {
        let f = fixture_with(RecordingNotifier::new());
        f.registry
            .register(
                "celeb-1",
                PayoutAccount {
                    account_id: "acct_1".to_string(),
                    chargeable: true,
                },
            )
            .await;
        delivered(&f, "SO-1").await;

        let order = f.lifecycle.approve("SO-1", "fan-1").await.unwrap();
        assert_eq!(order.fee_rate_percent, Some(20));
        assert_eq!(order.approval_status, Some(ApprovalStatus::Approved));
        assert_eq!(order.platform_fee, Some(Cents::new(5980).unwrap()));
    }

    #[tokio::test]
    async fn test_failing_notifier_does_not_block_transitions() {
        let f = fixture_with(RecordingNotifier::failing());
        let order = delivered(&f, "SO-1").await;
        assert_eq!(order.approval_status, Some(ApprovalStatus::PendingApproval));
        assert!(f.notifier.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_notifications_are_sent() {
        let f = fixture_with(RecordingNotifier::new());
        delivered(&f, "SO-1").await;
        let kinds: Vec<NotificationKind> = f.notifier.sent().await.iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![
                NotificationKind::PaymentReceived,
                NotificationKind::BookingConfirmed,
                NotificationKind::VideoDelivered,
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_intent_is_inconsistent() {
        let f = fixture_with(RecordingNotifier::new());
        let result = f
            .lifecycle
            .record_payment_succeeded("pi_unknown", Cents::new(100).unwrap())
            .await;
        assert!(matches!(result, Err(SettlementError::DataInconsistency(_))));
    }
}
