use crate::domain::alert::AdminAlert;
use crate::domain::booking::Booking;
use crate::domain::ledger::ChangeSet;
use crate::domain::order::{Order, OrderId};
use crate::domain::payout::{Payout, Transfer};
use crate::domain::ports::{
    DeferredEvent, EventLog, LedgerStore, Notification, Notifier, PayoutAccount,
    PayoutAccountRegistry,
};
use crate::domain::tip::Tip;
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

#[derive(Default)]
struct LedgerTables {
    orders: HashMap<OrderId, Order>,
    bookings: HashMap<OrderId, Booking>,
    tips: HashMap<Uuid, Tip>,
    payouts: HashMap<Uuid, Payout>,
    transfers: HashMap<Uuid, Transfer>,
    alerts: Vec<AdminAlert>,
}

impl LedgerTables {
    fn payouts_of(&self, order_id: OrderId) -> Vec<Payout> {
        let mut payouts: Vec<Payout> = self
            .payouts
            .values()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect();
        payouts.sort_by_key(|p| (p.attempt, p.created_at));
        payouts
    }
}

/// A thread-safe in-memory ledger.
///
/// All tables sit behind one `RwLock`, so a `commit` is atomic with respect
/// to every reader and writer.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    tables: Arc<RwLock<LedgerTables>>,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes a booking row. Only useful for simulating the missing-booking defect.
    pub async fn drop_booking(&self, order_id: OrderId) {
        self.tables.write().await.bookings.remove(&order_id);
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&id).cloned())
    }

    async fn order_by_number(&self, order_number: &str) -> Result<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables
            .orders
            .values()
            .find(|o| o.order_number == order_number)
            .cloned())
    }

    async fn order_by_payment_intent(&self, intent_id: &str) -> Result<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables
            .orders
            .values()
            .find(|o| o.payment_intent_id.as_deref() == Some(intent_id))
            .cloned())
    }

    async fn orders(&self) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        let mut orders: Vec<Order> = tables.orders.values().cloned().collect();
        orders.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.order_number.cmp(&b.order_number))
        });
        Ok(orders)
    }

    async fn booking(&self, order_id: OrderId) -> Result<Option<Booking>> {
        Ok(self.tables.read().await.bookings.get(&order_id).cloned())
    }

    async fn tip(&self, tip_id: Uuid) -> Result<Option<Tip>> {
        Ok(self.tables.read().await.tips.get(&tip_id).cloned())
    }

    async fn tips(&self, order_id: OrderId) -> Result<Vec<Tip>> {
        let tables = self.tables.read().await;
        let mut tips: Vec<Tip> = tables
            .tips
            .values()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect();
        tips.sort_by_key(|t| t.created_at);
        Ok(tips)
    }

    async fn tip_by_payment_intent(&self, intent_id: &str) -> Result<Option<Tip>> {
        let tables = self.tables.read().await;
        Ok(tables
            .tips
            .values()
            .find(|t| t.payment_intent_id.as_deref() == Some(intent_id))
            .cloned())
    }

    async fn payouts(&self, order_id: OrderId) -> Result<Vec<Payout>> {
        Ok(self.tables.read().await.payouts_of(order_id))
    }

    async fn transfers(&self, order_id: OrderId) -> Result<Vec<Transfer>> {
        let tables = self.tables.read().await;
        let mut transfers: Vec<Transfer> = tables
            .transfers
            .values()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect();
        transfers.sort_by_key(|t| t.created_at);
        Ok(transfers)
    }

    async fn transfer_by_ref(&self, transfer_ref: &str) -> Result<Option<Transfer>> {
        let tables = self.tables.read().await;
        Ok(tables
            .transfers
            .values()
            .find(|t| t.transfer_ref.as_deref() == Some(transfer_ref))
            .cloned())
    }

    async fn alerts(&self) -> Result<Vec<AdminAlert>> {
        Ok(self.tables.read().await.alerts.clone())
    }

    async fn record_alert(&self, alert: AdminAlert) -> Result<()> {
        self.tables.write().await.alerts.push(alert);
        Ok(())
    }

    async fn commit(&self, changes: ChangeSet) -> Result<Order> {
        let mut tables = self.tables.write().await;
        let stored = tables.orders.get(&changes.order.id);
        if stored.is_none()
            && tables
                .orders
                .values()
                .any(|o| o.order_number == changes.order.order_number)
        {
            return Err(SettlementError::ValidationError(format!(
                "order number {} already exists",
                changes.order.order_number
            )));
        }
        changes.check_against(stored, &tables.payouts_of(changes.order.id))?;

        let mut order = changes.order;
        order.version += 1;
        if let Some(booking) = changes.booking {
            tables.bookings.insert(booking.order_id, booking);
        }
        for tip in changes.tips {
            tables.tips.insert(tip.id, tip);
        }
        for payout in changes.payouts {
            tables.payouts.insert(payout.id, payout);
        }
        for transfer in changes.transfers {
            tables.transfers.insert(transfer.id, transfer);
        }
        tables.alerts.extend(changes.alerts);
        tables.orders.insert(order.id, order.clone());
        Ok(order)
    }
}

/// In-memory record of processed and deferred webhook events.
#[derive(Default, Clone)]
pub struct InMemoryEventLog {
    processed: Arc<RwLock<HashSet<String>>>,
    deferred: Arc<RwLock<HashMap<String, DeferredEvent>>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn is_processed(&self, event_id: &str) -> Result<bool> {
        Ok(self.processed.read().await.contains(event_id))
    }

    async fn mark_processed(&self, event_id: &str) -> Result<()> {
        self.processed.write().await.insert(event_id.to_string());
        Ok(())
    }

    async fn defer(&self, deferred: DeferredEvent) -> Result<()> {
        self.deferred
            .write()
            .await
            .insert(deferred.event.id.clone(), deferred);
        Ok(())
    }

    async fn deferred(&self) -> Result<Vec<DeferredEvent>> {
        let mut events: Vec<DeferredEvent> = self.deferred.read().await.values().cloned().collect();
        events.sort_by_key(|d| d.deferred_at);
        Ok(events)
    }

    async fn remove_deferred(&self, event_id: &str) -> Result<()> {
        self.deferred.write().await.remove(event_id);
        Ok(())
    }
}

/// Payout destinations keyed by celebrity id.
#[derive(Default, Clone)]
pub struct InMemoryPayoutAccountRegistry {
    accounts: Arc<RwLock<HashMap<String, PayoutAccount>>>,
}

impl InMemoryPayoutAccountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, celebrity_id: impl Into<String>, account: PayoutAccount) {
        self.accounts.write().await.insert(celebrity_id.into(), account);
    }
}

#[async_trait]
impl PayoutAccountRegistry for InMemoryPayoutAccountRegistry {
    async fn payout_account(&self, celebrity_id: &str) -> Result<Option<PayoutAccount>> {
        Ok(self.accounts.read().await.get(celebrity_id).cloned())
    }
}

/// Notifier that only logs. Stands in for the email service.
#[derive(Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        info!(
            kind = ?notification.kind,
            order = %notification.order_number,
            recipient = %notification.recipient,
            "notification dispatched"
        );
        Ok(())
    }
}

/// Notifier that keeps what it was asked to send, optionally failing every call.
#[derive(Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<RwLock<Vec<Notification>>>,
    failing: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        if self.failing {
            return Err(SettlementError::internal("mail relay unavailable"));
        }
        self.sent.write().await.push(notification);
        Ok(())
    }
}
