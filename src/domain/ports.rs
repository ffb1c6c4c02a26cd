use super::alert::AdminAlert;
use super::booking::Booking;
use super::event::GatewayEvent;
use super::ledger::ChangeSet;
use super::money::Cents;
use super::order::{Order, OrderId};
use super::payout::{Payout, Transfer};
use super::tip::Tip;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn order(&self, id: OrderId) -> Result<Option<Order>>;
    async fn order_by_number(&self, order_number: &str) -> Result<Option<Order>>;
    async fn order_by_payment_intent(&self, intent_id: &str) -> Result<Option<Order>>;
    async fn orders(&self) -> Result<Vec<Order>>;
    async fn booking(&self, order_id: OrderId) -> Result<Option<Booking>>;
    async fn tip(&self, tip_id: Uuid) -> Result<Option<Tip>>;
    async fn tips(&self, order_id: OrderId) -> Result<Vec<Tip>>;
    async fn tip_by_payment_intent(&self, intent_id: &str) -> Result<Option<Tip>>;
    async fn payouts(&self, order_id: OrderId) -> Result<Vec<Payout>>;
    async fn transfers(&self, order_id: OrderId) -> Result<Vec<Transfer>>;
    async fn transfer_by_ref(&self, transfer_ref: &str) -> Result<Option<Transfer>>;
    async fn alerts(&self) -> Result<Vec<AdminAlert>>;
    async fn record_alert(&self, alert: AdminAlert) -> Result<()>;
    /// Applies every row of `changes` atomically and returns the stored order.
    async fn commit(&self, changes: ChangeSet) -> Result<Order>;
}

/// A webhook event parked because it arrived before the state it depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredEvent {
    pub event: GatewayEvent,
    pub attempts: u32,
    pub last_error: String,
    pub deferred_at: DateTime<Utc>,
}

#[async_trait]
pub trait EventLog: Send + Sync {
    async fn is_processed(&self, event_id: &str) -> Result<bool>;
    async fn mark_processed(&self, event_id: &str) -> Result<()>;
    async fn defer(&self, deferred: DeferredEvent) -> Result<()>;
    async fn deferred(&self) -> Result<Vec<DeferredEvent>>;
    async fn remove_deferred(&self, event_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub destination: String,
    pub amount: Cents,
    pub currency: String,
    pub idempotency_key: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub transfer_id: String,
}

/// The external card processor. Consumed, not implemented, by the core.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_intent(
        &self,
        amount: Cents,
        currency: &str,
        metadata: HashMap<String, String>,
    ) -> std::result::Result<PaymentIntent, GatewayError>;

    async fn create_transfer(
        &self,
        request: TransferRequest,
    ) -> std::result::Result<TransferReceipt, GatewayError>;

    async fn create_refund(
        &self,
        intent_id: &str,
        idempotency_key: &str,
    ) -> std::result::Result<String, GatewayError>;

    /// Authenticates a webhook delivery and decodes it.
    fn verify_webhook(&self, payload: &[u8], signature: &str) -> Result<GatewayEvent>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutAccount {
    pub account_id: String,
    pub chargeable: bool,
}

#[async_trait]
pub trait PayoutAccountRegistry: Send + Sync {
    async fn payout_account(&self, celebrity_id: &str) -> Result<Option<PayoutAccount>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PaymentReceived,
    BookingConfirmed,
    BookingDeclined,
    VideoDelivered,
    OrderApproved,
    PayoutFailed,
    Refunded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub order_number: String,
    /// Customer or celebrity id the message is addressed to.
    pub recipient: String,
    pub reason: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

pub type LedgerStoreRef = Arc<dyn LedgerStore>;
pub type EventLogRef = Arc<dyn EventLog>;
pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;
pub type PayoutAccountRegistryRef = Arc<dyn PayoutAccountRegistry>;
pub type NotifierRef = Arc<dyn Notifier>;
