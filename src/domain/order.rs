use super::money::{Cents, FeeRate};
use super::settlement::Split;
use crate::error::SettlementError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque primary key of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub Uuid);

impl OrderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    PendingApproval,
    Completed,
    Cancelled,
    Refunded,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Refunded,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    PendingApproval,
    Approved,
    Declined,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    InTransit,
    Paid,
    Failed,
    Cancelled,
}

macro_rules! wire_names {
    ($ty:ident { $($variant:ident => $name:literal),* $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name,)*
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_names!(OrderStatus {
    Pending => "PENDING",
    Confirmed => "CONFIRMED",
    PendingApproval => "PENDING_APPROVAL",
    Completed => "COMPLETED",
    Cancelled => "CANCELLED",
    Refunded => "REFUNDED",
});
wire_names!(PaymentStatus {
    Pending => "PENDING",
    Succeeded => "SUCCEEDED",
    Failed => "FAILED",
    Refunded => "REFUNDED",
});
wire_names!(ApprovalStatus {
    PendingApproval => "PENDING_APPROVAL",
    Approved => "APPROVED",
    Declined => "DECLINED",
});
wire_names!(TransferStatus {
    Pending => "PENDING",
    InTransit => "IN_TRANSIT",
    Paid => "PAID",
    Failed => "FAILED",
    Cancelled => "CANCELLED",
});

/// What the customer asked the celebrity to record.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Default)]
pub struct VideoRequest {
    pub recipient_name: String,
    pub occasion: Option<String>,
    pub instructions: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
}

/// Input for creating an order at checkout.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub order_number: String,
    pub customer_id: String,
    pub celebrity_id: String,
    pub total_amount: Cents,
    pub currency: String,
    pub request: VideoRequest,
}

/// One purchase of a personalized video. Aggregate root for all financial state.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Order {
    pub id: OrderId,
    pub order_number: String,
    pub customer_id: String,
    pub celebrity_id: String,
    pub total_amount: Cents,
    pub platform_fee: Option<Cents>,
    pub celebrity_amount: Option<Cents>,
    /// Fee rate the split was computed with, kept for audit.
    pub fee_rate_percent: Option<u8>,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    /// `None` until content is delivered or the order is declined.
    pub approval_status: Option<ApprovalStatus>,
    pub transfer_status: TransferStatus,
    pub payment_intent_id: Option<String>,
    pub refund_id: Option<String>,
    pub request: VideoRequest,
    pub video_url: Option<String>,
    /// Human-readable reason shown to the customer on decline or refund.
    pub status_reason: Option<String>,
    /// Incremented on every manual transfer retry; part of the transfer idempotency key.
    pub transfer_attempt: u32,
    /// Optimistic concurrency token; bumped by the store on every commit.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Checkout: a new order awaiting payment.
    pub fn checkout(new: NewOrder, now: DateTime<Utc>) -> Self {
        Self {
            id: OrderId::new(),
            order_number: new.order_number,
            customer_id: new.customer_id,
            celebrity_id: new.celebrity_id,
            total_amount: new.total_amount,
            platform_fee: None,
            celebrity_amount: None,
            fee_rate_percent: None,
            currency: new.currency,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            approval_status: None,
            transfer_status: TransferStatus::Pending,
            payment_intent_id: None,
            refund_id: None,
            request: new.request,
            video_url: None,
            status_reason: None,
            transfer_attempt: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn state(&self) -> String {
        match self.approval_status {
            Some(approval) => format!(
                "{}/{}/{}/{}",
                self.status, self.payment_status, approval, self.transfer_status
            ),
            None => format!(
                "{}/{}/-/{}",
                self.status, self.payment_status, self.transfer_status
            ),
        }
    }

    fn reject(&self, action: &'static str) -> SettlementError {
        SettlementError::InvalidStateTransition {
            order: self.order_number.clone(),
            action,
            state: self.state(),
        }
    }

    /// Key handed to the gateway so a retried transfer request is deduplicated.
    pub fn transfer_idempotency_key(&self) -> String {
        format!("transfer-{}-{}", self.id, self.transfer_attempt)
    }

    pub fn refund_idempotency_key(&self) -> String {
        format!("refund-{}", self.id)
    }

    /// Whether a Booking row must exist for this order.
    pub fn requires_booking(&self) -> bool {
        let awaiting_payment =
            self.status == OrderStatus::Pending && self.payment_status == PaymentStatus::Pending;
        !awaiting_payment && self.payment_status != PaymentStatus::Failed
    }

    /// Payment webhook success.
    pub fn record_payment(&mut self, amount: Cents) -> Result<(), SettlementError> {
        if self.payment_status != PaymentStatus::Pending {
            return Err(self.reject("record payment"));
        }
        if amount != self.total_amount {
            return Err(SettlementError::DataInconsistency(format!(
                "order {} expected payment of {} but gateway reported {}",
                self.order_number, self.total_amount, amount
            )));
        }
        self.payment_status = PaymentStatus::Succeeded;
        Ok(())
    }

    /// Payment webhook failure.
    pub fn record_payment_failure(&mut self, reason: Option<String>) -> Result<(), SettlementError> {
        if self.payment_status != PaymentStatus::Pending || self.status != OrderStatus::Pending {
            return Err(self.reject("record payment failure"));
        }
        self.payment_status = PaymentStatus::Failed;
        self.status = OrderStatus::Cancelled;
        self.status_reason = reason.or_else(|| Some("Payment failed".to_string()));
        Ok(())
    }

    pub fn accept(&mut self) -> Result<(), SettlementError> {
        if self.status != OrderStatus::Pending || self.payment_status != PaymentStatus::Succeeded {
            return Err(self.reject("accept"));
        }
        self.status = OrderStatus::Confirmed;
        self.transfer_status = TransferStatus::Pending;
        Ok(())
    }

    /// Returns `true` when the customer was charged and must be refunded.
    pub fn decline(&mut self, reason: String) -> Result<bool, SettlementError> {
        if !matches!(self.status, OrderStatus::Pending | OrderStatus::Confirmed) {
            return Err(self.reject("decline"));
        }
        self.status = OrderStatus::Cancelled;
        self.approval_status = Some(ApprovalStatus::Declined);
        self.status_reason = Some(reason);
        Ok(self.payment_status == PaymentStatus::Succeeded)
    }

    pub fn deliver(&mut self, video_url: String) -> Result<(), SettlementError> {
        if self.status != OrderStatus::Confirmed || self.approval_status.is_some() {
            return Err(self.reject("deliver"));
        }
        self.approval_status = Some(ApprovalStatus::PendingApproval);
        self.video_url = Some(video_url);
        Ok(())
    }

    /// Checks the approval precondition without mutating.
    pub fn ensure_can_approve(&self) -> Result<(), SettlementError> {
        if self.approval_status != Some(ApprovalStatus::PendingApproval)
            || self.payment_status != PaymentStatus::Succeeded
        {
            return Err(self.reject("approve"));
        }
        Ok(())
    }

    /// Customer approval. The split is fixed and the transfer is in flight.
    pub fn approve(&mut self, split: Split, rate: FeeRate) -> Result<(), SettlementError> {
        self.ensure_can_approve()?;
        self.approval_status = Some(ApprovalStatus::Approved);
        self.status = OrderStatus::Completed;
        self.platform_fee = Some(split.platform_fee);
        self.celebrity_amount = Some(split.celebrity_amount);
        self.fee_rate_percent = Some(rate.percent());
        self.transfer_status = TransferStatus::InTransit;
        Ok(())
    }

    pub fn mark_transfer_paid(&mut self) -> Result<(), SettlementError> {
        if self.transfer_status != TransferStatus::InTransit {
            return Err(self.reject("mark transfer paid"));
        }
        self.transfer_status = TransferStatus::Paid;
        Ok(())
    }

    /// Downstream transfer failure. Approval and completion stand.
    pub fn mark_transfer_failed(&mut self) -> Result<(), SettlementError> {
        if self.transfer_status != TransferStatus::InTransit {
            return Err(self.reject("mark transfer failed"));
        }
        self.transfer_status = TransferStatus::Failed;
        Ok(())
    }

    /// Admin retry of a failed transfer; starts a new attempt epoch.
    pub fn retry_transfer(&mut self) -> Result<(), SettlementError> {
        if self.transfer_status != TransferStatus::Failed
            || self.approval_status != Some(ApprovalStatus::Approved)
        {
            return Err(self.reject("retry transfer"));
        }
        self.transfer_attempt += 1;
        self.transfer_status = TransferStatus::InTransit;
        Ok(())
    }

    /// Admin refund.
    pub fn refund(&mut self, reason: String) -> Result<(), SettlementError> {
        if self.payment_status != PaymentStatus::Succeeded || self.status == OrderStatus::Completed {
            return Err(self.reject("refund"));
        }
        self.payment_status = PaymentStatus::Refunded;
        self.status = OrderStatus::Refunded;
        if self.transfer_status == TransferStatus::Pending {
            self.transfer_status = TransferStatus::Cancelled;
        }
        self.status_reason = Some(reason);
        Ok(())
    }

    /// Records a refund issued automatically after decline.
    pub fn record_decline_refund(&mut self, refund_id: String) -> Result<(), SettlementError> {
        if self.status != OrderStatus::Cancelled || self.payment_status != PaymentStatus::Succeeded {
            return Err(self.reject("record refund"));
        }
        self.payment_status = PaymentStatus::Refunded;
        self.refund_id = Some(refund_id);
        Ok(())
    }

    /// Records the refund of a capture the gateway reported after the payment had failed.
    pub fn record_late_capture_refund(&mut self, refund_id: String) -> Result<(), SettlementError> {
        if self.payment_status != PaymentStatus::Failed {
            return Err(self.reject("refund late capture"));
        }
        self.payment_status = PaymentStatus::Refunded;
        self.refund_id = Some(refund_id);
        Ok(())
    }

    /// Tips are accepted only on a paid order that is still live.
    pub fn ensure_accepts_tips(&self) -> Result<(), SettlementError> {
        if self.payment_status != PaymentStatus::Succeeded
            || matches!(self.status, OrderStatus::Cancelled | OrderStatus::Refunded)
        {
            return Err(self.reject("add tip"));
        }
        Ok(())
    }

    /// Verifies the financial invariants of an order.
    pub fn check_invariants(&self) -> Result<(), SettlementError> {
        if let (Some(fee), Some(celebrity)) = (self.platform_fee, self.celebrity_amount)
            && fee + celebrity != self.total_amount
        {
            return Err(SettlementError::internal(format!(
                "order {}: fee {} + celebrity amount {} != total {}",
                self.order_number, fee, celebrity, self.total_amount
            )));
        }
        if matches!(
            self.transfer_status,
            TransferStatus::InTransit | TransferStatus::Paid
        ) && (self.payment_status != PaymentStatus::Succeeded
            || self.approval_status != Some(ApprovalStatus::Approved))
        {
            return Err(SettlementError::internal(format!(
                "order {}: transfer {} without settled payment and approval",
                self.order_number, self.transfer_status
            )));
        }
        Ok(())
    }
}
