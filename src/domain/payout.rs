use super::money::Cents;
use super::order::{Order, OrderId};
use super::tip::Tip;
use crate::error::SettlementError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status shared by Payout and Transfer rows.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerStatus {
    Pending,
    InTransit,
    Paid,
    Failed,
}

impl LedgerStatus {
    fn settle(&mut self, order_id: OrderId, to: LedgerStatus) -> Result<(), SettlementError> {
        let legal = matches!(
            (*self, to),
            (LedgerStatus::Pending, LedgerStatus::InTransit)
                | (LedgerStatus::Pending, LedgerStatus::Failed)
                | (LedgerStatus::InTransit, LedgerStatus::Paid)
                | (LedgerStatus::InTransit, LedgerStatus::Failed)
        );
        if !legal {
            return Err(SettlementError::InvalidStateTransition {
                order: order_id.to_string(),
                action: "settle ledger row",
                state: format!("{:?} -> {:?}", self, to),
            });
        }
        *self = to;
        Ok(())
    }
}

/// Money sent to a celebrity for one order, one row per transfer attempt.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Payout {
    pub id: Uuid,
    pub order_id: OrderId,
    pub celebrity_id: String,
    pub amount: Cents,
    /// Denormalized for audit.
    pub platform_fee: Cents,
    pub currency: String,
    pub status: LedgerStatus,
    pub attempt: u32,
    pub idempotency_key: String,
    pub transfer_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payout {
    /// Payout for the order's current attempt epoch. The split must already be resolved.
    pub fn for_order(order: &Order, now: DateTime<Utc>) -> Result<Self, SettlementError> {
        let (Some(amount), Some(platform_fee)) = (order.celebrity_amount, order.platform_fee) else {
            return Err(SettlementError::internal(format!(
                "order {} has no resolved split",
                order.order_number
            )));
        };
        Ok(Self {
            id: Uuid::new_v4(),
            order_id: order.id,
            celebrity_id: order.celebrity_id.clone(),
            amount,
            platform_fee,
            currency: order.currency.clone(),
            status: LedgerStatus::Pending,
            attempt: order.transfer_attempt,
            idempotency_key: order.transfer_idempotency_key(),
            transfer_ref: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// The gateway accepted the transfer, or may have; `transfer_ref` is `None` when the outcome is unknown.
    pub fn mark_in_transit(&mut self, transfer_ref: Option<String>, now: DateTime<Utc>) -> Result<(), SettlementError> {
        self.status.settle(self.order_id, LedgerStatus::InTransit)?;
        self.transfer_ref = transfer_ref;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_paid(&mut self, now: DateTime<Utc>) -> Result<(), SettlementError> {
        self.status.settle(self.order_id, LedgerStatus::Paid)?;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: String, now: DateTime<Utc>) -> Result<(), SettlementError> {
        self.status.settle(self.order_id, LedgerStatus::Failed)?;
        self.failure_reason = Some(reason);
        self.updated_at = now;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    /// The celebrity's share of an order.
    BookingPayment,
    /// A tip, forwarded in full.
    Tip,
}

/// General movement of funds out of the platform balance.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Transfer {
    pub id: Uuid,
    pub order_id: OrderId,
    pub kind: TransferKind,
    pub tip_id: Option<Uuid>,
    pub destination: Option<String>,
    pub amount: Cents,
    pub currency: String,
    pub status: LedgerStatus,
    pub idempotency_key: String,
    pub transfer_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transfer {
    /// The booking-payment ledger row matching `Payout::for_order`.
    pub fn booking_payment(order: &Order, destination: Option<String>, now: DateTime<Utc>) -> Result<Self, SettlementError> {
        let amount = order.celebrity_amount.ok_or_else(|| {
            SettlementError::internal(format!("order {} has no resolved split", order.order_number))
        })?;
        Ok(Self {
            id: Uuid::new_v4(),
            order_id: order.id,
            kind: TransferKind::BookingPayment,
            tip_id: None,
            destination,
            amount,
            currency: order.currency.clone(),
            status: LedgerStatus::Pending,
            idempotency_key: order.transfer_idempotency_key(),
            transfer_ref: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// A tip goes to the celebrity in full.
    pub fn tip(tip: &Tip, destination: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: tip.order_id,
            kind: TransferKind::Tip,
            tip_id: Some(tip.id),
            destination,
            amount: tip.amount,
            currency: tip.currency.clone(),
            status: LedgerStatus::Pending,
            idempotency_key: tip.transfer_idempotency_key(),
            transfer_ref: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_in_transit(&mut self, transfer_ref: Option<String>, now: DateTime<Utc>) -> Result<(), SettlementError> {
        self.status.settle(self.order_id, LedgerStatus::InTransit)?;
        self.transfer_ref = transfer_ref;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_paid(&mut self, now: DateTime<Utc>) -> Result<(), SettlementError> {
        self.status.settle(self.order_id, LedgerStatus::Paid)?;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: String, now: DateTime<Utc>) -> Result<(), SettlementError> {
        self.status.settle(self.order_id, LedgerStatus::Failed)?;
        self.failure_reason = Some(reason);
        self.updated_at = now;
        Ok(())
    }
}
