use super::money::Cents;
use super::order::OrderId;
use crate::error::SettlementError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TipPaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

/// An extra payment on top of an order. Tips bypass the fee split and are
/// forwarded to the celebrity as soon as they clear.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Tip {
    pub id: Uuid,
    pub order_id: OrderId,
    pub amount: Cents,
    pub currency: String,
    pub payment_status: TipPaymentStatus,
    pub payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Tip {
    pub fn new(order_id: OrderId, amount: Cents, currency: String, now: DateTime<Utc>) -> Result<Self, SettlementError> {
        if amount.is_zero() {
            return Err(SettlementError::ValidationError(
                "Tip amount must be positive".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            order_id,
            amount,
            currency,
            payment_status: TipPaymentStatus::Pending,
            payment_intent_id: None,
            created_at: now,
        })
    }

    fn reject(&self, action: &'static str) -> SettlementError {
        SettlementError::InvalidStateTransition {
            order: self.order_id.to_string(),
            action,
            state: format!("tip {} {:?}", self.id, self.payment_status),
        }
    }

    pub fn record_payment(&mut self, amount: Cents) -> Result<(), SettlementError> {
        if self.payment_status != TipPaymentStatus::Pending {
            return Err(self.reject("record tip payment"));
        }
        if amount != self.amount {
            return Err(SettlementError::DataInconsistency(format!(
                "tip {} expected {} but gateway reported {}",
                self.id, self.amount, amount
            )));
        }
        self.payment_status = TipPaymentStatus::Succeeded;
        Ok(())
    }

    pub fn record_payment_failure(&mut self) -> Result<(), SettlementError> {
        if self.payment_status != TipPaymentStatus::Pending {
            return Err(self.reject("record tip failure"));
        }
        self.payment_status = TipPaymentStatus::Failed;
        Ok(())
    }

    pub fn transfer_idempotency_key(&self) -> String {
        format!("tip-{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tip_lifecycle() {
        let mut tip = Tip::new(OrderId::new(), Cents::new(500).unwrap(), "usd".into(), Utc::now()).unwrap();
        tip.record_payment(Cents::new(500).unwrap()).unwrap();
        assert_eq!(tip.payment_status, TipPaymentStatus::Succeeded);
        assert!(tip.record_payment(Cents::new(500).unwrap()).is_err());
        assert!(tip.record_payment_failure().is_err());
    }

    #[test]
    fn test_zero_tip_rejected() {
        assert!(Tip::new(OrderId::new(), Cents::ZERO, "usd".into(), Utc::now()).is_err());
    }
}
