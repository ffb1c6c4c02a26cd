use super::order::OrderId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    TransferFailed,
    TransferOutcomeUnknown,
    RefundFailed,
    /// Payment captured after the gateway reported it failed; refunded.
    LateCaptureRefunded,
    TipTransferFailed,
    DeferredEventDropped,
}

/// An item in the admin reconciliation queue.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct AdminAlert {
    pub id: Uuid,
    pub order_id: Option<OrderId>,
    pub kind: AlertKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl AdminAlert {
    pub fn new(order_id: Option<OrderId>, kind: AlertKind, message: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            kind,
            message: message.into(),
            created_at: now,
        }
    }
}
