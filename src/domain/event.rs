use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata key carrying the order id on intents and transfers.
pub const META_ORDER_ID: &str = "order_id";
/// Metadata key carrying the tip id on tip intents and tip transfers.
pub const META_TIP_ID: &str = "tip_id";
/// Metadata key echoing the idempotency key a transfer was requested with.
pub const META_IDEMPOTENCY_KEY: &str = "idempotency_key";

/// The event kinds the reconciler acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEventKind {
    PaymentSucceeded,
    PaymentFailed,
    TransferPaid,
    TransferFailed,
}

impl GatewayEventKind {
    /// Maps a gateway event type string; unknown types yield `None`.
    pub fn parse(event_type: &str) -> Option<Self> {
        match event_type {
            "payment_intent.succeeded" | "payment.succeeded" => Some(Self::PaymentSucceeded),
            "payment_intent.payment_failed" | "payment_intent.failed" | "payment.failed" => {
                Some(Self::PaymentFailed)
            }
            "transfer.paid" | "transfer.succeeded" => Some(Self::TransferPaid),
            "transfer.failed" => Some(Self::TransferFailed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentSucceeded => "payment_intent.succeeded",
            Self::PaymentFailed => "payment_intent.payment_failed",
            Self::TransferPaid => "transfer.paid",
            Self::TransferFailed => "transfer.failed",
        }
    }
}

/// Webhook event envelope: `{ id, type, created, data: { object } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: i64,
    pub data: GatewayEventData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayEventData {
    pub object: GatewayObject,
}

/// The payment intent or transfer the event is about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayObject {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

impl GatewayEvent {
    pub fn kind(&self) -> Option<GatewayEventKind> {
        GatewayEventKind::parse(&self.event_type)
    }

    pub fn object(&self) -> &GatewayObject {
        &self.data.object
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.data.object.metadata.get(key).map(String::as_str)
    }
}
