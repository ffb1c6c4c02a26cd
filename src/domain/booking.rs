use super::order::{Order, OrderId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }
}

/// The celebrity's work item for an order. Exactly one per order, keyed by the order id.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Booking {
    pub order_id: OrderId,
    pub celebrity_id: String,
    pub customer_id: String,
    pub status: BookingStatus,
    pub recipient_name: String,
    pub occasion: Option<String>,
    pub instructions: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    /// Set when the row was synthesized by the repair sweep.
    pub repaired: bool,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    /// Builds a booking from the order's request, with a status derived from
    /// the order's current lifecycle position.
    pub fn for_order(order: &Order, now: DateTime<Utc>) -> Self {
        Self {
            order_id: order.id,
            celebrity_id: order.celebrity_id.clone(),
            customer_id: order.customer_id.clone(),
            status: Self::status_for(order),
            recipient_name: order.request.recipient_name.clone(),
            occasion: order.request.occasion.clone(),
            instructions: order.request.instructions.clone(),
            deadline: order.request.deadline,
            repaired: false,
            created_at: now,
        }
    }

    /// The booking status that mirrors `order.status`.
    pub fn status_for(order: &Order) -> BookingStatus {
        use super::order::OrderStatus;
        match order.status {
            OrderStatus::Pending => BookingStatus::Pending,
            OrderStatus::Confirmed | OrderStatus::PendingApproval => BookingStatus::Confirmed,
            OrderStatus::Completed => BookingStatus::Completed,
            OrderStatus::Cancelled | OrderStatus::Refunded => BookingStatus::Cancelled,
        }
    }

    pub fn sync_with(&mut self, order: &Order) {
        self.status = Self::status_for(order);
    }
}
