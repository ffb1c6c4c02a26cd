use super::alert::AdminAlert;
use super::booking::Booking;
use super::order::Order;
use super::payout::{LedgerStatus, Payout, Transfer};
use super::tip::Tip;
use crate::error::{Result, SettlementError};

/// Everything one transition writes, committed atomically.
///
/// `order.version` is the version that was read; the store rejects the
/// commit if the stored order has moved on since.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub order: Order,
    pub booking: Option<Booking>,
    pub tips: Vec<Tip>,
    pub payouts: Vec<Payout>,
    pub transfers: Vec<Transfer>,
    pub alerts: Vec<AdminAlert>,
}

impl ChangeSet {
    pub fn new(order: Order) -> Self {
        Self {
            order,
            booking: None,
            tips: Vec::new(),
            payouts: Vec::new(),
            transfers: Vec::new(),
            alerts: Vec::new(),
        }
    }

    pub fn with_booking(mut self, booking: Booking) -> Self {
        self.booking = Some(booking);
        self
    }

    pub fn with_tip(mut self, tip: Tip) -> Self {
        self.tips.push(tip);
        self
    }

    pub fn with_payout(mut self, payout: Payout) -> Self {
        self.payouts.push(payout);
        self
    }

    pub fn with_transfer(mut self, transfer: Transfer) -> Self {
        self.transfers.push(transfer);
        self
    }

    pub fn with_alert(mut self, alert: AdminAlert) -> Self {
        self.alerts.push(alert);
        self
    }

    /// Rejects change sets that break order invariants or touch rows of another order.
    pub fn validate(&self) -> Result<()> {
        self.order.check_invariants()?;
        let id = self.order.id;
        let foreign = self.booking.iter().any(|b| b.order_id != id)
            || self.tips.iter().any(|t| t.order_id != id)
            || self.payouts.iter().any(|p| p.order_id != id)
            || self.transfers.iter().any(|t| t.order_id != id)
            || self.alerts.iter().any(|a| a.order_id.is_some_and(|o| o != id));
        if foreign {
            return Err(SettlementError::internal(format!(
                "change set for order {} references rows of another order",
                self.order.order_number
            )));
        }
        Ok(())
    }

    /// Checks the change set against what is currently stored for its order.
    ///
    /// `stored` is the persisted order (if any) and `existing_payouts` its
    /// persisted payouts. Fails on a stale version or when the commit would
    /// leave more than one PAID payout for the order.
    pub fn check_against(&self, stored: Option<&Order>, existing_payouts: &[Payout]) -> Result<()> {
        self.validate()?;

        let stale = match stored {
            Some(current) => current.version != self.order.version,
            None => self.order.version != 0,
        };
        if stale {
            return Err(SettlementError::ConcurrentModification(
                self.order.order_number.clone(),
            ));
        }

        let paid = existing_payouts
            .iter()
            .filter(|p| !self.payouts.iter().any(|n| n.id == p.id))
            .chain(self.payouts.iter())
            .filter(|p| p.status == LedgerStatus::Paid)
            .count();
        if paid > 1 {
            return Err(SettlementError::internal(format!(
                "order {} would have {} PAID payouts",
                self.order.order_number, paid
            )));
        }
        Ok(())
    }
}
