use crate::application::lifecycle::OrderView;
use crate::domain::money::Cents;
use crate::domain::payout::LedgerStatus;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

/// One CSV row per order. Money columns are in major units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderSummary {
    pub order_number: String,
    pub status: String,
    pub payment_status: String,
    pub approval_status: String,
    pub transfer_status: String,
    pub total: Decimal,
    pub platform_fee: Option<Decimal>,
    pub celebrity_amount: Option<Decimal>,
    pub currency: String,
    pub booking: String,
    pub tips: usize,
    pub paid_out: Decimal,
}

impl From<&OrderView> for OrderSummary {
    fn from(view: &OrderView) -> Self {
        let order = &view.order;
        let paid_out = view
            .transfers
            .iter()
            .filter(|t| t.status == LedgerStatus::Paid)
            .fold(Cents::ZERO, |sum, t| sum + t.amount);
        Self {
            order_number: order.order_number.clone(),
            status: order.status.to_string(),
            payment_status: order.payment_status.to_string(),
            approval_status: order
                .approval_status
                .map(|a| a.to_string())
                .unwrap_or_default(),
            transfer_status: order.transfer_status.to_string(),
            total: order.total_amount.to_major(),
            platform_fee: order.platform_fee.map(|c| c.to_major()),
            celebrity_amount: order.celebrity_amount.map(|c| c.to_major()),
            currency: order.currency.clone(),
            booking: view
                .booking
                .as_ref()
                .map(|b| b.status.as_str().to_string())
                .unwrap_or_default(),
            tips: view.tips.len(),
            paid_out: paid_out.to_major(),
        }
    }
}

/// Writes order summaries as CSV.
pub struct OrderWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> OrderWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_orders(&mut self, orders: impl IntoIterator<Item = OrderSummary>) -> Result<()> {
        for order in orders {
            self.writer.serialize(order)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
