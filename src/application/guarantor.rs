use super::locks::OrderLocks;
use crate::domain::booking::Booking;
use crate::domain::ledger::ChangeSet;
use crate::domain::ports::LedgerStoreRef;
use crate::error::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub scanned: usize,
    /// Order numbers that received a synthesized booking.
    pub repaired: Vec<String>,
}

/// Backstop that restores Booking rows the lifecycle should have written.
///
/// Safe to run any number of times: an order that already has a booking is
/// left alone.
pub struct BookingGuarantor {
    store: LedgerStoreRef,
    locks: OrderLocks,
}

impl BookingGuarantor {
    pub fn new(store: LedgerStoreRef, locks: OrderLocks) -> Self {
        Self { store, locks }
    }

    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<RepairReport> {
        let mut report = RepairReport::default();
        for candidate in self.store.orders().await? {
            report.scanned += 1;
            if !candidate.requires_booking() || self.store.booking(candidate.id).await?.is_some() {
                continue;
            }

            let _guard = self.locks.acquire(candidate.id).await;
            let Some(order) = self.store.order(candidate.id).await? else {
                continue;
            };
            if !order.requires_booking() || self.store.booking(order.id).await?.is_some() {
                continue;
            }

            let mut booking = Booking::for_order(&order, Utc::now());
            booking.repaired = true;
            let number = order.order_number.clone();
            self.store
                .commit(ChangeSet::new(order).with_booking(booking))
                .await?;
            warn!(order = %number, "missing booking synthesized");
            report.repaired.push(number);
        }
        info!(scanned = report.scanned, repaired = report.repaired.len(), "booking sweep finished");
        Ok(report)
    }

    /// Sweeps every `interval` until `shutdown` flips to `true` or its sender is dropped.
    pub fn spawn_periodic(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            error!(error = %e, "booking sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("booking guarantor stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Cents;
    use crate::domain::order::{NewOrder, Order, VideoRequest};
    use crate::domain::ports::LedgerStore;
    use crate::infrastructure::in_memory::InMemoryLedgerStore;

    fn order(number: &str) -> Order {
        Order::checkout(
            NewOrder {
                order_number: number.to_string(),
                customer_id: "fan".to_string(),
                celebrity_id: "celeb".to_string(),
                total_amount: Cents::new(5000).unwrap(),
                currency: "usd".to_string(),
                request: VideoRequest {
                    recipient_name: "Jo".to_string(),
                    occasion: Some("Graduation".to_string()),
                    ..Default::default()
                },
            },
            Utc::now(),
        )
    }

    async fn seeded() -> (BookingGuarantor, InMemoryLedgerStore) {
        let store = InMemoryLedgerStore::new();
        // awaiting payment: no booking needed
        store.commit(ChangeSet::new(order("SO-1"))).await.unwrap();
        // paid, booking skipped
        let mut paid = order("SO-2");
        paid.record_payment(paid.total_amount).unwrap();
        store.commit(ChangeSet::new(paid)).await.unwrap();
        // payment failed: no booking needed
        let mut failed = order("SO-3");
        failed.record_payment_failure(None).unwrap();
        store.commit(ChangeSet::new(failed)).await.unwrap();

        let guarantor = BookingGuarantor::new(Arc::new(store.clone()), OrderLocks::new());
        (guarantor, store)
    }

    #[tokio::test]
    async fn test_sweep_repairs_only_missing_bookings() {
        let (guarantor, store) = seeded().await;
        let report = guarantor.sweep().await.unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.repaired, vec!["SO-2".to_string()]);

        let paid = store.order_by_number("SO-2").await.unwrap().unwrap();
        let booking = store.booking(paid.id).await.unwrap().unwrap();
        assert!(booking.repaired);
        assert_eq!(booking.recipient_name, "Jo");
        assert_eq!(booking.occasion.as_deref(), Some("Graduation"));
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let (guarantor, _) = seeded().await;
        guarantor.sweep().await.unwrap();
        let second = guarantor.sweep().await.unwrap();
        assert!(second.repaired.is_empty());
    }

    #[tokio::test]
    async fn test_periodic_sweep_stops_on_shutdown() {
        let (guarantor, store) = seeded().await;
        let (tx, rx) = watch::channel(false);
        let handle = Arc::new(guarantor).spawn_periodic(Duration::from_millis(10), rx);

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        let paid = store.order_by_number("SO-2").await.unwrap().unwrap();
        assert!(store.booking(paid.id).await.unwrap().is_some());
    }
}
