use crate::domain::alert::AdminAlert;
use crate::domain::booking::Booking;
use crate::domain::ledger::ChangeSet;
use crate::domain::order::{Order, OrderId};
use crate::domain::payout::{Payout, Transfer};
use crate::domain::ports::{DeferredEvent, EventLog, LedgerStore};
use crate::domain::tip::Tip;
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const CF_ORDERS: &str = "orders";
pub const CF_BOOKINGS: &str = "bookings";
pub const CF_TIPS: &str = "tips";
pub const CF_PAYOUTS: &str = "payouts";
pub const CF_TRANSFERS: &str = "transfers";
pub const CF_ALERTS: &str = "alerts";
/// Ids of webhook events already applied.
pub const CF_EVENTS: &str = "events";
pub const CF_DEFERRED: &str = "deferred";

const COLUMN_FAMILIES: [&str; 8] = [
    CF_ORDERS,
    CF_BOOKINGS,
    CF_TIPS,
    CF_PAYOUTS,
    CF_TRANSFERS,
    CF_ALERTS,
    CF_EVENTS,
    CF_DEFERRED,
];

/// A persistent ledger using RocksDB.
///
/// Each entity lives in its own column family, serialized as JSON. Rows owned
/// by an order (tips, payouts, transfers) are keyed `<order id>/<row id>` so
/// they can be read back with a prefix scan.
///
/// `commit` validates under `commit_lock` and writes through a single
/// `WriteBatch`, so a change set lands entirely or not at all.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    commit_lock: Arc<Mutex<()>>,
}

fn order_key(id: OrderId) -> Vec<u8> {
    id.0.as_bytes().to_vec()
}

fn child_key(order_id: OrderId, row_id: Uuid) -> Vec<u8> {
    format!("{}/{}", order_id, row_id).into_bytes()
}

fn child_prefix(order_id: OrderId) -> Vec<u8> {
    format!("{}/", order_id).into_bytes()
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| SettlementError::internal(format!("Deserialization error: {e}")))
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at `path`, creating any missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            commit_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| SettlementError::internal(format!("{name} column family not found")))
    }

    fn get_json<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(batch: &mut WriteBatch, cf: &ColumnFamily, key: &[u8], value: &T) -> Result<()> {
        batch.put_cf(cf, key, serde_json::to_vec(value)?);
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self, cf: &str, prefix: Option<&[u8]>) -> Result<Vec<T>> {
        let handle = self.cf(cf)?;
        let mode = match prefix {
            Some(p) => IteratorMode::From(p, Direction::Forward),
            None => IteratorMode::Start,
        };

        let mut rows = Vec::new();
        for item in self.db.iterator_cf(handle, mode) {
            let (key, value) = item?;
            if let Some(p) = prefix
                && !key.starts_with(p)
            {
                break;
            }
            rows.push(decode(&value)?);
        }
        Ok(rows)
    }
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn order(&self, id: OrderId) -> Result<Option<Order>> {
        self.get_json(CF_ORDERS, &order_key(id))
    }

    async fn order_by_number(&self, order_number: &str) -> Result<Option<Order>> {
        Ok(self
            .scan::<Order>(CF_ORDERS, None)?
            .into_iter()
            .find(|o| o.order_number == order_number))
    }

    async fn order_by_payment_intent(&self, intent_id: &str) -> Result<Option<Order>> {
        Ok(self
            .scan::<Order>(CF_ORDERS, None)?
            .into_iter()
            .find(|o| o.payment_intent_id.as_deref() == Some(intent_id)))
    }

    async fn orders(&self) -> Result<Vec<Order>> {
        let mut orders = self.scan::<Order>(CF_ORDERS, None)?;
        orders.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.order_number.cmp(&b.order_number))
        });
        Ok(orders)
    }

    async fn booking(&self, order_id: OrderId) -> Result<Option<Booking>> {
        self.get_json(CF_BOOKINGS, &order_key(order_id))
    }

    async fn tip(&self, tip_id: Uuid) -> Result<Option<Tip>> {
        Ok(self
            .scan::<Tip>(CF_TIPS, None)?
            .into_iter()
            .find(|t| t.id == tip_id))
    }

    async fn tips(&self, order_id: OrderId) -> Result<Vec<Tip>> {
        let mut tips = self.scan::<Tip>(CF_TIPS, Some(&child_prefix(order_id)))?;
        tips.sort_by_key(|t| t.created_at);
        Ok(tips)
    }

    async fn tip_by_payment_intent(&self, intent_id: &str) -> Result<Option<Tip>> {
        Ok(self
            .scan::<Tip>(CF_TIPS, None)?
            .into_iter()
            .find(|t| t.payment_intent_id.as_deref() == Some(intent_id)))
    }

    async fn payouts(&self, order_id: OrderId) -> Result<Vec<Payout>> {
        let mut payouts = self.scan::<Payout>(CF_PAYOUTS, Some(&child_prefix(order_id)))?;
        payouts.sort_by_key(|p| (p.attempt, p.created_at));
        Ok(payouts)
    }

    async fn transfers(&self, order_id: OrderId) -> Result<Vec<Transfer>> {
        let mut transfers =
            self.scan::<Transfer>(CF_TRANSFERS, Some(&child_prefix(order_id)))?;
        transfers.sort_by_key(|t| t.created_at);
        Ok(transfers)
    }

    async fn transfer_by_ref(&self, transfer_ref: &str) -> Result<Option<Transfer>> {
        Ok(self
            .scan::<Transfer>(CF_TRANSFERS, None)?
            .into_iter()
            .find(|t| t.transfer_ref.as_deref() == Some(transfer_ref)))
    }

    async fn alerts(&self) -> Result<Vec<AdminAlert>> {
        let mut alerts = self.scan::<AdminAlert>(CF_ALERTS, None)?;
        alerts.sort_by_key(|a| a.created_at);
        Ok(alerts)
    }

    async fn record_alert(&self, alert: AdminAlert) -> Result<()> {
        let mut batch = WriteBatch::default();
        Self::put_json(&mut batch, self.cf(CF_ALERTS)?, alert.id.as_bytes(), &alert)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn commit(&self, changes: ChangeSet) -> Result<Order> {
        let _guard = self.commit_lock.lock().await;

        let stored: Option<Order> = self.get_json(CF_ORDERS, &order_key(changes.order.id))?;
        if stored.is_none()
            && self
                .order_by_number(&changes.order.order_number)
                .await?
                .is_some()
        {
            return Err(SettlementError::ValidationError(format!(
                "order number {} already exists",
                changes.order.order_number
            )));
        }
        let existing_payouts = self.payouts(changes.order.id).await?;
        changes.check_against(stored.as_ref(), &existing_payouts)?;

        let mut order = changes.order;
        order.version += 1;

        let mut batch = WriteBatch::default();
        if let Some(booking) = &changes.booking {
            Self::put_json(&mut batch, self.cf(CF_BOOKINGS)?, &order_key(booking.order_id), booking)?;
        }
        for tip in &changes.tips {
            Self::put_json(&mut batch, self.cf(CF_TIPS)?, &child_key(tip.order_id, tip.id), tip)?;
        }
        for payout in &changes.payouts {
            Self::put_json(&mut batch, self.cf(CF_PAYOUTS)?, &child_key(payout.order_id, payout.id), payout)?;
        }
        for transfer in &changes.transfers {
            Self::put_json(
                &mut batch,
                self.cf(CF_TRANSFERS)?,
                &child_key(transfer.order_id, transfer.id),
                transfer,
            )?;
        }
        for alert in &changes.alerts {
            Self::put_json(&mut batch, self.cf(CF_ALERTS)?, alert.id.as_bytes(), alert)?;
        }
        Self::put_json(&mut batch, self.cf(CF_ORDERS)?, &order_key(order.id), &order)?;
        self.db.write(batch)?;

        Ok(order)
    }
}

#[async_trait]
impl EventLog for RocksDBStore {
    async fn is_processed(&self, event_id: &str) -> Result<bool> {
        // existence check only
        Ok(self
            .db
            .get_pinned_cf(self.cf(CF_EVENTS)?, event_id.as_bytes())?
            .is_some())
    }

    async fn mark_processed(&self, event_id: &str) -> Result<()> {
        self.db.put_cf(self.cf(CF_EVENTS)?, event_id.as_bytes(), [])?;
        Ok(())
    }

    async fn defer(&self, deferred: DeferredEvent) -> Result<()> {
        let mut batch = WriteBatch::default();
        Self::put_json(
            &mut batch,
            self.cf(CF_DEFERRED)?,
            deferred.event.id.as_bytes(),
            &deferred,
        )?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn deferred(&self) -> Result<Vec<DeferredEvent>> {
        let mut events = self.scan::<DeferredEvent>(CF_DEFERRED, None)?;
        events.sort_by_key(|d| d.deferred_at);
        Ok(events)
    }

    async fn remove_deferred(&self, event_id: &str) -> Result<()> {
        self.db.delete_cf(self.cf(CF_DEFERRED)?, event_id.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Cents;
    use crate::domain::order::{NewOrder, VideoRequest};
    use chrono::Utc;
    use tempfile::tempdir;

    fn order(number: &str) -> Order {
        Order::checkout(
            NewOrder {
                order_number: number.to_string(),
                customer_id: "fan".to_string(),
                celebrity_id: "celeb".to_string(),
                total_amount: Cents::new(29900).unwrap(),
                currency: "usd".to_string(),
                request: VideoRequest::default(),
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");
        for name in COLUMN_FAMILIES {
            assert!(store.db.cf_handle(name).is_some());
        }
    }

    #[tokio::test]
    async fn test_rocksdb_commit_with_children() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        let mut o = order("SO-1");
        o.record_payment(o.total_amount).unwrap();
        let booking = Booking::for_order(&o, Utc::now());
        let tip = Tip::new(o.id, Cents::new(500).unwrap(), "usd".into(), Utc::now()).unwrap();

        let stored = store
            .commit(ChangeSet::new(o.clone()).with_booking(booking.clone()).with_tip(tip.clone()))
            .await
            .unwrap();
        assert_eq!(stored.version, 1);

        // another order's rows must not leak into the prefix scan
        let other = order("SO-2");
        let other_tip = Tip::new(other.id, Cents::new(100).unwrap(), "usd".into(), Utc::now()).unwrap();
        store
            .commit(ChangeSet::new(other).with_tip(other_tip))
            .await
            .unwrap();

        assert_eq!(store.booking(o.id).await.unwrap(), Some(booking));
        assert_eq!(store.tips(o.id).await.unwrap(), vec![tip.clone()]);
        assert_eq!(store.tip(tip.id).await.unwrap(), Some(tip));
        assert_eq!(store.orders().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rocksdb_rejects_stale_commit() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        let v1 = store.commit(ChangeSet::new(order("SO-1"))).await.unwrap();
        store.commit(ChangeSet::new(v1.clone())).await.unwrap();
        assert!(matches!(
            store.commit(ChangeSet::new(v1)).await,
            Err(SettlementError::ConcurrentModification(_))
        ));
    }

    #[tokio::test]
    async fn test_rocksdb_event_log() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        assert!(!store.is_processed("evt_1").await.unwrap());
        store.mark_processed("evt_1").await.unwrap();
        assert!(store.is_processed("evt_1").await.unwrap());
    }

    #[tokio::test]
    async fn test_rocksdb_survives_reopen() {
        let dir = tempdir().unwrap();
        let id = {
            let store = RocksDBStore::open(dir.path()).unwrap();
            store.commit(ChangeSet::new(order("SO-9"))).await.unwrap().id
        };

        let store = RocksDBStore::open(dir.path()).unwrap();
        let reloaded = store.order(id).await.unwrap().unwrap();
        assert_eq!(reloaded.order_number, "SO-9");
        assert_eq!(reloaded.version, 1);
    }
}
