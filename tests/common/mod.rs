#![allow(dead_code)]

use rust_decimal_macros::dec;
use shoutout::application::guarantor::BookingGuarantor;
use shoutout::application::lifecycle::{OrderLifecycle, OrderView};
use shoutout::application::reconciler::{ReconcileOutcome, WebhookReconciler};
use shoutout::domain::event::GatewayEvent;
use shoutout::domain::money::Cents;
use shoutout::domain::order::{NewOrder, Order, VideoRequest};
use shoutout::domain::payout::TransferKind;
use shoutout::domain::ports::PayoutAccount;
use shoutout::error::Result;
use shoutout::infrastructure::in_memory::{
    InMemoryEventLog, InMemoryLedgerStore, InMemoryPayoutAccountRegistry, RecordingNotifier,
};
use shoutout::infrastructure::sandbox::SandboxGateway;
use shoutout::settings::Settings;
use std::sync::Arc;
use std::time::Duration;

pub const CUSTOMER: &str = "fan-1";
pub const CELEBRITY: &str = "celeb-1";
pub const SECRET: &str = "whsec_test";

/// Fast retries and a short gateway deadline so fault tests stay quick.
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.gateway.base_delay_ms = 1;
    settings.gateway.max_delay_ms = 5;
    settings.gateway.timeout = Duration::from_millis(200);
    settings.gateway.webhook_secret = SECRET.to_string();
    settings.reconciler.max_deferred_attempts = 3;
    settings
}

/// The settlement core wired to in-memory adapters and the sandbox gateway.
pub struct Harness {
    pub store: InMemoryLedgerStore,
    pub events: InMemoryEventLog,
    pub gateway: SandboxGateway,
    pub registry: InMemoryPayoutAccountRegistry,
    pub notifier: RecordingNotifier,
    pub lifecycle: Arc<OrderLifecycle>,
    pub reconciler: WebhookReconciler,
    pub guarantor: BookingGuarantor,
}

pub fn harness() -> Harness {
    harness_with(test_settings())
}

pub fn harness_with(settings: Settings) -> Harness {
    let store = InMemoryLedgerStore::new();
    let events = InMemoryEventLog::new();
    let gateway = SandboxGateway::new(
        settings.gateway.webhook_secret.clone(),
        settings.gateway.webhook_tolerance_seconds,
    );
    let registry = InMemoryPayoutAccountRegistry::new();
    let notifier = RecordingNotifier::new();

    let lifecycle = Arc::new(
        OrderLifecycle::new(
            Arc::new(store.clone()),
            Arc::new(gateway.clone()),
            Arc::new(registry.clone()),
            Arc::new(notifier.clone()),
            &settings,
        )
        .unwrap(),
    );
    let reconciler = WebhookReconciler::new(
        lifecycle.clone(),
        Arc::new(gateway.clone()),
        Arc::new(events.clone()),
        settings.reconciler.max_deferred_attempts,
    );
    let guarantor = BookingGuarantor::new(Arc::new(store.clone()), lifecycle.locks().clone());

    Harness {
        store,
        events,
        gateway,
        registry,
        notifier,
        lifecycle,
        reconciler,
        guarantor,
    }
}

pub fn new_order(number: &str) -> NewOrder {
    NewOrder {
        order_number: number.to_string(),
        customer_id: CUSTOMER.to_string(),
        celebrity_id: CELEBRITY.to_string(),
        total_amount: Cents::from_major(dec!(299.00)).unwrap(),
        currency: String::new(),
        request: VideoRequest {
            recipient_name: "Sam".to_string(),
            occasion: Some("Birthday".to_string()),
            ..Default::default()
        },
    }
}

impl Harness {
    pub async fn register_celebrity(&self) {
        self.registry
            .register(
                CELEBRITY,
                PayoutAccount {
                    account_id: "acct_celeb_1".to_string(),
                    chargeable: true,
                },
            )
            .await;
    }

    pub async fn view(&self, number: &str) -> OrderView {
        self.lifecycle.order_view(number).await.unwrap()
    }

    /// Signs `event` with the gateway secret and delivers it to the reconciler.
    pub async fn deliver(&self, event: &GatewayEvent) -> Result<ReconcileOutcome> {
        let signed = self.gateway.sign_event(event).unwrap();
        self.reconciler.handle(&signed.payload, &signed.signature).await
    }

    pub async fn payment_event(&self, number: &str, succeeded: bool, event_id: &str) -> GatewayEvent {
        let intent = self.view(number).await.order.payment_intent_id.unwrap();
        self.gateway
            .payment_event(&intent, succeeded, Some(event_id.to_string()))
            .await
            .unwrap()
    }

    pub async fn pay(&self, number: &str) -> ReconcileOutcome {
        let event = self.payment_event(number, true, &format!("evt_pay_{number}")).await;
        self.deliver(&event).await.unwrap()
    }

    /// Checkout and a successful payment.
    pub async fn paid(&self, number: &str) -> Order {
        self.lifecycle.checkout(new_order(number)).await.unwrap();
        assert_eq!(self.pay(number).await, ReconcileOutcome::Applied);
        self.view(number).await.order
    }

    /// Paid, accepted and delivered: waiting for the customer's approval.
    pub async fn delivered(&self, number: &str) -> Order {
        self.paid(number).await;
        self.lifecycle.accept(number, CELEBRITY).await.unwrap();
        self.lifecycle
            .deliver(number, CELEBRITY, "https://cdn.example/video.mp4")
            .await
            .unwrap()
    }

    /// Event for the order's latest booking-payment transfer.
    pub async fn transfer_event(&self, number: &str, paid: bool, event_id: &str) -> GatewayEvent {
        let view = self.view(number).await;
        let transfer = view
            .transfers
            .iter()
            .rev()
            .find(|t| t.kind == TransferKind::BookingPayment)
            .unwrap();
        let transfer_ref = match &transfer.transfer_ref {
            Some(r) => r.clone(),
            None => self
                .gateway
                .transfer_by_key(&transfer.idempotency_key)
                .await
                .unwrap()
                .id,
        };
        self.gateway
            .transfer_event(&transfer_ref, paid, None, Some(event_id.to_string()))
            .await
            .unwrap()
    }
}

/// Writes a command script driving `orders` orders from checkout to a paid transfer.
pub fn generate_script(path: &std::path::Path, orders: usize) -> std::io::Result<()> {
    use std::io::Write;
    let mut out = std::io::BufWriter::new(std::fs::File::create(path)?);
    writeln!(
        out,
        r#"{{"action":"register_payout_account","celebrity_id":"{CELEBRITY}","account_id":"acct_bulk"}}"#
    )?;
    for i in 1..=orders {
        let n = format!("SO-{i}");
        writeln!(
            out,
            r#"{{"action":"checkout","order_number":"{n}","customer_id":"{CUSTOMER}","celebrity_id":"{CELEBRITY}","amount":"{}.99","recipient_name":"Fan {i}"}}"#,
            i % 500 + 1
        )?;
        writeln!(out, r#"{{"action":"payment_succeeded","order_number":"{n}"}}"#)?;
        writeln!(out, r#"{{"action":"accept","order_number":"{n}","celebrity_id":"{CELEBRITY}"}}"#)?;
        writeln!(
            out,
            r#"{{"action":"deliver","order_number":"{n}","celebrity_id":"{CELEBRITY}","video_url":"https://cdn/{n}.mp4"}}"#
        )?;
        writeln!(out, r#"{{"action":"approve","order_number":"{n}","customer_id":"{CUSTOMER}"}}"#)?;
        writeln!(out, r#"{{"action":"transfer_paid","order_number":"{n}"}}"#)?;
    }
    out.flush()
}
