use super::csv::order_writer::OrderSummary;
use crate::application::commands::{Command, FaultKind, FaultTarget};
use crate::application::guarantor::{BookingGuarantor, RepairReport};
use crate::application::lifecycle::OrderLifecycle;
use crate::application::reconciler::{ReconcileOutcome, ReplayReport, WebhookReconciler};
use crate::domain::event::{
    GatewayEvent, GatewayEventKind, GatewayObject, META_IDEMPOTENCY_KEY, META_ORDER_ID,
    META_TIP_ID,
};
use crate::domain::money::Cents;
use crate::domain::payout::TransferKind;
use crate::domain::ports::{EventLogRef, LedgerStoreRef, NotifierRef, PayoutAccount};
use crate::domain::tip::TipPaymentStatus;
use crate::error::{Result, SettlementError};
use crate::infrastructure::in_memory::InMemoryPayoutAccountRegistry;
use crate::infrastructure::sandbox::{SandboxFault, SandboxGateway};
use crate::settings::Settings;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Drives a command script against the settlement core.
///
/// Gateway webhooks are simulated: the runner builds the event the gateway
/// would send, signs it with the sandbox secret and feeds it through
/// `WebhookReconciler::handle`, signature check included.
pub struct CommandRunner {
    lifecycle: Arc<OrderLifecycle>,
    reconciler: WebhookReconciler,
    guarantor: BookingGuarantor,
    gateway: SandboxGateway,
    registry: InMemoryPayoutAccountRegistry,
}

impl CommandRunner {
    pub fn new(store: LedgerStoreRef, events: EventLogRef, notifier: NotifierRef, settings: &Settings) -> Result<Self> {
        let secret = if settings.gateway.webhook_secret.is_empty() {
            format!("whsec_{}", Uuid::new_v4().simple())
        } else {
            settings.gateway.webhook_secret.clone()
        };
        let gateway = SandboxGateway::new(secret, settings.gateway.webhook_tolerance_seconds);
        let registry = InMemoryPayoutAccountRegistry::new();

        let lifecycle = Arc::new(OrderLifecycle::new(
            store.clone(),
            Arc::new(gateway.clone()),
            Arc::new(registry.clone()),
            notifier,
            settings,
        )?);
        let reconciler = WebhookReconciler::new(
            lifecycle.clone(),
            Arc::new(gateway.clone()),
            events,
            settings.reconciler.max_deferred_attempts,
        );
        let guarantor = BookingGuarantor::new(store, lifecycle.locks().clone());

        Ok(Self {
            lifecycle,
            reconciler,
            guarantor,
            gateway,
            registry,
        })
    }

    pub fn lifecycle(&self) -> &Arc<OrderLifecycle> {
        &self.lifecycle
    }

    pub fn gateway(&self) -> &SandboxGateway {
        &self.gateway
    }

    #[instrument(skip_all, fields(action = command.action()))]
    pub async fn execute(&self, command: Command) -> Result<()> {
        command.validate()?;
        match command {
            checkout @ Command::Checkout { .. } => {
                self.lifecycle.checkout(checkout.into_new_order()?).await?;
            }
            Command::RegisterPayoutAccount {
                celebrity_id,
                account_id,
                chargeable,
            } => {
                self.registry
                    .register(celebrity_id, PayoutAccount { account_id, chargeable })
                    .await;
            }
            Command::PaymentSucceeded { order_number, event_id } => {
                let event = self.payment_event(&order_number, true, event_id).await?;
                self.deliver(event).await?;
            }
            Command::PaymentFailed { order_number, event_id } => {
                let event = self.payment_event(&order_number, false, event_id).await?;
                self.deliver(event).await?;
            }
            Command::Accept {
                order_number,
                celebrity_id,
            } => {
                self.lifecycle.accept(&order_number, &celebrity_id).await?;
            }
            Command::Decline {
                order_number,
                celebrity_id,
                reason,
            } => {
                self.lifecycle
                    .decline(&order_number, &celebrity_id, &reason)
                    .await?;
            }
            Command::Deliver {
                order_number,
                celebrity_id,
                video_url,
            } => {
                self.lifecycle
                    .deliver(&order_number, &celebrity_id, &video_url)
                    .await?;
            }
            Command::Approve {
                order_number,
                customer_id,
            } => {
                self.lifecycle.approve(&order_number, &customer_id).await?;
            }
            Command::TransferPaid { order_number, event_id } => {
                let event = self.transfer_event(&order_number, None, event_id).await?;
                self.deliver(event).await?;
            }
            Command::TransferFailed {
                order_number,
                reason,
                event_id,
            } => {
                let reason = reason.unwrap_or_else(|| "destination account closed".to_string());
                let event = self
                    .transfer_event(&order_number, Some(reason), event_id)
                    .await?;
                self.deliver(event).await?;
            }
            Command::AddTip { order_number, amount } => {
                self.lifecycle
                    .add_tip(&order_number, Cents::from_major(amount)?)
                    .await?;
            }
            Command::TipPaymentSucceeded { order_number, event_id } => {
                let event = self.tip_payment_event(&order_number, event_id).await?;
                self.deliver(event).await?;
            }
            Command::Refund {
                order_number,
                reason,
            } => {
                self.lifecycle.refund(&order_number, &reason).await?;
            }
            Command::RetryTransfer { order_number } => {
                self.lifecycle.retry_transfer(&order_number).await?;
            }
            Command::InjectFault {
                target,
                fault,
                message,
                stall_ms,
            } => {
                let message = message.unwrap_or_else(|| "injected fault".to_string());
                let fault = match fault {
                    FaultKind::Transient => SandboxFault::Transient(message),
                    FaultKind::Reject => SandboxFault::Reject(message),
                    FaultKind::Stall => SandboxFault::Stall(Duration::from_millis(stall_ms.unwrap_or_default())),
                };
                match target {
                    FaultTarget::Transfer => self.gateway.push_transfer_fault(fault).await,
                    FaultTarget::Refund => self.gateway.push_refund_fault(fault).await,
                }
            }
            Command::ReplayDeferred => {
                self.replay_deferred().await?;
            }
            Command::RepairBookings => {
                self.repair_bookings().await?;
            }
        }
        Ok(())
    }

    pub async fn replay_deferred(&self) -> Result<ReplayReport> {
        let report = self.reconciler.replay_deferred().await?;
        info!(
            applied = report.applied,
            still_deferred = report.still_deferred,
            dropped = report.dropped,
            "deferred events replayed"
        );
        Ok(report)
    }

    pub async fn repair_bookings(&self) -> Result<RepairReport> {
        self.guarantor.sweep().await
    }

    pub async fn summaries(&self) -> Result<Vec<OrderSummary>> {
        let mut rows = Vec::new();
        for order in self.lifecycle.store().orders().await? {
            let view = self.lifecycle.order_view(&order.order_number).await?;
            rows.push(OrderSummary::from(&view));
        }
        Ok(rows)
    }

    async fn deliver(&self, event: GatewayEvent) -> Result<ReconcileOutcome> {
        let signed = self.gateway.sign_event(&event)?;
        let outcome = self
            .reconciler
            .handle(&signed.payload, &signed.signature)
            .await?;
        info!(event_id = %event.id, ?outcome, "webhook delivered");
        Ok(outcome)
    }

    async fn payment_event(&self, order_number: &str, succeeded: bool, event_id: Option<String>) -> Result<GatewayEvent> {
        let order = self.lifecycle.order_view(order_number).await?.order;
        let intent_id = order.payment_intent_id.clone().ok_or_else(|| {
            SettlementError::DataInconsistency(format!("order {order_number} has no payment intent"))
        })?;
        let kind = if succeeded {
            GatewayEventKind::PaymentSucceeded
        } else {
            GatewayEventKind::PaymentFailed
        };
        let object = GatewayObject {
            id: intent_id,
            amount: order.total_amount.value(),
            currency: order.currency.clone(),
            metadata: HashMap::from([(META_ORDER_ID.to_string(), order.id.to_string())]),
            failure_message: (!succeeded).then(|| "card_declined".to_string()),
        };
        Ok(SandboxGateway::event(kind, object, event_id))
    }

    async fn tip_payment_event(&self, order_number: &str, event_id: Option<String>) -> Result<GatewayEvent> {
        let view = self.lifecycle.order_view(order_number).await?;
        let tip = view
            .tips
            .iter()
            .find(|t| t.payment_status == TipPaymentStatus::Pending)
            .ok_or_else(|| SettlementError::NotFound {
                entity: "pending tip",
                key: order_number.to_string(),
            })?;
        let intent_id = tip.payment_intent_id.clone().ok_or_else(|| {
            SettlementError::DataInconsistency(format!("tip {} has no payment intent", tip.id))
        })?;
        let object = GatewayObject {
            id: intent_id,
            amount: tip.amount.value(),
            currency: tip.currency.clone(),
            metadata: HashMap::from([
                (META_ORDER_ID.to_string(), view.order.id.to_string()),
                (META_TIP_ID.to_string(), tip.id.to_string()),
            ]),
            failure_message: None,
        };
        Ok(SandboxGateway::event(GatewayEventKind::PaymentSucceeded, object, event_id))
    }

    /// Event for the order's latest booking-payment transfer. A transfer whose
    /// outcome was unknown is looked up at the gateway by idempotency key;
    /// failing that, the reconciler matches on the key in the metadata.
    async fn transfer_event(&self, order_number: &str, failure: Option<String>, event_id: Option<String>) -> Result<GatewayEvent> {
        let view = self.lifecycle.order_view(order_number).await?;
        let transfer = view
            .transfers
            .iter()
            .rev()
            .find(|t| t.kind == TransferKind::BookingPayment)
            .ok_or_else(|| SettlementError::NotFound {
                entity: "transfer",
                key: order_number.to_string(),
            })?;

        let transfer_ref = match &transfer.transfer_ref {
            Some(r) => r.clone(),
            None => self
                .gateway
                .transfer_by_key(&transfer.idempotency_key)
                .await
                .map(|t| t.id)
                .unwrap_or_else(|| transfer.idempotency_key.clone()),
        };
        let kind = if failure.is_some() {
            GatewayEventKind::TransferFailed
        } else {
            GatewayEventKind::TransferPaid
        };
        let object = GatewayObject {
            id: transfer_ref,
            amount: transfer.amount.value(),
            currency: transfer.currency.clone(),
            metadata: HashMap::from([
                (META_ORDER_ID.to_string(), view.order.id.to_string()),
                (META_IDEMPOTENCY_KEY.to_string(), transfer.idempotency_key.clone()),
            ]),
            failure_message: failure,
        };
        Ok(SandboxGateway::event(kind, object, event_id))
    }
}
