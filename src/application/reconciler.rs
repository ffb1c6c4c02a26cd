use super::lifecycle::{OrderLifecycle, TransferEventRef};
use crate::domain::alert::{AdminAlert, AlertKind};
use crate::domain::event::{GatewayEvent, GatewayEventKind, META_IDEMPOTENCY_KEY, META_ORDER_ID};
use crate::domain::money::Cents;
use crate::domain::order::OrderId;
use crate::domain::ports::{DeferredEvent, EventLogRef, PaymentGatewayRef};
use crate::error::{Result, SettlementError};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// What happened to one delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied,
    /// The event id was processed before.
    Duplicate,
    /// Unknown event type, or a transition the order has already moved past.
    Ignored,
    /// Arrived before the state it depends on; parked for replay.
    Deferred,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub applied: usize,
    pub still_deferred: usize,
    pub dropped: usize,
}

/// Idempotent consumer of payment gateway webhooks.
pub struct WebhookReconciler {
    lifecycle: Arc<OrderLifecycle>,
    gateway: PaymentGatewayRef,
    events: EventLogRef,
    max_deferred_attempts: u32,
}

impl WebhookReconciler {
    pub fn new(
        lifecycle: Arc<OrderLifecycle>,
        gateway: PaymentGatewayRef,
        events: EventLogRef,
        max_deferred_attempts: u32,
    ) -> Self {
        Self {
            lifecycle,
            gateway,
            events,
            max_deferred_attempts: max_deferred_attempts.max(1),
        }
    }

    /// Authenticates a raw delivery and processes it.
    ///
    /// Anything failing verification is rejected with `UnauthorizedWebhook`
    /// before the payload is looked at.
    pub async fn handle(&self, payload: &[u8], signature: &str) -> Result<ReconcileOutcome> {
        let event = self.gateway.verify_webhook(payload, signature)?;
        self.process_event(event).await
    }

    #[instrument(skip_all, fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn process_event(&self, event: GatewayEvent) -> Result<ReconcileOutcome> {
        if self.events.is_processed(&event.id).await? {
            debug!("duplicate delivery");
            return Ok(ReconcileOutcome::Duplicate);
        }
        if event.kind().is_none() {
            debug!("event type not handled");
            self.events.mark_processed(&event.id).await?;
            return Ok(ReconcileOutcome::Ignored);
        }

        match self.apply(&event).await {
            Ok(()) => {
                self.events.mark_processed(&event.id).await?;
                info!("event applied");
                Ok(ReconcileOutcome::Applied)
            }
            Err(SettlementError::InvalidStateTransition { order, action, state }) => {
                // already applied under another event id, or superseded
                info!(%order, action, %state, "event ignored by guard rule");
                self.events.mark_processed(&event.id).await?;
                Ok(ReconcileOutcome::Ignored)
            }
            Err(SettlementError::DataInconsistency(reason)) => {
                warn!(%reason, "event out of order; deferring");
                self.events
                    .defer(DeferredEvent {
                        event,
                        attempts: 1,
                        last_error: reason,
                        deferred_at: Utc::now(),
                    })
                    .await?;
                Ok(ReconcileOutcome::Deferred)
            }
            Err(e) => Err(e),
        }
    }

    async fn apply(&self, event: &GatewayEvent) -> Result<()> {
        let Some(kind) = event.kind() else {
            return Ok(());
        };
        let object = event.object();

        match kind {
            GatewayEventKind::PaymentSucceeded => {
                let amount = Cents::new(object.amount)?;
                self.lifecycle
                    .record_payment_succeeded(&object.id, amount)
                    .await?;
            }
            GatewayEventKind::PaymentFailed => {
                self.lifecycle
                    .record_payment_failed(&object.id, object.failure_message.clone())
                    .await?;
            }
            GatewayEventKind::TransferPaid => {
                self.lifecycle
                    .record_transfer_paid(&Self::transfer_ref(event))
                    .await?;
            }
            GatewayEventKind::TransferFailed => {
                let reason = object
                    .failure_message
                    .clone()
                    .unwrap_or_else(|| "transfer failed".to_string());
                self.lifecycle
                    .record_transfer_failed(&Self::transfer_ref(event), &reason)
                    .await?;
            }
        }
        Ok(())
    }

    fn transfer_ref(event: &GatewayEvent) -> TransferEventRef {
        TransferEventRef {
            transfer_ref: event.object().id.clone(),
            order_id: event
                .metadata(META_ORDER_ID)
                .and_then(|id| Uuid::parse_str(id).ok())
                .map(OrderId),
            idempotency_key: event.metadata(META_IDEMPOTENCY_KEY).map(str::to_string),
        }
    }

    /// Retries every parked event once.
    ///
    /// Events still inconsistent after `max_deferred_attempts` are dropped
    /// with a `DeferredEventDropped` alert.
    #[instrument(skip(self))]
    pub async fn replay_deferred(&self) -> Result<ReplayReport> {
        let mut report = ReplayReport::default();
        for mut deferred in self.events.deferred().await? {
            let event_id = deferred.event.id.clone();
            if self.events.is_processed(&event_id).await? {
                self.events.remove_deferred(&event_id).await?;
                continue;
            }

            match self.apply(&deferred.event).await {
                Ok(()) | Err(SettlementError::InvalidStateTransition { .. }) => {
                    self.events.mark_processed(&event_id).await?;
                    self.events.remove_deferred(&event_id).await?;
                    report.applied += 1;
                }
                Err(SettlementError::DataInconsistency(reason)) => {
                    deferred.attempts += 1;
                    deferred.last_error = reason;
                    if deferred.attempts >= self.max_deferred_attempts {
                        warn!(event_id = %event_id, attempts = deferred.attempts, "dropping deferred event");
                        self.lifecycle
                            .store()
                            .record_alert(AdminAlert::new(
                                None,
                                AlertKind::DeferredEventDropped,
                                format!(
                                    "event {} ({}) dropped after {} attempts: {}",
                                    event_id,
                                    deferred.event.event_type,
                                    deferred.attempts,
                                    deferred.last_error
                                ),
                                Utc::now(),
                            ))
                            .await?;
                        self.events.remove_deferred(&event_id).await?;
                        report.dropped += 1;
                    } else {
                        self.events.defer(deferred).await?;
                        report.still_deferred += 1;
                    }
                }
                Err(e) => {
                    warn!(event_id = %event_id, error = %e, "deferred event failed; keeping it");
                    report.still_deferred += 1;
                }
            }
        }
        Ok(report)
    }
}
