use super::signature::{self, SignatureError};
use crate::domain::event::{GatewayEvent, GatewayEventData, GatewayEventKind, GatewayObject};
use crate::domain::money::Cents;
use crate::domain::ports::{PaymentGateway, PaymentIntent, TransferReceipt, TransferRequest};
use crate::error::{GatewayError, Result, SettlementError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// A scripted failure for the next gateway call of a given kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxFault {
    Transient(String),
    Reject(String),
    /// Sleeps before answering, so callers with a shorter deadline time out.
    /// Transfers are still executed.
    Stall(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxIntent {
    pub id: String,
    pub amount: Cents,
    pub currency: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxTransfer {
    pub id: String,
    pub destination: String,
    pub amount: Cents,
    pub currency: String,
    pub idempotency_key: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedWebhook {
    pub payload: Vec<u8>,
    pub signature: String,
}

#[derive(Default)]
struct SandboxState {
    intents: HashMap<String, SandboxIntent>,
    /// Keyed by idempotency key: the same key always yields the same transfer.
    transfers: HashMap<String, SandboxTransfer>,
    refunds: HashMap<String, String>,
    transfer_faults: VecDeque<SandboxFault>,
    refund_faults: VecDeque<SandboxFault>,
    transfer_calls: u32,
}

/// In-process payment gateway honouring the external contract: idempotent
/// transfers, signed webhooks and injectable failures.
#[derive(Clone)]
pub struct SandboxGateway {
    state: Arc<Mutex<SandboxState>>,
    webhook_secret: String,
    tolerance_seconds: i64,
}

impl SandboxGateway {
    pub fn new(webhook_secret: impl Into<String>, tolerance_seconds: i64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SandboxState::default())),
            webhook_secret: webhook_secret.into(),
            tolerance_seconds,
        }
    }

    pub async fn push_transfer_fault(&self, fault: SandboxFault) {
        self.state.lock().await.transfer_faults.push_back(fault);
    }

    pub async fn push_refund_fault(&self, fault: SandboxFault) {
        self.state.lock().await.refund_faults.push_back(fault);
    }

    pub async fn intent(&self, intent_id: &str) -> Option<SandboxIntent> {
        self.state.lock().await.intents.get(intent_id).cloned()
    }

    pub async fn transfers(&self) -> Vec<SandboxTransfer> {
        self.state.lock().await.transfers.values().cloned().collect()
    }

    pub async fn refunds(&self) -> Vec<String> {
        self.state.lock().await.refunds.values().cloned().collect()
    }

    pub async fn transfer_by_key(&self, idempotency_key: &str) -> Option<SandboxTransfer> {
        self.state.lock().await.transfers.get(idempotency_key).cloned()
    }

    /// Number of transfer requests received, including failed and deduplicated ones.
    pub async fn transfer_calls(&self) -> u32 {
        self.state.lock().await.transfer_calls
    }

    /// Wraps an object in the gateway's event envelope; a missing id gets a fresh one.
    pub fn event(kind: GatewayEventKind, object: GatewayObject, event_id: Option<String>) -> GatewayEvent {
        GatewayEvent {
            id: event_id.unwrap_or_else(|| format!("evt_{}", Uuid::new_v4().simple())),
            event_type: kind.as_str().to_string(),
            created: chrono::Utc::now().timestamp(),
            data: GatewayEventData { object },
        }
    }

    /// Builds a `payment_intent.*` event for a known intent.
    pub async fn payment_event(
        &self,
        intent_id: &str,
        succeeded: bool,
        event_id: Option<String>,
    ) -> Result<GatewayEvent> {
        let intent = self.intent(intent_id).await.ok_or_else(|| SettlementError::NotFound {
            entity: "payment intent",
            key: intent_id.to_string(),
        })?;
        let kind = if succeeded {
            GatewayEventKind::PaymentSucceeded
        } else {
            GatewayEventKind::PaymentFailed
        };
        let object = GatewayObject {
            id: intent.id,
            amount: intent.amount.value(),
            currency: intent.currency,
            metadata: intent.metadata,
            failure_message: (!succeeded).then(|| "card_declined".to_string()),
        };
        Ok(Self::event(kind, object, event_id))
    }

    /// Builds a `transfer.*` event for a known transfer.
    pub async fn transfer_event(
        &self,
        transfer_id: &str,
        paid: bool,
        failure_message: Option<String>,
        event_id: Option<String>,
    ) -> Result<GatewayEvent> {
        let transfer = {
            let state = self.state.lock().await;
            state
                .transfers
                .values()
                .find(|t| t.id == transfer_id)
                .cloned()
        }
        .ok_or_else(|| SettlementError::NotFound {
            entity: "transfer",
            key: transfer_id.to_string(),
        })?;
        let kind = if paid {
            GatewayEventKind::TransferPaid
        } else {
            GatewayEventKind::TransferFailed
        };
        let object = GatewayObject {
            id: transfer.id,
            amount: transfer.amount.value(),
            currency: transfer.currency,
            metadata: transfer.metadata,
            failure_message: if paid {
                None
            } else {
                failure_message.or_else(|| Some("destination account closed".to_string()))
            },
        };
        Ok(Self::event(kind, object, event_id))
    }

    /// Serializes and signs an event the way the gateway delivers it.
    pub fn sign_event(&self, event: &GatewayEvent) -> Result<SignedWebhook> {
        let payload = serde_json::to_vec(event)?;
        let signature = signature::sign(&payload, &self.webhook_secret, chrono::Utc::now().timestamp())
            .map_err(|e| SettlementError::internal(e.to_string()))?;
        Ok(SignedWebhook { payload, signature })
    }

    async fn take_fault(queue: &Mutex<SandboxState>, transfer: bool) -> Option<SandboxFault> {
        let mut state = queue.lock().await;
        if transfer {
            state.transfer_calls += 1;
            state.transfer_faults.pop_front()
        } else {
            state.refund_faults.pop_front()
        }
    }

    async fn apply_fault(fault: Option<SandboxFault>) -> std::result::Result<(), GatewayError> {
        match fault {
            Some(SandboxFault::Transient(msg)) => Err(GatewayError::Transient(msg)),
            Some(SandboxFault::Reject(msg)) => Err(GatewayError::Rejected(msg)),
            Some(SandboxFault::Stall(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    #[instrument(skip(self, metadata), fields(amount = amount.value()))]
    async fn create_payment_intent(
        &self,
        amount: Cents,
        currency: &str,
        metadata: HashMap<String, String>,
    ) -> std::result::Result<PaymentIntent, GatewayError> {
        if amount.is_zero() {
            return Err(GatewayError::Rejected(
                "amount must be greater than zero".to_string(),
            ));
        }
        let id = format!("pi_{}", Uuid::new_v4().simple());
        let intent = SandboxIntent {
            id: id.clone(),
            amount,
            currency: currency.to_ascii_lowercase(),
            metadata,
        };
        self.state.lock().await.intents.insert(id.clone(), intent);
        debug!(payment_intent_id = %id, "sandbox payment intent created");
        Ok(PaymentIntent {
            client_secret: Some(format!("{id}_secret_{}", Uuid::new_v4().simple())),
            id,
        })
    }

    #[instrument(skip(self, request), fields(idempotency_key = %request.idempotency_key, amount = request.amount.value()))]
    async fn create_transfer(
        &self,
        request: TransferRequest,
    ) -> std::result::Result<TransferReceipt, GatewayError> {
        let fault = Self::take_fault(&self.state, true).await;
        // a stalled transfer is still executed; only the answer is late
        let stall = match fault {
            Some(SandboxFault::Stall(delay)) => Some(delay),
            other => {
                Self::apply_fault(other).await?;
                None
            }
        };

        let transfer_id = {
            let mut state = self.state.lock().await;
            if let Some(existing) = state.transfers.get(&request.idempotency_key) {
                info!(transfer_id = %existing.id, "sandbox transfer deduplicated by idempotency key");
                existing.id.clone()
            } else {
                let transfer = SandboxTransfer {
                    id: format!("tr_{}", Uuid::new_v4().simple()),
                    destination: request.destination,
                    amount: request.amount,
                    currency: request.currency,
                    idempotency_key: request.idempotency_key.clone(),
                    metadata: request.metadata,
                };
                let id = transfer.id.clone();
                state.transfers.insert(request.idempotency_key, transfer);
                id
            }
        };

        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        Ok(TransferReceipt { transfer_id })
    }

    #[instrument(skip(self))]
    async fn create_refund(
        &self,
        intent_id: &str,
        idempotency_key: &str,
    ) -> std::result::Result<String, GatewayError> {
        let fault = Self::take_fault(&self.state, false).await;
        Self::apply_fault(fault).await?;

        let mut state = self.state.lock().await;
        if !state.intents.contains_key(intent_id) {
            return Err(GatewayError::Rejected(format!(
                "no such payment intent: {intent_id}"
            )));
        }
        let refund_id = state
            .refunds
            .entry(idempotency_key.to_string())
            .or_insert_with(|| format!("re_{}", Uuid::new_v4().simple()))
            .clone();
        Ok(refund_id)
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> Result<GatewayEvent> {
        signature::verify(
            payload,
            signature,
            &self.webhook_secret,
            self.tolerance_seconds,
            chrono::Utc::now().timestamp(),
        )
        .map_err(|e: SignatureError| {
            warn!(target: "security", error = %e, "webhook signature verification failed");
            SettlementError::UnauthorizedWebhook(e.to_string())
        })?;
        serde_json::from_slice(payload).map_err(|e| {
            SettlementError::ValidationError(format!("malformed webhook payload: {e}"))
        })
    }
}
