use crate::domain::ports::{
    PaymentGatewayRef, PayoutAccountRegistryRef, TransferReceipt, TransferRequest,
};
use crate::error::{GatewayError, Result, SettlementError};
use crate::settings::GatewaySettings;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Bounded exponential backoff with jitter, plus a per-call deadline.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay_ms: settings.base_delay_ms,
            max_delay_ms: settings.max_delay_ms,
            timeout: settings.timeout,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(20));
        let cap = exp.min(self.max_delay_ms.max(self.base_delay_ms));
        let delay_ms = if cap > self.base_delay_ms {
            rand::thread_rng().gen_range(self.base_delay_ms..=cap)
        } else {
            self.base_delay_ms
        };
        Duration::from_millis(delay_ms)
    }

    /// Runs `op` until it succeeds, fails permanently or attempts run out.
    ///
    /// A timed-out call is never retried: its outcome is unknown and a second
    /// request could move money twice.
    pub async fn run<F, Fut, T>(&self, desc: &str, mut op: F) -> std::result::Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, GatewayError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let result = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Timeout),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay(attempt);
                    warn!(
                        desc = %desc,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "gateway call failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// What is known about a transfer after dispatching it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The gateway accepted the transfer; settlement arrives by webhook.
    Submitted { transfer_ref: String },
    /// The gateway refused it, or transient failures outlasted the retry budget.
    Failed { reason: String },
    /// The call timed out. The transfer may or may not exist.
    Unknown,
}

/// Sends money to celebrities' payout accounts through the gateway.
pub struct PayoutDispatcher {
    gateway: PaymentGatewayRef,
    registry: PayoutAccountRegistryRef,
    policy: RetryPolicy,
}

impl PayoutDispatcher {
    pub fn new(gateway: PaymentGatewayRef, registry: PayoutAccountRegistryRef, policy: RetryPolicy) -> Self {
        Self {
            gateway,
            registry,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The connected payout account for `celebrity_id`, or `PayoutAccountMissing`.
    pub async fn resolve_destination(&self, celebrity_id: &str) -> Result<String> {
        match self.registry.payout_account(celebrity_id).await? {
            Some(account) if account.chargeable => Ok(account.account_id),
            _ => Err(SettlementError::PayoutAccountMissing {
                celebrity: celebrity_id.to_string(),
            }),
        }
    }

    #[instrument(skip(self, request), fields(idempotency_key = %request.idempotency_key, amount = request.amount.value()))]
    pub async fn dispatch(&self, request: TransferRequest) -> TransferOutcome {
        let gateway = self.gateway.clone();
        let result = self
            .policy
            .run("create_transfer", || {
                let gateway = gateway.clone();
                let request = request.clone();
                async move { gateway.create_transfer(request).await }
            })
            .await;

        match result {
            Ok(TransferReceipt { transfer_id }) => {
                info!(transfer_ref = %transfer_id, "transfer submitted");
                TransferOutcome::Submitted {
                    transfer_ref: transfer_id,
                }
            }
            Err(GatewayError::Timeout) => {
                warn!("transfer outcome unknown after timeout");
                TransferOutcome::Unknown
            }
            Err(e) => {
                warn!(error = %e, "transfer failed");
                TransferOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Refunds a captured payment. Retried like transfers; refunds are keyed so a retry cannot refund twice.
    #[instrument(skip(self))]
    pub async fn refund(&self, intent_id: &str, idempotency_key: &str) -> std::result::Result<String, GatewayError> {
        let gateway = self.gateway.clone();
        self.policy
            .run("create_refund", || {
                let gateway = gateway.clone();
                let intent_id = intent_id.to_string();
                let key = idempotency_key.to_string();
                async move { gateway.create_refund(&intent_id, &key).await }
            })
            .await
    }
}
