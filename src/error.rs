use miette::Diagnostic;
use thiserror::Error;

/// Failure classification for calls made to the external payment gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Network failure, 5xx or rate limiting. Safe to retry with the same idempotency key.
    #[error("transient gateway failure: {0}")]
    Transient(String),
    /// The gateway refused the request (bad destination, insufficient balance, ...).
    #[error("gateway rejected request: {0}")]
    Rejected(String),
    /// No answer within the configured deadline. The outcome is unknown.
    #[error("gateway call timed out")]
    Timeout,
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }
}

#[derive(Error, Diagnostic, Debug)]
pub enum SettlementError {
    #[error("order {order}: cannot {action} while {state}")]
    #[diagnostic(code(shoutout::invalid_transition))]
    InvalidStateTransition {
        order: String,
        action: &'static str,
        state: String,
    },

    #[error("celebrity {celebrity} has no chargeable payout account")]
    #[diagnostic(
        code(shoutout::payout_account_missing),
        help("the celebrity must finish payout onboarding before the order can be approved")
    )]
    PayoutAccountMissing { celebrity: String },

    #[error("payment gateway unavailable: {0}")]
    #[diagnostic(code(shoutout::gateway_transient))]
    GatewayTransient(String),

    #[error("transfer for order {order} failed: {reason}")]
    #[diagnostic(code(shoutout::transfer_failed))]
    TransferFailed { order: String, reason: String },

    #[error("webhook rejected: {0}")]
    #[diagnostic(code(shoutout::unauthorized_webhook))]
    UnauthorizedWebhook(String),

    #[error("data inconsistency: {0}")]
    #[diagnostic(code(shoutout::data_inconsistency))]
    DataInconsistency(String),

    #[error("{entity} {key} not found")]
    #[diagnostic(code(shoutout::not_found))]
    NotFound { entity: &'static str, key: String },

    #[error("{actor} is not a party to order {order}")]
    #[diagnostic(code(shoutout::not_owner))]
    NotOwner { order: String, actor: String },

    #[error("validation error: {0}")]
    #[diagnostic(code(shoutout::validation))]
    ValidationError(String),

    #[error("order {0} was modified concurrently")]
    #[diagnostic(code(shoutout::concurrent_modification))]
    ConcurrentModification(String),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDBError(#[from] rocksdb::Error),

    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl SettlementError {
    pub fn internal(message: impl Into<String>) -> Self {
        SettlementError::InternalError(Box::new(std::io::Error::other(message.into())))
    }

    /// HTTP-equivalent status for a transport layer surfacing this error.
    pub fn status_code(&self) -> u16 {
        match self {
            SettlementError::InvalidStateTransition { .. } => 409,
            SettlementError::PayoutAccountMissing { .. } => 422,
            SettlementError::GatewayTransient(_) => 503,
            SettlementError::TransferFailed { .. } => 502,
            SettlementError::UnauthorizedWebhook(_) => 401,
            SettlementError::DataInconsistency(_) => 409,
            SettlementError::NotFound { .. } => 404,
            SettlementError::NotOwner { .. } => 403,
            SettlementError::ValidationError(_) => 400,
            SettlementError::JsonError(_) | SettlementError::CsvError(_) => 400,
            SettlementError::ConcurrentModification(_) => 409,
            _ => 500,
        }
    }

    /// Whether the error describes a legitimate business outcome rather than
    /// an infrastructure failure.
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            SettlementError::InvalidStateTransition { .. }
                | SettlementError::PayoutAccountMissing { .. }
                | SettlementError::NotFound { .. }
                | SettlementError::NotOwner { .. }
                | SettlementError::ValidationError(_)
        )
    }
}

impl From<GatewayError> for SettlementError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Transient(msg) => SettlementError::GatewayTransient(msg),
            GatewayError::Timeout => SettlementError::GatewayTransient("timed out".to_string()),
            GatewayError::Rejected(msg) => SettlementError::ValidationError(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, SettlementError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_separate_business_from_infrastructure() {
        let invalid = SettlementError::InvalidStateTransition {
            order: "SO-1".to_string(),
            action: "approve",
            state: "CANCELLED".to_string(),
        };
        assert_eq!(invalid.status_code(), 409);
        assert!(invalid.is_business());

        let webhook = SettlementError::UnauthorizedWebhook("bad signature".to_string());
        assert_eq!(webhook.status_code(), 401);
        assert!(!webhook.is_business());

        let gateway = SettlementError::from(GatewayError::Timeout);
        assert_eq!(gateway.status_code(), 503);
    }

    #[test]
    fn test_gateway_error_transience() {
        assert!(GatewayError::Transient("502".into()).is_transient());
        assert!(!GatewayError::Rejected("no such account".into()).is_transient());
        assert!(!GatewayError::Timeout.is_transient());
    }
}
