use crate::domain::money::Cents;
use crate::domain::order::{NewOrder, VideoRequest};
use crate::error::{Result, SettlementError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultTarget {
    Transfer,
    Refund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Transient,
    Reject,
    Stall,
}

/// One operation against the settlement core, tagged by `action`.
///
/// Amounts are in major currency units (`"299.00"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    Checkout {
        order_number: String,
        customer_id: String,
        celebrity_id: String,
        amount: Decimal,
        #[serde(default)]
        currency: Option<String>,
        recipient_name: String,
        #[serde(default)]
        occasion: Option<String>,
        #[serde(default)]
        instructions: Option<String>,
        #[serde(default)]
        deadline: Option<DateTime<Utc>>,
    },
    RegisterPayoutAccount {
        celebrity_id: String,
        account_id: String,
        #[serde(default = "chargeable_by_default")]
        chargeable: bool,
    },
    /// Delivers a signed `payment_intent.succeeded` for the order's intent.
    PaymentSucceeded {
        order_number: String,
        #[serde(default)]
        event_id: Option<String>,
    },
    PaymentFailed {
        order_number: String,
        #[serde(default)]
        event_id: Option<String>,
    },
    Accept {
        order_number: String,
        celebrity_id: String,
    },
    Decline {
        order_number: String,
        celebrity_id: String,
        reason: String,
    },
    Deliver {
        order_number: String,
        celebrity_id: String,
        video_url: String,
    },
    Approve {
        order_number: String,
        customer_id: String,
    },
    /// Delivers a signed `transfer.paid` for the order's latest transfer.
    TransferPaid {
        order_number: String,
        #[serde(default)]
        event_id: Option<String>,
    },
    TransferFailed {
        order_number: String,
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        event_id: Option<String>,
    },
    AddTip {
        order_number: String,
        amount: Decimal,
    },
    /// Delivers a signed `payment_intent.succeeded` for the order's oldest pending tip.
    TipPaymentSucceeded {
        order_number: String,
        #[serde(default)]
        event_id: Option<String>,
    },
    Refund {
        order_number: String,
        reason: String,
    },
    RetryTransfer {
        order_number: String,
    },
    /// Scripts the sandbox gateway's next answer.
    InjectFault {
        target: FaultTarget,
        fault: FaultKind,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        stall_ms: Option<u64>,
    },
    ReplayDeferred,
    RepairBookings,
}

fn chargeable_by_default() -> bool {
    true
}

fn required(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SettlementError::ValidationError(format!(
            "{field} must not be empty"
        )));
    }
    Ok(())
}

impl Command {
    pub fn action(&self) -> &'static str {
        match self {
            Command::Checkout { .. } => "checkout",
            Command::RegisterPayoutAccount { .. } => "register_payout_account",
            Command::PaymentSucceeded { .. } => "payment_succeeded",
            Command::PaymentFailed { .. } => "payment_failed",
            Command::Accept { .. } => "accept",
            Command::Decline { .. } => "decline",
            Command::Deliver { .. } => "deliver",
            Command::Approve { .. } => "approve",
            Command::TransferPaid { .. } => "transfer_paid",
            Command::TransferFailed { .. } => "transfer_failed",
            Command::AddTip { .. } => "add_tip",
            Command::TipPaymentSucceeded { .. } => "tip_payment_succeeded",
            Command::Refund { .. } => "refund",
            Command::RetryTransfer { .. } => "retry_transfer",
            Command::InjectFault { .. } => "inject_fault",
            Command::ReplayDeferred => "replay_deferred",
            Command::RepairBookings => "repair_bookings",
        }
    }

    /// Boundary checks that do not need any stored state.
    pub fn validate(&self) -> Result<()> {
        match self {
            Command::Checkout {
                order_number,
                customer_id,
                celebrity_id,
                amount,
                recipient_name,
                ..
            } => {
                required("order_number", order_number)?;
                required("customer_id", customer_id)?;
                required("celebrity_id", celebrity_id)?;
                required("recipient_name", recipient_name)?;
                if Cents::from_major(*amount)?.is_zero() {
                    return Err(SettlementError::ValidationError(
                        "amount must be positive".to_string(),
                    ));
                }
                Ok(())
            }
            Command::RegisterPayoutAccount {
                celebrity_id,
                account_id,
                ..
            } => {
                required("celebrity_id", celebrity_id)?;
                required("account_id", account_id)
            }
            Command::Decline { reason, .. } | Command::Refund { reason, .. } => {
                required("reason", reason)
            }
            Command::Deliver { video_url, .. } => required("video_url", video_url),
            Command::AddTip { amount, .. } => {
                if Cents::from_major(*amount)?.is_zero() {
                    return Err(SettlementError::ValidationError(
                        "tip amount must be positive".to_string(),
                    ));
                }
                Ok(())
            }
            Command::InjectFault {
                fault: FaultKind::Stall,
                stall_ms: None,
                ..
            } => Err(SettlementError::ValidationError(
                "stall faults need stall_ms".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// The checkout input of a `Checkout` command.
    pub fn into_new_order(self) -> Result<NewOrder> {
        let action = self.action();
        let Command::Checkout {
            order_number,
            customer_id,
            celebrity_id,
            amount,
            currency,
            recipient_name,
            occasion,
            instructions,
            deadline,
        } = self
        else {
            return Err(SettlementError::ValidationError(format!(
                "{action} is not a checkout"
            )));
        };
        Ok(NewOrder {
            order_number,
            customer_id,
            celebrity_id,
            total_amount: Cents::from_major(amount)?,
            currency: currency.unwrap_or_default(),
            request: VideoRequest {
                recipient_name,
                occasion,
                instructions,
                deadline,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_checkout() {
        let json = r#"{"action":"checkout","order_number":"SO-1","customer_id":"fan","celebrity_id":"celeb",
                       "amount":"299.00","recipient_name":"Sam","occasion":"Birthday"}"#;
        let command: Command = serde_json::from_str(json).unwrap();
        command.validate().unwrap();
        assert_eq!(command.action(), "checkout");

        let new = command.into_new_order().unwrap();
        assert_eq!(new.total_amount, Cents::new(29900).unwrap());
        assert_eq!(new.request.occasion.as_deref(), Some("Birthday"));
        assert_eq!(new.currency, "");
    }

    #[test]
    fn test_only_checkout_builds_an_order() {
        let json = r#"{"action":"accept","order_number":"SO-1","celebrity_id":"celeb"}"#;
        let command: Command = serde_json::from_str(json).unwrap();
        assert!(matches!(
            command.into_new_order(),
            Err(SettlementError::ValidationError(_))
        ));
    }

    #[test]
    fn test_unknown_action_rejected() {
        let result: std::result::Result<Command, _> =
            serde_json::from_str(r#"{"action":"teleport","order_number":"SO-1"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_field_rejected() {
        let result: std::result::Result<Command, _> =
            serde_json::from_str(r#"{"action":"decline","order_number":"SO-1"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validation() {
        let zero = Command::AddTip {
            order_number: "SO-1".to_string(),
            amount: dec!(0.00),
        };
        assert!(zero.validate().is_err());

        let sub_cent = Command::AddTip {
            order_number: "SO-1".to_string(),
            amount: dec!(1.005),
        };
        assert!(sub_cent.validate().is_err());

        let blank = Command::Decline {
            order_number: "SO-1".to_string(),
            celebrity_id: "celeb".to_string(),
            reason: "  ".to_string(),
        };
        assert!(blank.validate().is_err());

        let unit: Command = serde_json::from_str(r#"{"action":"replay_deferred"}"#).unwrap();
        assert_eq!(unit, Command::ReplayDeferred);
    }

    #[test]
    fn test_payout_account_defaults_to_chargeable() {
        let command: Command = serde_json::from_str(
            r#"{"action":"register_payout_account","celebrity_id":"c","account_id":"acct_1"}"#,
        )
        .unwrap();
        assert!(matches!(
            command,
            Command::RegisterPayoutAccount {
                chargeable: true,
                ..
            }
        ));
    }
}
