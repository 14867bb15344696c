use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_shared::Masked;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{CoreError, CoreResult};

/// Transaction status as reported by the payment gateway.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Failed,
    Expired,
    Refund,
}

impl PaymentStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "UNPAID",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Expired => "EXPIRED",
            PaymentStatus::Refund => "REFUND",
        }
    }

    /// Outcomes that release the held capacity.
    pub const fn is_failure(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Failed | PaymentStatus::Expired | PaymentStatus::Refund
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UNPAID" => Ok(PaymentStatus::Unpaid),
            "PAID" => Ok(PaymentStatus::Paid),
            "FAILED" => Ok(PaymentStatus::Failed),
            "EXPIRED" => Ok(PaymentStatus::Expired),
            "REFUND" => Ok(PaymentStatus::Refund),
            _ => Err(CoreError::InvalidRequest(format!("unknown payment status {s:?}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentItem {
    pub name: String,
    pub price: i64,
    pub quantity: i64,
}

/// Payload for opening a payment with the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Our order id; the gateway echoes it back as `merchant_ref` in callbacks.
    pub merchant_ref: String,
    pub amount: i64,
    pub customer_name: String,
    pub customer_email: Masked<String>,
    pub customer_phone: Masked<String>,
    pub items: Vec<PaymentItem>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayTransaction {
    pub reference: String,
    pub merchant_ref: String,
    pub amount: i64,
    pub status: PaymentStatus,
    pub checkout_url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment(&self, request: &PaymentRequest) -> CoreResult<GatewayTransaction>;

    async fn get_transaction_detail(&self, reference: &str) -> CoreResult<GatewayTransaction>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gateway_statuses_case_insensitively() {
        assert_eq!("paid".parse::<PaymentStatus>().unwrap(), PaymentStatus::Paid);
        assert_eq!(" EXPIRED ".parse::<PaymentStatus>().unwrap(), PaymentStatus::Expired);
    }

    #[test]
    fn unknown_status_is_invalid_request() {
        assert!(matches!(
            "SETTLED".parse::<PaymentStatus>(),
            Err(CoreError::InvalidRequest(_))
        ));
    }

    #[test]
    fn failure_statuses() {
        assert!(PaymentStatus::Refund.is_failure());
        assert!(PaymentStatus::Failed.is_failure());
        assert!(!PaymentStatus::Paid.is_failure());
        assert!(!PaymentStatus::Unpaid.is_failure());
    }
}
