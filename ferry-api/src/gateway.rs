//! HTTP client for the hosted payment gateway.
//!
//! The gateway wraps every answer in `{ success, message, data }`.
//! Transport failures and 5xx answers are reported as
//! [`CoreError::External`]; the booking state is never touched here.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ferry_core::{
    CoreError, CoreResult, GatewayTransaction, PaymentGateway, PaymentItem, PaymentRequest,
    PaymentStatus,
};
use ferry_store::app_config::PaymentConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
enum GatewayError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("gateway answered {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("gateway returned no transaction data")]
    EmptyBody,
    #[error(transparent)]
    Status(#[from] CoreError),
}

impl From<GatewayError> for CoreError {
    fn from(err: GatewayError) -> Self {
        CoreError::External(err.to_string())
    }
}

#[derive(Debug, Serialize)]
struct CreateTransactionBody<'a> {
    method: &'a str,
    merchant_code: &'a str,
    merchant_ref: &'a str,
    amount: i64,
    customer_name: &'a str,
    customer_email: &'a str,
    customer_phone: &'a str,
    order_items: &'a [PaymentItem],
    callback_url: &'a str,
    expired_time: i64,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    message: String,
    data: Option<TransactionData>,
}

#[derive(Debug, Deserialize)]
struct TransactionData {
    reference: String,
    merchant_ref: String,
    amount: i64,
    status: String,
    checkout_url: Option<String>,
    expired_time: Option<i64>,
}

impl TransactionData {
    fn into_transaction(self) -> Result<GatewayTransaction, GatewayError> {
        let status: PaymentStatus = self.status.parse()?;
        Ok(GatewayTransaction {
            reference: self.reference,
            merchant_ref: self.merchant_ref,
            amount: self.amount,
            status,
            checkout_url: self.checkout_url,
            expires_at: self.expired_time.and_then(from_unix),
        })
    }
}

fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

#[derive(Clone)]
pub struct HttpPaymentGateway {
    http_client: Client,
    base_url: String,
    api_key: String,
    merchant_code: String,
    callback_url: String,
}

impl HttpPaymentGateway {
    pub fn new(config: &PaymentConfig) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            merchant_code: config.merchant_code.clone(),
            callback_url: config.callback_url.clone(),
        })
    }

    async fn read(response: reqwest::Response) -> Result<GatewayTransaction, GatewayError> {
        let status = response.status();
        if status.is_server_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: Envelope = response.json().await?;
        if !envelope.success {
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message: envelope.message,
            });
        }
        envelope
            .data
            .ok_or(GatewayError::EmptyBody)?
            .into_transaction()
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_payment(&self, request: &PaymentRequest) -> CoreResult<GatewayTransaction> {
        let body = CreateTransactionBody {
            method: "QRIS",
            merchant_code: &self.merchant_code,
            merchant_ref: &request.merchant_ref,
            amount: request.amount,
            customer_name: &request.customer_name,
            customer_email: request.customer_email.expose(),
            customer_phone: request.customer_phone.expose(),
            order_items: &request.items,
            callback_url: &self.callback_url,
            expired_time: request.expires_at.timestamp(),
        };

        let response = self
            .http_client
            .post(format!("{}/transaction/create", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(GatewayError::from)?;

        let tx = Self::read(response).await.inspect_err(|e| {
            tracing::error!(order_id = %request.merchant_ref, error = %e, "payment creation failed");
        })?;
        tracing::info!(order_id = %tx.merchant_ref, reference = %tx.reference, "payment created");
        Ok(tx)
    }

    async fn get_transaction_detail(&self, reference: &str) -> CoreResult<GatewayTransaction> {
        let response = self
            .http_client
            .get(format!("{}/transaction/detail", self.base_url))
            .bearer_auth(&self.api_key)
            .query(&[("reference", reference)])
            .send()
            .await
            .map_err(GatewayError::from)?;

        Ok(Self::read(response).await?)
    }
}
