//! In-process stand-ins for the outbound collaborators. Compiled for this
//! crate's tests and behind the `testing` feature.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use ferry_core::{
    CoreError, CoreResult, GatewayTransaction, Notifier, PaymentGateway, PaymentRequest,
    PaymentStatus,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Notifier that keeps every message it was asked to send.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentEmail>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Makes every subsequent `send` fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> CoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::External("smtp unavailable".into()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(SentEmail {
                to: to.to_string(),
                subject: subject.to_string(),
                html: html_body.to_string(),
            });
        Ok(())
    }
}

/// Gateway that accepts every payment and remembers it by reference.
#[derive(Debug, Default)]
pub struct FakeGateway {
    transactions: Mutex<HashMap<String, GatewayTransaction>>,
    created: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Simulates the customer paying (or not) on the gateway side.
    pub fn set_status(&self, reference: &str, status: PaymentStatus) {
        let mut transactions = self.transactions.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(tx) = transactions.get_mut(reference) {
            tx.status = status;
        }
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_payment(&self, request: &PaymentRequest) -> CoreResult<GatewayTransaction> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let reference = format!("DEV-T{n:06}");
        let tx = GatewayTransaction {
            reference: reference.clone(),
            merchant_ref: request.merchant_ref.clone(),
            amount: request.amount,
            status: PaymentStatus::Unpaid,
            checkout_url: Some(format!("https://pay.invalid/checkout/{reference}")),
            expires_at: Some(request.expires_at),
        };
        self.transactions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(reference, tx.clone());
        Ok(tx)
    }

    async fn get_transaction_detail(&self, reference: &str) -> CoreResult<GatewayTransaction> {
        self.transactions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(reference)
            .cloned()
            .ok_or_else(|| CoreError::External(format!("unknown payment reference {reference}")))
    }
}
