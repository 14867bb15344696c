//! Payment initiation. The gateway is called between two short
//! transactions, never while a row lock is held.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use ferry_core::{
    Booking, ClaimSession, ClaimStatus, CoreError, CoreResult, PaymentItem, PaymentRequest,
    Ticket, Transaction, UnitOfWork,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentInitiation {
    pub order_id: String,
    pub reference_number: String,
    pub amount: i64,
    pub checkout_url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Booking, its session and tickets, read for payment purposes.
#[derive(Debug, Clone)]
pub struct PaymentContext {
    pub booking: Booking,
    pub session: ClaimSession,
    pub tickets: Vec<Ticket>,
}

impl PaymentContext {
    pub fn total(&self) -> i64 {
        self.tickets.iter().map(|t| t.price).sum()
    }

    /// Gateway line items: tickets grouped by class.
    pub fn items(&self) -> Vec<PaymentItem> {
        let mut grouped: BTreeMap<(i64, i64), (String, i64)> = BTreeMap::new();
        for ticket in &self.tickets {
            let entry = grouped
                .entry((ticket.class_id, ticket.price))
                .or_insert_with(|| (format!("{} ticket, class {}", ticket.ticket_type, ticket.class_id), 0));
            entry.1 += 1;
        }
        grouped
            .into_iter()
            .map(|((_, price), (name, quantity))| PaymentItem { name, price, quantity })
            .collect()
    }

    pub fn payment_request(&self) -> PaymentRequest {
        let customer = &self.booking.customer;
        PaymentRequest {
            merchant_ref: self.booking.order_id.clone(),
            amount: self.total(),
            customer_name: customer.name.clone(),
            customer_email: customer.email.clone(),
            customer_phone: customer.phone_number.clone(),
            items: self.items(),
            expires_at: self.session.expires_at,
        }
    }

    /// Payment can only be opened for a session awaiting payment and in time.
    pub fn ensure_payable(&self, now: DateTime<Utc>) -> CoreResult<()> {
        if self.session.status != ClaimStatus::PendingPayment {
            return Err(CoreError::InvalidState(format!(
                "booking {} is {}, expected {}",
                self.booking.order_id,
                self.session.status,
                ClaimStatus::PendingPayment
            )));
        }
        if self.session.is_overdue(now) {
            return Err(CoreError::Expired(format!(
                "payment window for booking {} closed at {}",
                self.booking.order_id, self.session.expires_at
            )));
        }
        Ok(())
    }
}

pub struct LoadPaymentContext {
    pub order_id: String,
}

#[async_trait]
impl UnitOfWork for LoadPaymentContext {
    type Output = PaymentContext;

    fn name(&self) -> &'static str {
        "load_payment_context"
    }

    async fn run(&self, tx: &mut dyn Transaction) -> CoreResult<PaymentContext> {
        let booking = tx
            .lock_booking_by_order_id(&self.order_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("booking {}", self.order_id)))?;
        let session = tx
            .lock_session(booking.claim_session_id)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!("claim session of booking {}", booking.order_id))
            })?;
        let tickets = tx.booking_tickets(booking.id).await?;
        Ok(PaymentContext {
            booking,
            session,
            tickets,
        })
    }
}

/// Stores the gateway reference. The first reference wins; the stored one is
/// returned either way.
pub struct RecordPaymentReference {
    pub order_id: String,
    pub reference: String,
}

#[async_trait]
impl UnitOfWork for RecordPaymentReference {
    type Output = String;

    fn name(&self) -> &'static str {
        "record_payment_reference"
    }

    async fn run(&self, tx: &mut dyn Transaction) -> CoreResult<String> {
        let booking = tx
            .lock_booking_by_order_id(&self.order_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("booking {}", self.order_id)))?;
        if let Some(existing) = booking.reference_number {
            return Ok(existing);
        }
        tx.set_booking_reference(booking.id, &self.reference).await?;
        tracing::debug!(order_id = %self.order_id, reference = %self.reference, "payment reference stored");
        Ok(self.reference.clone())
    }
}
