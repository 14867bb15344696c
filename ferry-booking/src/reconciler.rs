use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use ferry_core::{
    Booking, ClaimStatus, ClassId, Clock, CoreError, CoreResult, PaymentStatus, Ticket,
    Transaction, UnitOfWork,
};

use crate::ledger::RestoredClasses;
use crate::session::transition;

/// Payment status pushed by the gateway. `merchant_ref` is our order id.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentCallback {
    pub merchant_ref: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Confirmed,
    /// Session cancelled and capacity handed back, per class.
    Released { restored: BTreeMap<ClassId, i64> },
    /// Failure reported after the payment window closed, whether or not the
    /// sweep got there first. Expired tickets no longer count, so nothing is
    /// restored; only the failure e-mail goes out.
    ExpiredWithoutRestore,
    /// The session already reached a terminal state; nothing changed.
    AlreadyResolved,
}

/// What the reconciliation committed, plus what the caller needs to notify.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub outcome: ReconcileOutcome,
    pub status: PaymentStatus,
    pub booking: Booking,
    pub tickets: Vec<Ticket>,
}

pub struct HandlePaymentCallback {
    pub order_id: String,
    pub status: PaymentStatus,
    pub clock: Arc<dyn Clock>,
}

impl HandlePaymentCallback {
    async fn release(
        &self,
        tx: &mut dyn Transaction,
        booking: &Booking,
        tickets: &[Ticket],
    ) -> CoreResult<BTreeMap<ClassId, i64>> {
        let mut per_class: BTreeMap<ClassId, i64> = BTreeMap::new();
        for ticket in tickets {
            *per_class.entry(ticket.class_id).or_insert(0) += 1;
        }

        let mut done = RestoredClasses::default();
        let mut restored = BTreeMap::new();
        for (&class_id, &count) in &per_class {
            match done
                .restore_once(tx, booking.schedule_id, class_id, count)
                .await
            {
                Ok(true) => {
                    restored.insert(class_id, count);
                }
                Ok(false) => {}
                // A storage failure poisons the transaction; only business
                // failures (missing ledger row) are skipped.
                Err(err) if !err.is_business() => return Err(err),
                Err(err) => warn!(
                    order_id = %booking.order_id,
                    class_id,
                    error = %err,
                    "quota restoration failed, continuing"
                ),
            }
        }
        Ok(restored)
    }
}

#[async_trait]
impl UnitOfWork for HandlePaymentCallback {
    type Output = Reconciliation;

    fn name(&self) -> &'static str {
        "handle_payment_callback"
    }

    async fn run(&self, tx: &mut dyn Transaction) -> CoreResult<Reconciliation> {
        if self.status == PaymentStatus::Unpaid {
            return Err(CoreError::InvalidRequest(format!(
                "{} is not a final payment status",
                self.status
            )));
        }
        let now = self.clock.now();

        let booking = tx
            .lock_booking_by_order_id(&self.order_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("booking {}", self.order_id)))?;
        let tickets = tx.booking_tickets(booking.id).await?;
        if tickets.is_empty() {
            return Err(CoreError::NotFound(format!(
                "tickets of booking {}",
                booking.order_id
            )));
        }
        let mut session = tx
            .lock_session(booking.claim_session_id)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!("claim session of booking {}", booking.order_id))
            })?;

        let failure_pending = self.status.is_failure() && booking.failure_notified_at.is_none();
        let outcome = if session.status == ClaimStatus::Expired && failure_pending {
            // Swept before the gateway reported; the customer still hears about it.
            tx.mark_failure_notified(booking.id, now).await?;
            ReconcileOutcome::ExpiredWithoutRestore
        } else if session.status.is_terminal() {
            info!(
                order_id = %booking.order_id,
                status = %self.status,
                session_status = %session.status,
                "callback for resolved booking ignored"
            );
            ReconcileOutcome::AlreadyResolved
        } else if self.status == PaymentStatus::Paid {
            transition(tx, &mut session, ClaimStatus::Confirmed, now, None).await?;
            ReconcileOutcome::Confirmed
        } else if session.is_overdue(now) {
            transition(tx, &mut session, ClaimStatus::Expired, now, None).await?;
            tx.mark_failure_notified(booking.id, now).await?;
            ReconcileOutcome::ExpiredWithoutRestore
        } else {
            let restored = self.release(tx, &booking, &tickets).await?;
            transition(tx, &mut session, ClaimStatus::Cancelled, now, None).await?;
            tx.mark_failure_notified(booking.id, now).await?;
            ReconcileOutcome::Released { restored }
        };

        info!(order_id = %booking.order_id, status = %self.status, ?outcome, "payment reconciled");

        Ok(Reconciliation {
            outcome,
            status: self.status,
            booking,
            tickets,
        })
    }
}
