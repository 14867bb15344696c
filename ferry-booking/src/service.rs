use chrono::Duration;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use ferry_core::{
    Availability, ClassId, Clock, CoreError, CoreResult, GatewayTransaction, Notifier,
    PaymentGateway, PaymentStatus, ScheduleId, ScheduleLookup,
};
use ferry_store::app_config::ReservationConfig;
use ferry_store::{StatsSnapshot, TxExecutor};

use crate::allocator::{AllocateTickets, AllocationRequest, AllocationResult};
use crate::finalizer::{FinalizeResult, PassengerDataRequest, SubmitPassengerData};
use crate::ledger::ReadAvailability;
use crate::notifications;
use crate::payment::{LoadPaymentContext, PaymentInitiation, RecordPaymentReference};
use crate::reconciler::{HandlePaymentCallback, PaymentCallback, ReconcileOutcome, Reconciliation};
use crate::session::{self, LoadSnapshot, SessionSnapshot, SweepReport};

#[derive(Debug, Clone)]
pub struct BookingSettings {
    pub hold_window: Duration,
    pub payment_window: Duration,
    pub sweep_batch_size: i64,
}

impl From<&ReservationConfig> for BookingSettings {
    fn from(config: &ReservationConfig) -> Self {
        Self {
            hold_window: config.hold_window(),
            payment_window: config.payment_window(),
            sweep_batch_size: config.sweep_batch_size,
        }
    }
}

impl Default for BookingSettings {
    fn default() -> Self {
        Self::from(&ReservationConfig::default())
    }
}

/// Entry point for every booking operation.
#[derive(Clone)]
pub struct BookingService {
    executor: TxExecutor,
    lookup: Arc<dyn ScheduleLookup>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    settings: BookingSettings,
}

impl BookingService {
    pub fn new(
        executor: TxExecutor,
        lookup: Arc<dyn ScheduleLookup>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        settings: BookingSettings,
    ) -> Self {
        Self {
            executor,
            lookup,
            gateway,
            notifier,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &BookingSettings {
        &self.settings
    }

    pub fn executor_stats(&self) -> StatsSnapshot {
        self.executor.stats()
    }

    /// Claims `Σ quantity` tickets under one new claim session, or nothing.
    pub async fn allocate_tickets(&self, request: AllocationRequest) -> CoreResult<AllocationResult> {
        let quantities = request.quantities_by_class()?;
        self.lookup.find_by_id(request.schedule_id).await?;

        let mut classes = Vec::with_capacity(quantities.len());
        for (class_id, quantity) in quantities {
            classes.push((self.lookup.find_class(class_id).await?, quantity));
        }

        let unit = AllocateTickets {
            schedule_id: request.schedule_id,
            classes,
            hold_window: self.settings.hold_window,
            clock: self.clock.clone(),
        };
        self.executor.execute_with_retry(&unit).await.inspect_err(|err| {
            if let CoreError::Conflict { .. } = err {
                info!(schedule_id = request.schedule_id, error = %err, "allocation refused");
            }
        })
    }

    /// Records passenger and customer data and moves the session to payment.
    pub async fn submit_passenger_data(&self, request: PassengerDataRequest) -> CoreResult<FinalizeResult> {
        let unit = SubmitPassengerData {
            request,
            lookup: self.lookup.clone(),
            payment_window: self.settings.payment_window,
            clock: self.clock.clone(),
        };
        self.executor.execute_with_retry(&unit).await
    }

    /// Opens a gateway payment for the booking. Calling it again returns the
    /// payment already on file.
    pub async fn initiate_payment(&self, order_id: &str) -> CoreResult<PaymentInitiation> {
        let context = self
            .executor
            .execute_with_retry(&LoadPaymentContext {
                order_id: order_id.to_string(),
            })
            .await?;

        if let Some(reference) = &context.booking.reference_number {
            let detail = self.gateway.get_transaction_detail(reference).await?;
            return Ok(initiation(order_id, context.total(), detail));
        }

        context.ensure_payable(self.clock.now())?;
        let created = self.gateway.create_payment(&context.payment_request()).await?;

        let stored = self
            .executor
            .execute_with_retry(&RecordPaymentReference {
                order_id: order_id.to_string(),
                reference: created.reference.clone(),
            })
            .await?;

        info!(order_id, reference = %stored, amount = context.total(), "payment initiated");
        if stored == created.reference {
            Ok(initiation(order_id, context.total(), created))
        } else {
            // A concurrent initiation stored its reference first.
            warn!(order_id, orphaned = %created.reference, "payment initiation raced, using stored reference");
            let detail = self.gateway.get_transaction_detail(&stored).await?;
            Ok(initiation(order_id, context.total(), detail))
        }
    }

    /// Applies a gateway status callback. Notifications go out after commit.
    pub async fn handle_payment_callback(&self, callback: PaymentCallback) -> CoreResult<ReconcileOutcome> {
        let status: PaymentStatus = callback.status.parse()?;
        let unit = HandlePaymentCallback {
            order_id: callback.merchant_ref,
            status,
            clock: self.clock.clone(),
        };
        let reconciliation = self.executor.execute_with_retry(&unit).await?;
        self.notify(&reconciliation).await;
        Ok(reconciliation.outcome)
    }

    async fn notify(&self, reconciliation: &Reconciliation) {
        let booking = &reconciliation.booking;
        let email = match reconciliation.outcome {
            ReconcileOutcome::AlreadyResolved => return,
            ReconcileOutcome::Confirmed => {
                notifications::booking_confirmed(booking, &reconciliation.tickets)
            }
            ReconcileOutcome::Released { .. } | ReconcileOutcome::ExpiredWithoutRestore => {
                notifications::payment_failed(booking, reconciliation.status)
            }
        };

        if let Err(err) = self.notifier.send(&email.to, &email.subject, &email.html).await {
            error!(order_id = %booking.order_id, error = %err, "failed to send booking notification");
        }
    }

    /// Current gateway view of the booking's payment.
    pub async fn payment_status(&self, order_id: &str) -> CoreResult<GatewayTransaction> {
        let context = self
            .executor
            .execute_with_retry(&LoadPaymentContext {
                order_id: order_id.to_string(),
            })
            .await?;
        let reference = context.booking.reference_number.ok_or_else(|| {
            CoreError::InvalidState(format!("no payment initiated for booking {order_id}"))
        })?;
        self.gateway.get_transaction_detail(&reference).await
    }

    pub async fn availability(&self, schedule_id: ScheduleId, class_id: ClassId) -> CoreResult<Availability> {
        self.executor
            .execute_with_retry(&ReadAvailability {
                schedule_id,
                class_id,
                clock: self.clock.clone(),
            })
            .await
    }

    pub async fn session_snapshot(&self, token: Uuid) -> CoreResult<SessionSnapshot> {
        self.executor.execute_with_retry(&LoadSnapshot { token }).await
    }

    pub async fn expire_overdue(&self) -> CoreResult<SweepReport> {
        session::expire_overdue(&self.executor, self.clock.clone(), self.settings.sweep_batch_size).await
    }
}

fn initiation(order_id: &str, amount: i64, tx: GatewayTransaction) -> PaymentInitiation {
    PaymentInitiation {
        order_id: order_id.to_string(),
        reference_number: tx.reference,
        amount,
        checkout_url: tx.checkout_url,
        expires_at: tx.expires_at,
    }
}
