use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    Booking, BookingId, CapacityLedger, ClaimSession, ClaimStatus, ClassId, CoreResult,
    NewBooking, NewClaimSession, NewTicket, ScheduleId, SessionId, Ticket, TicketUpdate,
};

/// One open storage transaction.
///
/// Dropping a transaction without calling [`Transaction::commit`] rolls it
/// back, so an early `?` return or a panic inside a unit of work never leaves
/// partial state behind.
#[async_trait]
pub trait Transaction: Send {
    /// Exclusive row lock on the ledger for the rest of the transaction.
    /// `NotFound` if the pair has no ledger row.
    async fn lock_ledger(
        &mut self,
        schedule_id: ScheduleId,
        class_id: ClassId,
    ) -> CoreResult<CapacityLedger>;

    /// Plain read of the ledger row, no lock.
    async fn read_ledger(
        &mut self,
        schedule_id: ScheduleId,
        class_id: ClassId,
    ) -> CoreResult<Option<CapacityLedger>>;

    /// Tickets of the pair whose session still holds capacity at `now`
    /// (see [`ClaimSession::holds_capacity`]).
    async fn count_live_tickets(
        &mut self,
        schedule_id: ScheduleId,
        class_id: ClassId,
        now: DateTime<Utc>,
    ) -> CoreResult<i64>;

    /// Tickets of the pair that were ever given a seat number.
    async fn count_seated_tickets(
        &mut self,
        schedule_id: ScheduleId,
        class_id: ClassId,
    ) -> CoreResult<i64>;

    async fn restore_quota(
        &mut self,
        schedule_id: ScheduleId,
        class_id: ClassId,
        amount: i64,
    ) -> CoreResult<()>;

    async fn insert_session(&mut self, session: NewClaimSession) -> CoreResult<ClaimSession>;

    async fn lock_session(&mut self, id: SessionId) -> CoreResult<Option<ClaimSession>>;

    async fn lock_session_by_token(&mut self, token: Uuid) -> CoreResult<Option<ClaimSession>>;

    async fn find_session_by_token(&mut self, token: Uuid) -> CoreResult<Option<ClaimSession>>;

    async fn update_session(
        &mut self,
        id: SessionId,
        status: ClaimStatus,
        expires_at: DateTime<Utc>,
    ) -> CoreResult<()>;

    /// Ids of non-terminal sessions whose TTL passed before `now`, oldest first.
    async fn overdue_sessions(
        &mut self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<SessionId>>;

    /// Inserts all tickets in one statement, in order, owned by `session_id`.
    async fn insert_tickets(
        &mut self,
        session_id: SessionId,
        tickets: &[NewTicket],
    ) -> CoreResult<Vec<Ticket>>;

    async fn session_tickets(&mut self, session_id: SessionId) -> CoreResult<Vec<Ticket>>;

    async fn booking_tickets(&mut self, booking_id: BookingId) -> CoreResult<Vec<Ticket>>;

    async fn update_tickets(&mut self, updates: &[TicketUpdate]) -> CoreResult<()>;

    async fn insert_booking(&mut self, booking: NewBooking) -> CoreResult<Booking>;

    async fn lock_booking_by_order_id(&mut self, order_id: &str) -> CoreResult<Option<Booking>>;

    async fn set_booking_reference(
        &mut self,
        booking_id: BookingId,
        reference: &str,
    ) -> CoreResult<()>;

    async fn mark_failure_notified(
        &mut self,
        booking_id: BookingId,
        at: DateTime<Utc>,
    ) -> CoreResult<()>;

    async fn commit(self: Box<Self>) -> CoreResult<()>;

    async fn rollback(self: Box<Self>) -> CoreResult<()>;
}

/// Storage backend able to open transactions.
#[async_trait]
pub trait Database: Send + Sync {
    async fn begin(&self) -> CoreResult<Box<dyn Transaction>>;
}

/// A piece of business logic that runs inside exactly one transaction.
///
/// Implementations must be safe to run again from scratch: the executor
/// replays the whole unit after a transient failure.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    type Output: Send;

    fn name(&self) -> &'static str;

    async fn run(&self, tx: &mut dyn Transaction) -> CoreResult<Self::Output>;
}
