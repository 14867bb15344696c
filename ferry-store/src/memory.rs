//! Process-local storage honouring the same transaction contract as Postgres.
//!
//! Transactions are fully serialised: `begin` takes an owned lock on the whole
//! state and works on a copy that is published only on commit. That is
//! stronger than row locking, so anything correct here under concurrency is
//! correct for the lock discipline the Postgres store relies on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use ferry_core::schedule::{FareClass, Schedule, ScheduleLookup};
use ferry_core::{
    Booking, BookingId, CapacityLedger, ClaimSession, ClaimStatus, ClassId, CoreError,
    CoreResult, Database, NewBooking, NewClaimSession, NewTicket, ScheduleId, SessionId, Ticket,
    TicketUpdate, Transaction,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    ledgers: BTreeMap<(ScheduleId, ClassId), CapacityLedger>,
    sessions: BTreeMap<SessionId, ClaimSession>,
    tickets: BTreeMap<i64, Ticket>,
    bookings: BTreeMap<BookingId, Booking>,
    last_session_id: i64,
    last_ticket_id: i64,
    last_booking_id: i64,
}

impl MemoryState {
    fn live_tickets(&self, schedule_id: ScheduleId, class_id: ClassId, now: DateTime<Utc>) -> i64 {
        self.tickets
            .values()
            .filter(|t| t.schedule_id == schedule_id && t.class_id == class_id)
            .filter(|t| match t.claim_session_id.and_then(|id| self.sessions.get(&id)) {
                Some(session) => session.holds_capacity(now),
                None => true,
            })
            .count() as i64
    }
}

#[derive(Clone, Default)]
pub struct InMemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
    failing_begins: Arc<AtomicUsize>,
    failing_commits: Arc<AtomicUsize>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_ledger(&self, ledger: CapacityLedger) {
        let mut state = self.state.lock().await;
        state
            .ledgers
            .insert((ledger.schedule_id, ledger.class_id), ledger);
    }

    /// Makes the next `n` calls to `begin` fail with a transient error.
    pub fn fail_next_begins(&self, n: usize) {
        self.failing_begins.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` commits fail after the unit of work succeeded.
    pub fn fail_next_commits(&self, n: usize) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    pub async fn ledger(&self, schedule_id: ScheduleId, class_id: ClassId) -> Option<CapacityLedger> {
        self.state.lock().await.ledgers.get(&(schedule_id, class_id)).cloned()
    }

    pub async fn live_tickets(
        &self,
        schedule_id: ScheduleId,
        class_id: ClassId,
        now: DateTime<Utc>,
    ) -> i64 {
        self.state.lock().await.live_tickets(schedule_id, class_id, now)
    }

    pub async fn session_by_token(&self, token: Uuid) -> Option<ClaimSession> {
        let state = self.state.lock().await;
        state.sessions.values().find(|s| s.token == token).cloned()
    }

    pub async fn tickets_of_session(&self, session_id: SessionId) -> Vec<Ticket> {
        let state = self.state.lock().await;
        state
            .tickets
            .values()
            .filter(|t| t.claim_session_id == Some(session_id))
            .cloned()
            .collect()
    }

    pub async fn booking_by_order_id(&self, order_id: &str) -> Option<Booking> {
        let state = self.state.lock().await;
        state.bookings.values().find(|b| b.order_id == order_id).cloned()
    }

    pub async fn ticket_count(&self) -> usize {
        self.state.lock().await.tickets.len()
    }

    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    async fn begin(&self) -> CoreResult<Box<dyn Transaction>> {
        if Self::take_failure(&self.failing_begins) {
            return Err(CoreError::Transient("injected connection reset".into()));
        }
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            failing_commits: self.failing_commits.clone(),
        }))
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    failing_commits: Arc<AtomicUsize>,
}

impl MemoryTransaction {
    fn session_mut(&mut self, id: SessionId) -> CoreResult<&mut ClaimSession> {
        self.working
            .sessions
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("claim session {id}")))
    }

    fn tickets_where(&self, pred: impl Fn(&Ticket) -> bool) -> Vec<Ticket> {
        self.working.tickets.values().filter(|t| pred(t)).cloned().collect()
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn lock_ledger(
        &mut self,
        schedule_id: ScheduleId,
        class_id: ClassId,
    ) -> CoreResult<CapacityLedger> {
        self.working
            .ledgers
            .get(&(schedule_id, class_id))
            .cloned()
            .ok_or_else(|| {
                CoreError::NotFound(format!(
                    "capacity ledger for schedule {schedule_id} class {class_id}"
                ))
            })
    }

    async fn read_ledger(
        &mut self,
        schedule_id: ScheduleId,
        class_id: ClassId,
    ) -> CoreResult<Option<CapacityLedger>> {
        Ok(self.working.ledgers.get(&(schedule_id, class_id)).cloned())
    }

    async fn count_live_tickets(
        &mut self,
        schedule_id: ScheduleId,
        class_id: ClassId,
        now: DateTime<Utc>,
    ) -> CoreResult<i64> {
        Ok(self.working.live_tickets(schedule_id, class_id, now))
    }

    async fn count_seated_tickets(
        &mut self,
        schedule_id: ScheduleId,
        class_id: ClassId,
    ) -> CoreResult<i64> {
        Ok(self
            .working
            .tickets
            .values()
            .filter(|t| t.schedule_id == schedule_id && t.class_id == class_id)
            .filter(|t| t.seat_number.is_some())
            .count() as i64)
    }

    async fn restore_quota(
        &mut self,
        schedule_id: ScheduleId,
        class_id: ClassId,
        amount: i64,
    ) -> CoreResult<()> {
        let ledger = self
            .working
            .ledgers
            .get_mut(&(schedule_id, class_id))
            .ok_or_else(|| {
                CoreError::NotFound(format!(
                    "capacity ledger for schedule {schedule_id} class {class_id}"
                ))
            })?;
        ledger.total_quota += amount;
        Ok(())
    }

    async fn insert_session(&mut self, session: NewClaimSession) -> CoreResult<ClaimSession> {
        self.working.last_session_id += 1;
        let created = ClaimSession {
            id: self.working.last_session_id,
            token: session.token,
            schedule_id: session.schedule_id,
            status: ClaimStatus::PendingData,
            expires_at: session.expires_at,
            created_at: session.created_at,
        };
        self.working.sessions.insert(created.id, created.clone());
        Ok(created)
    }

    async fn lock_session(&mut self, id: SessionId) -> CoreResult<Option<ClaimSession>> {
        Ok(self.working.sessions.get(&id).cloned())
    }

    async fn lock_session_by_token(&mut self, token: Uuid) -> CoreResult<Option<ClaimSession>> {
        self.find_session_by_token(token).await
    }

    async fn find_session_by_token(&mut self, token: Uuid) -> CoreResult<Option<ClaimSession>> {
        Ok(self
            .working
            .sessions
            .values()
            .find(|s| s.token == token)
            .cloned())
    }

    async fn update_session(
        &mut self,
        id: SessionId,
        status: ClaimStatus,
        expires_at: DateTime<Utc>,
    ) -> CoreResult<()> {
        let session = self.session_mut(id)?;
        session.status = status;
        session.expires_at = expires_at;
        Ok(())
    }

    async fn overdue_sessions(
        &mut self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<SessionId>> {
        let mut overdue: Vec<&ClaimSession> = self
            .working
            .sessions
            .values()
            .filter(|s| !s.status.is_terminal() && s.is_overdue(now))
            .collect();
        overdue.sort_by_key(|s| (s.expires_at, s.id));
        Ok(overdue
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|s| s.id)
            .collect())
    }

    async fn insert_tickets(
        &mut self,
        session_id: SessionId,
        tickets: &[NewTicket],
    ) -> CoreResult<Vec<Ticket>> {
        if !self.working.sessions.contains_key(&session_id) {
            return Err(CoreError::NotFound(format!("claim session {session_id}")));
        }
        let mut created = Vec::with_capacity(tickets.len());
        for draft in tickets {
            self.working.last_ticket_id += 1;
            let ticket = Ticket::new(self.working.last_ticket_id, session_id, draft);
            self.working.tickets.insert(ticket.id, ticket.clone());
            created.push(ticket);
        }
        Ok(created)
    }

    async fn session_tickets(&mut self, session_id: SessionId) -> CoreResult<Vec<Ticket>> {
        Ok(self.tickets_where(|t| t.claim_session_id == Some(session_id)))
    }

    async fn booking_tickets(&mut self, booking_id: BookingId) -> CoreResult<Vec<Ticket>> {
        Ok(self.tickets_where(|t| t.booking_id == Some(booking_id)))
    }

    async fn update_tickets(&mut self, updates: &[TicketUpdate]) -> CoreResult<()> {
        for update in updates {
            let ticket = self
                .working
                .tickets
                .get_mut(&update.ticket_id)
                .ok_or_else(|| CoreError::NotFound(format!("ticket {}", update.ticket_id)))?;
            ticket.apply(update);
        }
        Ok(())
    }

    async fn insert_booking(&mut self, booking: NewBooking) -> CoreResult<Booking> {
        let duplicate = self.working.bookings.values().any(|b| {
            b.order_id == booking.order_id || b.claim_session_id == booking.claim_session_id
        });
        if duplicate {
            return Err(CoreError::Transient(format!(
                "unique violation inserting booking {}",
                booking.order_id
            )));
        }
        self.working.last_booking_id += 1;
        let created = Booking {
            id: self.working.last_booking_id,
            order_id: booking.order_id,
            schedule_id: booking.schedule_id,
            claim_session_id: booking.claim_session_id,
            customer: booking.customer,
            reference_number: None,
            failure_notified_at: None,
            created_at: booking.created_at,
        };
        self.working.bookings.insert(created.id, created.clone());
        Ok(created)
    }

    async fn lock_booking_by_order_id(&mut self, order_id: &str) -> CoreResult<Option<Booking>> {
        Ok(self
            .working
            .bookings
            .values()
            .find(|b| b.order_id == order_id)
            .cloned())
    }

    async fn set_booking_reference(
        &mut self,
        booking_id: BookingId,
        reference: &str,
    ) -> CoreResult<()> {
        let booking = self
            .working
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| CoreError::NotFound(format!("booking {booking_id}")))?;
        booking.reference_number = Some(reference.to_string());
        Ok(())
    }

    async fn mark_failure_notified(
        &mut self,
        booking_id: BookingId,
        at: DateTime<Utc>,
    ) -> CoreResult<()> {
        let booking = self
            .working
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| CoreError::NotFound(format!("booking {booking_id}")))?;
        booking.failure_notified_at = Some(at);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> CoreResult<()> {
        if InMemoryDatabase::take_failure(&self.failing_commits) {
            return Err(CoreError::Fatal("injected commit failure".into()));
        }
        let MemoryTransaction {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> CoreResult<()> {
        Ok(())
    }
}

/// Schedule and fare-class metadata held in memory.
#[derive(Default)]
pub struct InMemoryScheduleLookup {
    schedules: RwLock<HashMap<ScheduleId, Schedule>>,
    classes: RwLock<HashMap<ClassId, FareClass>>,
}

impl InMemoryScheduleLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_schedule(&self, schedule: Schedule) {
        let mut schedules = self.schedules.write().unwrap_or_else(|p| p.into_inner());
        schedules.insert(schedule.id, schedule);
    }

    pub fn insert_class(&self, class: FareClass) {
        let mut classes = self.classes.write().unwrap_or_else(|p| p.into_inner());
        classes.insert(class.id, class);
    }
}

#[async_trait]
impl ScheduleLookup for InMemoryScheduleLookup {
    async fn find_by_id(&self, schedule_id: ScheduleId) -> CoreResult<Schedule> {
        let schedules = self.schedules.read().unwrap_or_else(|p| p.into_inner());
        schedules
            .get(&schedule_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("schedule {schedule_id}")))
    }

    async fn find_class(&self, class_id: ClassId) -> CoreResult<FareClass> {
        let classes = self.classes.read().unwrap_or_else(|p| p.into_inner());
        classes
            .get(&class_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("fare class {class_id}")))
    }
}
