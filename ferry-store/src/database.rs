use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use ferry_core::{
    Booking, BookingId, CapacityLedger, ClaimSession, ClaimStatus, ClassId, CoreError,
    CoreResult, Customer, Database, NewBooking, NewClaimSession, NewTicket, PassengerDetails,
    ScheduleId, SessionId, Ticket, TicketUpdate, Transaction,
};
use ferry_shared::Masked;

use crate::app_config::{DatabaseConfig, ExecutorConfig, IsolationLevel};

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
    isolation: IsolationLevel,
    lock_timeout_ms: u64,
}

impl DbClient {
    pub async fn new(database: &DatabaseConfig, executor: &ExecutorConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(database.max_connections)
            .acquire_timeout(Duration::from_secs(database.acquire_timeout_secs))
            .connect(&database.url)
            .await?;

        Ok(Self {
            pool,
            isolation: executor.isolation,
            lock_timeout_ms: executor.lock_timeout_ms,
        })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }
}

#[async_trait]
impl Database for DbClient {
    async fn begin(&self) -> CoreResult<Box<dyn Transaction>> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        // Must be the first statement of the transaction.
        let isolation = format!("SET TRANSACTION ISOLATION LEVEL {}", self.isolation.as_sql());
        sqlx::query(&isolation)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout_ms))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        Ok(Box::new(PgTransaction { tx }))
    }
}

/// Maps driver failures onto the error taxonomy. Serialization failures,
/// deadlocks, lock and statement timeouts, unique races and lost connections
/// are transient; everything else is fatal.
pub fn db_error(err: sqlx::Error) -> CoreError {
    match &err {
        sqlx::Error::RowNotFound => CoreError::NotFound(err.to_string()),
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("40001") | Some("40P01") | Some("55P03") | Some("57014") | Some("23505") => {
                debug!(code = ?db.code(), error = %db, "transient database error");
                CoreError::Transient(db.to_string())
            }
            _ => CoreError::Fatal(db.to_string()),
        },
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::Tls(_) => {
            CoreError::Transient(err.to_string())
        }
        _ => CoreError::Fatal(err.to_string()),
    }
}

const LEDGER_COLUMNS: &str = "schedule_id, class_id, total_quota, price";
const SESSION_COLUMNS: &str = "id, session_token, schedule_id, status, expires_at, created_at";
const TICKET_COLUMNS: &str = "id, schedule_id, class_id, claim_session_id, booking_id, type, price, \
     passenger_name, passenger_age, passenger_gender, address, id_type, id_number, \
     seat_number, license_plate, is_checked_in";
const BOOKING_COLUMNS: &str = "id, order_id, schedule_id, claim_session_id, customer_name, id_type, \
     id_number, phone_number, email, reference_number, failure_notified_at, created_at";

#[derive(sqlx::FromRow)]
struct LedgerRow {
    schedule_id: i64,
    class_id: i64,
    total_quota: i64,
    price: i64,
}

impl From<LedgerRow> for CapacityLedger {
    fn from(row: LedgerRow) -> Self {
        CapacityLedger {
            schedule_id: row.schedule_id,
            class_id: row.class_id,
            total_quota: row.total_quota,
            unit_price: row.price,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: i64,
    session_token: Uuid,
    schedule_id: i64,
    status: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for ClaimSession {
    type Error = CoreError;

    fn try_from(row: SessionRow) -> CoreResult<Self> {
        Ok(ClaimSession {
            id: row.id,
            token: row.session_token,
            schedule_id: row.schedule_id,
            status: row.status.parse()?,
            expires_at: row.expires_at,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: i64,
    schedule_id: i64,
    class_id: i64,
    claim_session_id: Option<i64>,
    booking_id: Option<i64>,
    #[sqlx(rename = "type")]
    ticket_type: String,
    price: i64,
    passenger_name: Option<String>,
    passenger_age: Option<i32>,
    passenger_gender: Option<String>,
    address: Option<String>,
    id_type: Option<String>,
    id_number: Option<String>,
    seat_number: Option<String>,
    license_plate: Option<String>,
    is_checked_in: bool,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = CoreError;

    fn try_from(row: TicketRow) -> CoreResult<Self> {
        let passenger = row.passenger_name.map(|name| PassengerDetails {
            name,
            age: row.passenger_age,
            gender: row.passenger_gender,
            address: row.address,
            id_type: row.id_type.unwrap_or_default(),
            id_number: Masked(row.id_number.unwrap_or_default()),
        });

        Ok(Ticket {
            id: row.id,
            schedule_id: row.schedule_id,
            class_id: row.class_id,
            claim_session_id: row.claim_session_id,
            booking_id: row.booking_id,
            ticket_type: row.ticket_type.parse()?,
            price: row.price,
            passenger,
            seat_number: row.seat_number,
            license_plate: row.license_plate,
            is_checked_in: row.is_checked_in,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: i64,
    order_id: String,
    schedule_id: i64,
    claim_session_id: i64,
    customer_name: String,
    id_type: String,
    id_number: String,
    phone_number: String,
    email: String,
    reference_number: Option<String>,
    failure_notified_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<BookingRow> for Booking {
    fn from(row: BookingRow) -> Self {
        Booking {
            id: row.id,
            order_id: row.order_id,
            schedule_id: row.schedule_id,
            claim_session_id: row.claim_session_id,
            customer: Customer {
                name: row.customer_name,
                id_type: row.id_type,
                id_number: Masked(row.id_number),
                phone_number: Masked(row.phone_number),
                email: Masked(row.email),
            },
            reference_number: row.reference_number,
            failure_notified_at: row.failure_notified_at,
            created_at: row.created_at,
        }
    }
}

fn into_tickets(rows: Vec<TicketRow>) -> CoreResult<Vec<Ticket>> {
    let mut tickets = rows
        .into_iter()
        .map(Ticket::try_from)
        .collect::<CoreResult<Vec<_>>>()?;
    tickets.sort_by_key(|t| t.id);
    Ok(tickets)
}

fn passenger_column<T>(
    updates: &[TicketUpdate],
    field: impl Fn(&PassengerDetails) -> Option<T>,
) -> Vec<Option<T>> {
    updates
        .iter()
        .map(|u| u.passenger.as_ref().and_then(&field))
        .collect()
}

pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl PgTransaction {
    async fn session_query(&mut self, sql: &str, id: SessionId) -> CoreResult<Option<ClaimSession>> {
        sqlx::query_as::<_, SessionRow>(sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?
            .map(ClaimSession::try_from)
            .transpose()
    }

    async fn session_by_token(&mut self, token: Uuid, for_update: bool) -> CoreResult<Option<ClaimSession>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM claim_session WHERE session_token = $1{}",
            if for_update { " FOR UPDATE" } else { "" }
        );
        sqlx::query_as::<_, SessionRow>(&sql)
            .bind(token)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?
            .map(ClaimSession::try_from)
            .transpose()
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn lock_ledger(
        &mut self,
        schedule_id: ScheduleId,
        class_id: ClassId,
    ) -> CoreResult<CapacityLedger> {
        let sql = format!(
            "SELECT {LEDGER_COLUMNS} FROM capacity_ledger \
             WHERE schedule_id = $1 AND class_id = $2 FOR UPDATE"
        );
        let row = sqlx::query_as::<_, LedgerRow>(&sql)
            .bind(schedule_id)
            .bind(class_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;

        row.map(CapacityLedger::from).ok_or_else(|| {
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
        let sql = format!(
            "SELECT {LEDGER_COLUMNS} FROM capacity_ledger WHERE schedule_id = $1 AND class_id = $2"
        );
        let row = sqlx::query_as::<_, LedgerRow>(&sql)
            .bind(schedule_id)
            .bind(class_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(row.map(CapacityLedger::from))
    }

    async fn count_live_tickets(
        &mut self,
        schedule_id: ScheduleId,
        class_id: ClassId,
        now: DateTime<Utc>,
    ) -> CoreResult<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM ticket t
            LEFT JOIN claim_session s ON s.id = t.claim_session_id
            WHERE t.schedule_id = $1
              AND t.class_id = $2
              AND (
                s.id IS NULL
                OR s.status IN ('CONFIRMED', 'CANCELLED')
                OR (s.status IN ('PENDING_DATA', 'PENDING_PAYMENT') AND s.expires_at >= $3)
              )
            "#,
        )
        .bind(schedule_id)
        .bind(class_id)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn count_seated_tickets(
        &mut self,
        schedule_id: ScheduleId,
        class_id: ClassId,
    ) -> CoreResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM ticket \
             WHERE schedule_id = $1 AND class_id = $2 AND seat_number IS NOT NULL",
        )
        .bind(schedule_id)
        .bind(class_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn restore_quota(
        &mut self,
        schedule_id: ScheduleId,
        class_id: ClassId,
        amount: i64,
    ) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE capacity_ledger SET total_quota = total_quota + $3 \
             WHERE schedule_id = $1 AND class_id = $2",
        )
        .bind(schedule_id)
        .bind(class_id)
        .bind(amount)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!(
                "capacity ledger for schedule {schedule_id} class {class_id}"
            )));
        }
        Ok(())
    }

    async fn insert_session(&mut self, session: NewClaimSession) -> CoreResult<ClaimSession> {
        let sql = format!(
            "INSERT INTO claim_session (session_token, schedule_id, status, expires_at, created_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(session.token)
            .bind(session.schedule_id)
            .bind(ClaimStatus::PendingData.as_str())
            .bind(session.expires_at)
            .bind(session.created_at)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(db_error)?;
        ClaimSession::try_from(row)
    }

    async fn lock_session(&mut self, id: SessionId) -> CoreResult<Option<ClaimSession>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM claim_session WHERE id = $1 FOR UPDATE");
        self.session_query(&sql, id).await
    }

    async fn lock_session_by_token(&mut self, token: Uuid) -> CoreResult<Option<ClaimSession>> {
        self.session_by_token(token, true).await
    }

    async fn find_session_by_token(&mut self, token: Uuid) -> CoreResult<Option<ClaimSession>> {
        self.session_by_token(token, false).await
    }

    async fn update_session(
        &mut self,
        id: SessionId,
        status: ClaimStatus,
        expires_at: DateTime<Utc>,
    ) -> CoreResult<()> {
        let result = sqlx::query("UPDATE claim_session SET status = $2, expires_at = $3 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .bind(expires_at)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("claim session {id}")));
        }
        Ok(())
    }

    async fn overdue_sessions(
        &mut self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> CoreResult<Vec<SessionId>> {
        sqlx::query_scalar::<_, i64>(
            "SELECT id FROM claim_session \
             WHERE status IN ('PENDING_DATA', 'PENDING_PAYMENT') AND expires_at < $1 \
             ORDER BY expires_at, id LIMIT $2",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)
    }

    async fn insert_tickets(
        &mut self,
        session_id: SessionId,
        tickets: &[NewTicket],
    ) -> CoreResult<Vec<Ticket>> {
        let schedule_ids: Vec<i64> = tickets.iter().map(|t| t.schedule_id).collect();
        let class_ids: Vec<i64> = tickets.iter().map(|t| t.class_id).collect();
        let types: Vec<String> = tickets.iter().map(|t| t.ticket_type.to_string()).collect();
        let prices: Vec<i64> = tickets.iter().map(|t| t.price).collect();

        let sql = format!(
            "INSERT INTO ticket (schedule_id, class_id, claim_session_id, type, price) \
             SELECT u.schedule_id, u.class_id, $1, u.type, u.price \
             FROM UNNEST($2::bigint[], $3::bigint[], $4::text[], $5::bigint[]) \
               AS u(schedule_id, class_id, type, price) \
             RETURNING {TICKET_COLUMNS}"
        );
        let rows = sqlx::query_as::<_, TicketRow>(&sql)
            .bind(session_id)
            .bind(schedule_ids)
            .bind(class_ids)
            .bind(types)
            .bind(prices)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        into_tickets(rows)
    }

    async fn session_tickets(&mut self, session_id: SessionId) -> CoreResult<Vec<Ticket>> {
        let sql = format!("SELECT {TICKET_COLUMNS} FROM ticket WHERE claim_session_id = $1 ORDER BY id");
        let rows = sqlx::query_as::<_, TicketRow>(&sql)
            .bind(session_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        into_tickets(rows)
    }

    async fn booking_tickets(&mut self, booking_id: BookingId) -> CoreResult<Vec<Ticket>> {
        let sql = format!("SELECT {TICKET_COLUMNS} FROM ticket WHERE booking_id = $1 ORDER BY id");
        let rows = sqlx::query_as::<_, TicketRow>(&sql)
            .bind(booking_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        into_tickets(rows)
    }

    async fn update_tickets(&mut self, updates: &[TicketUpdate]) -> CoreResult<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let ids: Vec<i64> = updates.iter().map(|u| u.ticket_id).collect();
        let booking_ids: Vec<i64> = updates.iter().map(|u| u.booking_id).collect();
        let names = passenger_column(updates, |p| Some(p.name.clone()));
        let ages = passenger_column(updates, |p| p.age);
        let genders = passenger_column(updates, |p| p.gender.clone());
        let addresses = passenger_column(updates, |p| p.address.clone());
        let id_types = passenger_column(updates, |p| Some(p.id_type.clone()));
        let id_numbers = passenger_column(updates, |p| Some(p.id_number.expose().to_string()));
        let seats: Vec<Option<String>> = updates.iter().map(|u| u.seat_number.clone()).collect();
        let plates: Vec<Option<String>> = updates.iter().map(|u| u.license_plate.clone()).collect();

        let result = sqlx::query(
            r#"
            UPDATE ticket SET
                booking_id = u.booking_id,
                passenger_name = u.passenger_name,
                passenger_age = u.passenger_age,
                passenger_gender = u.passenger_gender,
                address = u.address,
                id_type = u.id_type,
                id_number = u.id_number,
                seat_number = u.seat_number,
                license_plate = u.license_plate
            FROM UNNEST(
                $1::bigint[], $2::bigint[], $3::text[], $4::int[], $5::text[],
                $6::text[], $7::text[], $8::text[], $9::text[], $10::text[]
            ) AS u(id, booking_id, passenger_name, passenger_age, passenger_gender,
                   address, id_type, id_number, seat_number, license_plate)
            WHERE ticket.id = u.id
            "#,
        )
        .bind(ids)
        .bind(booking_ids)
        .bind(names)
        .bind(ages)
        .bind(genders)
        .bind(addresses)
        .bind(id_types)
        .bind(id_numbers)
        .bind(seats)
        .bind(plates)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        if result.rows_affected() != updates.len() as u64 {
            return Err(CoreError::NotFound(format!(
                "updated {} of {} tickets",
                result.rows_affected(),
                updates.len()
            )));
        }
        Ok(())
    }

    async fn insert_booking(&mut self, booking: NewBooking) -> CoreResult<Booking> {
        let sql = format!(
            "INSERT INTO booking (order_id, schedule_id, claim_session_id, customer_name, id_type, \
             id_number, phone_number, email, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {BOOKING_COLUMNS}"
        );
        let customer = &booking.customer;
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(&booking.order_id)
            .bind(booking.schedule_id)
            .bind(booking.claim_session_id)
            .bind(&customer.name)
            .bind(&customer.id_type)
            .bind(customer.id_number.expose())
            .bind(customer.phone_number.expose())
            .bind(customer.email.expose())
            .bind(booking.created_at)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(Booking::from(row))
    }

    async fn lock_booking_by_order_id(&mut self, order_id: &str) -> CoreResult<Option<Booking>> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM booking WHERE order_id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(order_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(row.map(Booking::from))
    }

    async fn set_booking_reference(
        &mut self,
        booking_id: BookingId,
        reference: &str,
    ) -> CoreResult<()> {
        let result = sqlx::query("UPDATE booking SET reference_number = $2 WHERE id = $1")
            .bind(booking_id)
            .bind(reference)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("booking {booking_id}")));
        }
        Ok(())
    }

    async fn mark_failure_notified(
        &mut self,
        booking_id: BookingId,
        at: DateTime<Utc>,
    ) -> CoreResult<()> {
        let result = sqlx::query("UPDATE booking SET failure_notified_at = $2 WHERE id = $1")
            .bind(booking_id)
            .bind(at)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("booking {booking_id}")));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> CoreResult<()> {
        self.tx.commit().await.map_err(db_error)
    }

    async fn rollback(self: Box<Self>) -> CoreResult<()> {
        self.tx.rollback().await.map_err(db_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::TicketType;

    #[test]
    fn row_not_found_maps_to_not_found() {
        assert!(matches!(db_error(sqlx::Error::RowNotFound), CoreError::NotFound(_)));
    }

    #[test]
    fn pool_exhaustion_is_transient() {
        assert!(db_error(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!db_error(sqlx::Error::PoolClosed).is_retryable());
    }

    #[test]
    fn storage_rows_convert_to_domain() {
        let row = TicketRow {
            id: 9,
            schedule_id: 1,
            class_id: 2,
            claim_session_id: Some(3),
            booking_id: Some(4),
            ticket_type: "passenger".into(),
            price: 150_000,
            passenger_name: Some("Budi".into()),
            passenger_age: Some(30),
            passenger_gender: None,
            address: None,
            id_type: Some("KTP".into()),
            id_number: Some("3174000011112222".into()),
            seat_number: Some("EK1".into()),
            license_plate: None,
            is_checked_in: false,
        };
        let ticket = Ticket::try_from(row).unwrap();
        assert_eq!(ticket.ticket_type, TicketType::Passenger);
        assert_eq!(ticket.passenger.unwrap().id_number.expose(), "3174000011112222");

        let session = SessionRow {
            id: 1,
            session_token: Uuid::new_v4(),
            schedule_id: 1,
            status: "HELD".into(),
            expires_at: Utc::now(),
            created_at: Utc::now(),
        };
        assert!(matches!(ClaimSession::try_from(session), Err(CoreError::Fatal(_))));
    }
}
