use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use ferry_core::{
    BookingId, ClaimStatus, ClassId, Clock, CoreError, CoreResult, Customer, FareClass,
    NewBooking, PassengerDetails, ScheduleLookup, Ticket, TicketId, TicketType, TicketUpdate,
    Transaction, UnitOfWork,
};
use ferry_shared::Masked;

use crate::order_ref::generate_order_id;
use crate::session::transition;

/// Per-ticket data supplied by the customer. Passenger tickets need identity
/// fields, vehicle tickets a license plate.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TicketData {
    pub ticket_id: TicketId,
    pub passenger_name: Option<String>,
    pub passenger_age: Option<i32>,
    pub passenger_gender: Option<String>,
    pub address: Option<String>,
    pub id_type: Option<String>,
    pub id_number: Option<Masked<String>>,
    pub license_plate: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PassengerDataRequest {
    pub session_token: Uuid,
    pub customer: Customer,
    pub tickets: Vec<TicketData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalizeResult {
    pub booking_id: BookingId,
    pub order_id: String,
    pub updated_ticket_ids: Vec<TicketId>,
    pub expires_at: DateTime<Utc>,
}

pub struct SubmitPassengerData {
    pub request: PassengerDataRequest,
    pub lookup: Arc<dyn ScheduleLookup>,
    pub payment_window: Duration,
    pub clock: Arc<dyn Clock>,
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Matches incoming entries to the session's tickets, one entry per ticket.
fn key_entries<'a>(
    tickets: &[Ticket],
    entries: &'a [TicketData],
) -> CoreResult<HashMap<TicketId, &'a TicketData>> {
    let mut keyed = HashMap::with_capacity(entries.len());
    for entry in entries {
        if keyed.insert(entry.ticket_id, entry).is_some() {
            return Err(CoreError::InvalidRequest(format!(
                "duplicate data for ticket {}",
                entry.ticket_id
            )));
        }
    }

    for id in keyed.keys() {
        if !tickets.iter().any(|t| t.id == *id) {
            return Err(CoreError::InvalidRequest(format!(
                "ticket {id} does not belong to this claim session"
            )));
        }
    }

    if let Some(missing) = tickets.iter().find(|t| !keyed.contains_key(&t.id)) {
        return Err(CoreError::MissingData(format!(
            "no data supplied for ticket {}",
            missing.id
        )));
    }
    Ok(keyed)
}

/// Resolves the stored fields for one ticket. Seats are assigned later.
fn resolve_ticket(ticket: &Ticket, data: &TicketData, booking_id: BookingId) -> CoreResult<TicketUpdate> {
    match ticket.ticket_type {
        TicketType::Passenger => {
            let missing = |field: &str| {
                CoreError::InvalidRequest(format!("{field} is required for passenger ticket {}", ticket.id))
            };
            let name = non_blank(data.passenger_name.as_deref()).ok_or_else(|| missing("passenger name"))?;
            let id_type = non_blank(data.id_type.as_deref()).ok_or_else(|| missing("id type"))?;
            let id_number = non_blank(data.id_number.as_ref().map(|n| n.expose()))
                .ok_or_else(|| missing("id number"))?;

            Ok(TicketUpdate {
                ticket_id: ticket.id,
                booking_id,
                passenger: Some(PassengerDetails {
                    name,
                    age: data.passenger_age,
                    gender: non_blank(data.passenger_gender.as_deref()),
                    address: non_blank(data.address.as_deref()),
                    id_type,
                    id_number: Masked(id_number),
                }),
                seat_number: None,
                license_plate: None,
            })
        }
        TicketType::Vehicle => {
            let plate = non_blank(data.license_plate.as_deref()).ok_or_else(|| {
                CoreError::InvalidRequest(format!("license plate is required for vehicle ticket {}", ticket.id))
            })?;
            Ok(TicketUpdate {
                ticket_id: ticket.id,
                booking_id,
                passenger: None,
                seat_number: None,
                license_plate: Some(plate),
            })
        }
    }
}

#[async_trait]
impl UnitOfWork for SubmitPassengerData {
    type Output = FinalizeResult;

    fn name(&self) -> &'static str {
        "submit_passenger_data"
    }

    async fn run(&self, tx: &mut dyn Transaction) -> CoreResult<FinalizeResult> {
        let now = self.clock.now();
        let token = self.request.session_token;
        self.request.customer.validate()?;

        let mut session = tx
            .lock_session_by_token(token)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("claim session {token}")))?;
        if session.is_overdue(now) {
            return Err(CoreError::Expired(format!(
                "claim session {token} expired at {}",
                session.expires_at
            )));
        }
        if session.status != ClaimStatus::PendingData {
            return Err(CoreError::InvalidState(format!(
                "claim session {token} is {}, expected {}",
                session.status,
                ClaimStatus::PendingData
            )));
        }

        let tickets = tx.session_tickets(session.id).await?;
        let entries = key_entries(&tickets, &self.request.tickets)?;

        let schedule = self.lookup.find_by_id(session.schedule_id).await?;
        let mut classes: BTreeMap<ClassId, FareClass> = BTreeMap::new();
        for ticket in &tickets {
            if !classes.contains_key(&ticket.class_id) {
                let class = self.lookup.find_class(ticket.class_id).await?;
                classes.insert(ticket.class_id, class);
            }
        }

        // Field validation is complete before the first write. The booking id
        // is patched in once the booking row exists.
        let mut updates = tickets
            .iter()
            .map(|t| match entries.get(&t.id) {
                Some(data) => resolve_ticket(t, data, 0),
                None => Err(CoreError::MissingData(format!("no data supplied for ticket {}", t.id))),
            })
            .collect::<CoreResult<Vec<_>>>()?;

        let order_id = generate_order_id(&schedule, now);
        let booking = tx
            .insert_booking(NewBooking {
                order_id: order_id.clone(),
                schedule_id: session.schedule_id,
                claim_session_id: session.id,
                customer: self.request.customer.clone(),
                created_at: now,
            })
            .await?;
        for update in &mut updates {
            update.booking_id = booking.id;
        }

        // Seats are numbered under the class ledger lock so two finalizations
        // of the same class cannot read the same count.
        let mut passengers_by_class: BTreeMap<ClassId, Vec<usize>> = BTreeMap::new();
        for (idx, ticket) in tickets.iter().enumerate() {
            if ticket.ticket_type == TicketType::Passenger {
                passengers_by_class.entry(ticket.class_id).or_default().push(idx);
            }
        }
        for (class_id, indices) in &passengers_by_class {
            tx.lock_ledger(session.schedule_id, *class_id).await?;
            let seated = tx.count_seated_tickets(session.schedule_id, *class_id).await?;
            let alias = classes
                .get(class_id)
                .map(|c| c.alias.as_str())
                .unwrap_or_default();
            for (offset, idx) in indices.iter().enumerate() {
                updates[*idx].seat_number = Some(format!("{alias}{}", seated + 1 + offset as i64));
            }
        }

        tx.update_tickets(&updates).await?;

        let extended = session.expires_at + self.payment_window;
        transition(tx, &mut session, ClaimStatus::PendingPayment, now, Some(extended)).await?;

        info!(
            order_id = %booking.order_id,
            session = %token,
            tickets = updates.len(),
            "passenger data recorded, awaiting payment"
        );

        Ok(FinalizeResult {
            booking_id: booking.id,
            order_id: booking.order_id,
            updated_ticket_ids: updates.iter().map(|u| u.ticket_id).collect(),
            expires_at: session.expires_at,
        })
    }
}
