use ferry_shared::Masked;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{BookingId, ClassId, CoreError, ScheduleId, SessionId, TicketId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TicketType {
    Passenger,
    Vehicle,
}

impl TicketType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TicketType::Passenger => "passenger",
            TicketType::Vehicle => "vehicle",
        }
    }
}

impl fmt::Display for TicketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passenger" => Ok(TicketType::Passenger),
            "vehicle" => Ok(TicketType::Vehicle),
            other => Err(CoreError::Fatal(format!("unknown ticket type {other:?} in storage"))),
        }
    }
}

/// Identity and contact data of the person travelling on a passenger ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassengerDetails {
    pub name: String,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub id_type: String,
    pub id_number: Masked<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub schedule_id: ScheduleId,
    pub class_id: ClassId,
    pub claim_session_id: Option<SessionId>,
    pub booking_id: Option<BookingId>,
    pub ticket_type: TicketType,
    /// Frozen from the ledger at allocation time.
    pub price: i64,
    pub passenger: Option<PassengerDetails>,
    pub seat_number: Option<String>,
    pub license_plate: Option<String>,
    pub is_checked_in: bool,
}

/// Placeholder produced by the allocator before it has an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicket {
    pub schedule_id: ScheduleId,
    pub class_id: ClassId,
    pub ticket_type: TicketType,
    pub price: i64,
}

/// Data written onto a ticket by the booking finalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketUpdate {
    pub ticket_id: TicketId,
    pub booking_id: BookingId,
    pub passenger: Option<PassengerDetails>,
    pub seat_number: Option<String>,
    pub license_plate: Option<String>,
}

impl Ticket {
    pub fn new(id: TicketId, session_id: SessionId, draft: &NewTicket) -> Self {
        Self {
            id,
            schedule_id: draft.schedule_id,
            class_id: draft.class_id,
            claim_session_id: Some(session_id),
            booking_id: None,
            ticket_type: draft.ticket_type,
            price: draft.price,
            passenger: None,
            seat_number: None,
            license_plate: None,
            is_checked_in: false,
        }
    }

    pub fn apply(&mut self, update: &TicketUpdate) {
        self.booking_id = Some(update.booking_id);
        self.passenger = update.passenger.clone();
        self.seat_number = update.seat_number.clone();
        self.license_plate = update.license_plate.clone();
    }
}
