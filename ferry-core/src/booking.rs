use chrono::{DateTime, Utc};
use ferry_shared::Masked;
use serde::{Deserialize, Serialize};

use crate::{BookingId, CoreError, CoreResult, ScheduleId, SessionId};

/// The person paying for the booking and receiving notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub id_type: String,
    pub id_number: Masked<String>,
    pub phone_number: Masked<String>,
    pub email: Masked<String>,
}

impl Customer {
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidRequest("customer name is required".into()));
        }
        if self.id_type.trim().is_empty() || self.id_number.is_blank() {
            return Err(CoreError::InvalidRequest(
                "customer id type and id number are required".into(),
            ));
        }
        if self.phone_number.is_blank() {
            return Err(CoreError::InvalidRequest("customer phone number is required".into()));
        }
        if !self.email.expose().contains('@') {
            return Err(CoreError::InvalidRequest("customer email is invalid".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub order_id: String,
    pub schedule_id: ScheduleId,
    pub claim_session_id: SessionId,
    pub customer: Customer,
    /// Payment-gateway reference, set once a payment has been created.
    pub reference_number: Option<String>,
    /// When the payment-failure e-mail was queued. Guards against a second
    /// e-mail for the same failed booking.
    pub failure_notified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub order_id: String,
    pub schedule_id: ScheduleId,
    pub claim_session_id: SessionId,
    pub customer: Customer,
    pub created_at: DateTime<Utc>,
}
