pub mod booking;
pub mod clock;
pub mod ledger;
pub mod notifier;
pub mod payment;
pub mod schedule;
pub mod session;
pub mod store;
pub mod ticket;

pub use booking::{Booking, Customer, NewBooking};
pub use clock::{Clock, ManualClock, SystemClock};
pub use ledger::{Availability, CapacityLedger};
pub use notifier::Notifier;
pub use payment::{GatewayTransaction, PaymentGateway, PaymentItem, PaymentRequest, PaymentStatus};
pub use schedule::{FareClass, Schedule, ScheduleLookup};
pub use session::{ClaimSession, ClaimStatus, NewClaimSession};
pub use store::{Database, Transaction, UnitOfWork};
pub use ticket::{NewTicket, PassengerDetails, Ticket, TicketType, TicketUpdate};

pub type ScheduleId = i64;
pub type ClassId = i64;
pub type SessionId = i64;
pub type TicketId = i64;
pub type BookingId = i64;

/// Error taxonomy shared by every crate in the workspace.
///
/// Only [`CoreError::Transient`] is ever retried. Business outcomes
/// (`InvalidRequest`, `NotFound`, `Conflict`, `Expired`, `InvalidState`,
/// `MissingData`) abort the transaction and reach the caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("insufficient capacity for class {class_id}: available {available}, requested {requested}")]
    Conflict {
        class_id: ClassId,
        available: i64,
        requested: i64,
    },
    #[error("expired: {0}")]
    Expired(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("missing data: {0}")]
    MissingData(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("fatal: {0}")]
    Fatal(String),
    #[error("external service error: {0}")]
    External(String),
}

impl CoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transient(_))
    }

    pub fn is_business(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidRequest(_)
                | CoreError::NotFound(_)
                | CoreError::Conflict { .. }
                | CoreError::Expired(_)
                | CoreError::InvalidState(_)
                | CoreError::MissingData(_)
        )
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_names_class_and_counts() {
        let err = CoreError::Conflict {
            class_id: 7,
            available: 0,
            requested: 1,
        };
        assert_eq!(
            err.to_string(),
            "insufficient capacity for class 7: available 0, requested 1"
        );
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(CoreError::Transient("deadlock".into()).is_retryable());
        assert!(!CoreError::Fatal("commit".into()).is_retryable());
        assert!(!CoreError::Expired("s".into()).is_retryable());
        assert!(!CoreError::Conflict {
            class_id: 1,
            available: 0,
            requested: 2
        }
        .is_retryable());
    }

    #[test]
    fn business_errors_are_classified() {
        assert!(CoreError::MissingData("ticket 3".into()).is_business());
        assert!(!CoreError::Transient("io".into()).is_business());
        assert!(!CoreError::External("gateway".into()).is_business());
    }
}
