use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{CoreError, CoreResult, ScheduleId, SessionId};

/// Lifecycle of a claim session.
///
/// ```text
/// PendingData ──► PendingPayment ──► Confirmed
///      │                │
///      │                ├──────────► Cancelled
///      ▼                ▼
///   Expired  ◄──────────┘
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
    PendingData,
    PendingPayment,
    Confirmed,
    Expired,
    Cancelled,
}

impl ClaimStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::PendingData => "PENDING_DATA",
            ClaimStatus::PendingPayment => "PENDING_PAYMENT",
            ClaimStatus::Confirmed => "CONFIRMED",
            ClaimStatus::Expired => "EXPIRED",
            ClaimStatus::Cancelled => "CANCELLED",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClaimStatus::Confirmed | ClaimStatus::Expired | ClaimStatus::Cancelled
        )
    }

    pub const fn can_transition_to(&self, next: ClaimStatus) -> bool {
        matches!(
            (self, next),
            (ClaimStatus::PendingData, ClaimStatus::PendingPayment)
                | (ClaimStatus::PendingData, ClaimStatus::Expired)
                | (ClaimStatus::PendingPayment, ClaimStatus::Confirmed)
                | (ClaimStatus::PendingPayment, ClaimStatus::Cancelled)
                | (ClaimStatus::PendingPayment, ClaimStatus::Expired)
        )
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClaimStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING_DATA" => Ok(ClaimStatus::PendingData),
            "PENDING_PAYMENT" => Ok(ClaimStatus::PendingPayment),
            "CONFIRMED" => Ok(ClaimStatus::Confirmed),
            "EXPIRED" => Ok(ClaimStatus::Expired),
            "CANCELLED" => Ok(ClaimStatus::Cancelled),
            other => Err(CoreError::Fatal(format!("unknown claim status {other:?} in storage"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSession {
    pub id: SessionId,
    pub token: Uuid,
    pub schedule_id: ScheduleId,
    pub status: ClaimStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ClaimSession {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Whether this session's tickets occupy ledger slots at `now`.
    ///
    /// Pending sessions stop counting the moment their TTL passes, before the
    /// sweep marks them. Cancelled sessions keep counting: their slots are
    /// handed back by quota restoration instead.
    pub fn holds_capacity(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            ClaimStatus::PendingData | ClaimStatus::PendingPayment => !self.is_overdue(now),
            ClaimStatus::Confirmed | ClaimStatus::Cancelled => true,
            ClaimStatus::Expired => false,
        }
    }

    /// Single entry point for every status change.
    ///
    /// Moving to anything but `Expired` is refused once the TTL has passed, so
    /// a late write can never resurrect a session the sweep is about to expire.
    pub fn advance(
        &mut self,
        next: ClaimStatus,
        now: DateTime<Utc>,
        new_expiry: Option<DateTime<Utc>>,
    ) -> CoreResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidState(format!(
                "claim session {} cannot move from {} to {}",
                self.token, self.status, next
            )));
        }
        if next != ClaimStatus::Expired && self.is_overdue(now) {
            return Err(CoreError::Expired(format!(
                "claim session {} expired at {}",
                self.token, self.expires_at
            )));
        }
        self.status = next;
        if let Some(expiry) = new_expiry {
            self.expires_at = expiry;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NewClaimSession {
    pub token: Uuid,
    pub schedule_id: ScheduleId,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(status: ClaimStatus, expires_in: Duration) -> (ClaimSession, DateTime<Utc>) {
        let now = Utc::now();
        (
            ClaimSession {
                id: 1,
                token: Uuid::new_v4(),
                schedule_id: 10,
                status,
                expires_at: now + expires_in,
                created_at: now,
            },
            now,
        )
    }

    #[test]
    fn happy_path_transitions() {
        let (mut s, now) = session(ClaimStatus::PendingData, Duration::minutes(13));
        let extended = s.expires_at + Duration::minutes(8);
        s.advance(ClaimStatus::PendingPayment, now, Some(extended)).unwrap();
        assert_eq!(s.status, ClaimStatus::PendingPayment);
        assert_eq!(s.expires_at, extended);

        s.advance(ClaimStatus::Confirmed, now, None).unwrap();
        assert!(s.status.is_terminal());
    }

    #[test]
    fn terminal_states_do_not_move() {
        for status in [ClaimStatus::Confirmed, ClaimStatus::Expired, ClaimStatus::Cancelled] {
            let (mut s, now) = session(status, Duration::minutes(5));
            let err = s.advance(ClaimStatus::PendingPayment, now, None).unwrap_err();
            assert!(matches!(err, CoreError::InvalidState(_)));
        }
    }

    #[test]
    fn pending_data_cannot_be_confirmed_directly() {
        let (mut s, now) = session(ClaimStatus::PendingData, Duration::minutes(5));
        assert!(matches!(
            s.advance(ClaimStatus::Confirmed, now, None),
            Err(CoreError::InvalidState(_))
        ));
    }

    #[test]
    fn overdue_session_only_moves_to_expired() {
        let (mut s, now) = session(ClaimStatus::PendingData, Duration::seconds(-1));
        let err = s.advance(ClaimStatus::PendingPayment, now, None).unwrap_err();
        assert!(matches!(err, CoreError::Expired(_)));
        assert_eq!(s.status, ClaimStatus::PendingData);

        s.advance(ClaimStatus::Expired, now, None).unwrap();
        assert_eq!(s.status, ClaimStatus::Expired);
    }

    #[test]
    fn capacity_holding_by_status() {
        let (live, now) = session(ClaimStatus::PendingPayment, Duration::minutes(1));
        assert!(live.holds_capacity(now));

        let (overdue, now) = session(ClaimStatus::PendingData, Duration::minutes(-1));
        assert!(!overdue.holds_capacity(now));

        let (cancelled, now) = session(ClaimStatus::Cancelled, Duration::minutes(-30));
        assert!(cancelled.holds_capacity(now));

        let (expired, now) = session(ClaimStatus::Expired, Duration::minutes(30));
        assert!(!expired.holds_capacity(now));
    }

    #[test]
    fn status_round_trips_through_storage_text() {
        for status in [
            ClaimStatus::PendingData,
            ClaimStatus::PendingPayment,
            ClaimStatus::Confirmed,
            ClaimStatus::Expired,
            ClaimStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<ClaimStatus>().unwrap(), status);
        }
        assert!("HELD".parse::<ClaimStatus>().is_err());
    }
}
