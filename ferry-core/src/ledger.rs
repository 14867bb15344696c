use serde::{Deserialize, Serialize};

use crate::{ClassId, CoreError, CoreResult, ScheduleId};

/// Quota row for one (schedule, class) pair.
///
/// Consumption is never written here: it is the number of tickets that still
/// hold a slot, counted under the row lock. `total_quota` only grows, through
/// restoration after a failed payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityLedger {
    pub schedule_id: ScheduleId,
    pub class_id: ClassId,
    pub total_quota: i64,
    pub unit_price: i64,
}

impl CapacityLedger {
    pub fn available(&self, live: i64) -> i64 {
        (self.total_quota - live).max(0)
    }

    /// Fails with `Conflict` when `requested` more tickets would overrun the quota.
    pub fn ensure_available(&self, live: i64, requested: i64) -> CoreResult<i64> {
        let available = self.available(live);
        if available < requested {
            return Err(CoreError::Conflict {
                class_id: self.class_id,
                available,
                requested,
            });
        }
        Ok(available)
    }
}

/// Unlocked availability view. Display only, never an allocation decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub schedule_id: ScheduleId,
    pub class_id: ClassId,
    pub total_quota: i64,
    pub live: i64,
    pub available: i64,
    pub unit_price: i64,
}

impl Availability {
    pub fn from_ledger(ledger: &CapacityLedger, live: i64) -> Self {
        Self {
            schedule_id: ledger.schedule_id,
            class_id: ledger.class_id,
            total_quota: ledger.total_quota,
            live,
            available: ledger.available(live),
            unit_price: ledger.unit_price,
        }
    }
}
