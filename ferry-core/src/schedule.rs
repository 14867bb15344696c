use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ClassId, CoreResult, ScheduleId, TicketType};

/// Sailing metadata needed to build order ids. Owned by administrative CRUD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub ship_alias: String,
    pub departure_harbor_alias: String,
    pub arrival_harbor_alias: String,
    pub departure_at: DateTime<Utc>,
}

/// Fare class metadata: the seat prefix and what kind of ticket it sells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FareClass {
    pub id: ClassId,
    pub alias: String,
    pub ticket_type: TicketType,
}

#[async_trait]
pub trait ScheduleLookup: Send + Sync {
    /// `NotFound` when the schedule does not exist.
    async fn find_by_id(&self, schedule_id: ScheduleId) -> CoreResult<Schedule>;

    /// `NotFound` when the class does not exist.
    async fn find_class(&self, class_id: ClassId) -> CoreResult<FareClass>;
}
