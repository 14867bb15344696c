use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use ferry_core::{
    ClassId, Clock, CoreError, CoreResult, FareClass, NewClaimSession, NewTicket, ScheduleId,
    TicketId, Transaction, UnitOfWork,
};

use crate::ledger;

#[derive(Debug, Clone, Deserialize)]
pub struct AllocationItem {
    pub class_id: ClassId,
    pub quantity: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AllocationRequest {
    pub schedule_id: ScheduleId,
    pub items: Vec<AllocationItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationResult {
    pub session_token: Uuid,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub ticket_ids: Vec<TicketId>,
}

impl AllocationRequest {
    /// Merges items per class, in ascending class order.
    ///
    /// Zero quantities are dropped; at least one positive quantity must remain.
    pub fn quantities_by_class(&self) -> CoreResult<BTreeMap<ClassId, i64>> {
        if self.schedule_id == 0 {
            return Err(CoreError::InvalidRequest("schedule id is required".into()));
        }

        let mut merged = BTreeMap::new();
        for item in &self.items {
            if item.quantity < 0 {
                return Err(CoreError::InvalidRequest(format!(
                    "negative quantity {} for class {}",
                    item.quantity, item.class_id
                )));
            }
            if item.quantity > 0 {
                let total: &mut i64 = merged.entry(item.class_id).or_insert(0);
                *total = total.checked_add(item.quantity).ok_or_else(|| {
                    CoreError::InvalidRequest(format!(
                        "quantity for class {} is out of range",
                        item.class_id
                    ))
                })?;
            }
        }

        if merged.is_empty() {
            return Err(CoreError::InvalidRequest(
                "at least one item with a positive quantity is required".into(),
            ));
        }
        Ok(merged)
    }
}

/// Claims tickets for every requested class in one transaction, or none.
pub struct AllocateTickets {
    pub schedule_id: ScheduleId,
    /// Class metadata with the merged quantity, ascending by class id.
    pub classes: Vec<(FareClass, i64)>,
    pub hold_window: Duration,
    pub clock: Arc<dyn Clock>,
}

#[async_trait]
impl UnitOfWork for AllocateTickets {
    type Output = AllocationResult;

    fn name(&self) -> &'static str {
        "allocate_tickets"
    }

    async fn run(&self, tx: &mut dyn Transaction) -> CoreResult<AllocationResult> {
        let now = self.clock.now();

        // Ascending class order so concurrent multi-class claims cannot deadlock.
        let mut drafts = Vec::new();
        for (class, quantity) in &self.classes {
            let row = ledger::lock_and_check(tx, self.schedule_id, class.id, *quantity, now).await?;
            drafts.extend((0..*quantity).map(|_| NewTicket {
                schedule_id: self.schedule_id,
                class_id: class.id,
                ticket_type: class.ticket_type,
                price: row.unit_price,
            }));
        }

        let session = tx
            .insert_session(NewClaimSession {
                token: Uuid::new_v4(),
                schedule_id: self.schedule_id,
                expires_at: now + self.hold_window,
                created_at: now,
            })
            .await?;
        let tickets = tx.insert_tickets(session.id, &drafts).await?;

        info!(
            schedule_id = self.schedule_id,
            session = %session.token,
            tickets = tickets.len(),
            "tickets allocated"
        );

        Ok(AllocationResult {
            session_token: session.token,
            expires_at: session.expires_at,
            ticket_ids: tickets.iter().map(|t| t.id).collect(),
        })
    }
}
