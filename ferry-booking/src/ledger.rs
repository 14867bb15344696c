//! Capacity ledger operations. Every function here runs inside the caller's
//! transaction; none of them opens or commits one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use ferry_core::{
    Availability, CapacityLedger, ClassId, Clock, CoreError, CoreResult, ScheduleId, Transaction,
    UnitOfWork,
};

/// Locks the ledger row for the pair and fails with `Conflict` unless
/// `requested` more tickets fit. The lock is held until the transaction ends.
pub async fn lock_and_check(
    tx: &mut dyn Transaction,
    schedule_id: ScheduleId,
    class_id: ClassId,
    requested: i64,
    now: DateTime<Utc>,
) -> CoreResult<CapacityLedger> {
    let ledger = tx.lock_ledger(schedule_id, class_id).await?;
    let live = tx.count_live_tickets(schedule_id, class_id, now).await?;
    let available = ledger.ensure_available(live, requested)?;
    debug!(schedule_id, class_id, live, available, requested, "capacity check passed");
    Ok(ledger)
}

/// Hands `amount` slots back to the pair.
pub async fn restore(
    tx: &mut dyn Transaction,
    schedule_id: ScheduleId,
    class_id: ClassId,
    amount: i64,
) -> CoreResult<()> {
    if amount <= 0 {
        return Err(CoreError::InvalidRequest(format!(
            "restore amount must be positive, got {amount}"
        )));
    }
    tx.restore_quota(schedule_id, class_id, amount).await
}

/// Classes already restored within one reconciliation.
#[derive(Debug, Default)]
pub struct RestoredClasses {
    done: BTreeSet<ClassId>,
}

impl RestoredClasses {
    /// Restores the pair unless this reconciliation already did.
    /// Returns whether a restore happened.
    pub async fn restore_once(
        &mut self,
        tx: &mut dyn Transaction,
        schedule_id: ScheduleId,
        class_id: ClassId,
        amount: i64,
    ) -> CoreResult<bool> {
        if self.done.contains(&class_id) {
            return Ok(false);
        }
        restore(tx, schedule_id, class_id, amount).await?;
        self.done.insert(class_id);
        Ok(true)
    }
}

/// Unlocked availability read for display.
pub struct ReadAvailability {
    pub schedule_id: ScheduleId,
    pub class_id: ClassId,
    pub clock: Arc<dyn Clock>,
}

#[async_trait]
impl UnitOfWork for ReadAvailability {
    type Output = Availability;

    fn name(&self) -> &'static str {
        "read_availability"
    }

    async fn run(&self, tx: &mut dyn Transaction) -> CoreResult<Availability> {
        let ledger = tx
            .read_ledger(self.schedule_id, self.class_id)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!(
                    "capacity ledger for schedule {} class {}",
                    self.schedule_id, self.class_id
                ))
            })?;
        let live = tx
            .count_live_tickets(self.schedule_id, self.class_id, self.clock.now())
            .await?;
        Ok(Availability::from_ledger(&ledger, live))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::{Database, NewClaimSession, NewTicket, SystemClock, TicketType};
    use ferry_store::InMemoryDatabase;
    use uuid::Uuid;

    async fn db_with_quota(quota: i64) -> InMemoryDatabase {
        let db = InMemoryDatabase::new();
        db.seed_ledger(CapacityLedger {
            schedule_id: 1,
            class_id: 3,
            total_quota: quota,
            unit_price: 50_000,
        })
        .await;
        db
    }

    async fn hold(tx: &mut dyn Transaction, count: usize, now: DateTime<Utc>) {
        let session = tx
            .insert_session(NewClaimSession {
                token: Uuid::new_v4(),
                schedule_id: 1,
                expires_at: now + chrono::Duration::minutes(13),
                created_at: now,
            })
            .await
            .unwrap();
        let drafts = vec![
            NewTicket {
                schedule_id: 1,
                class_id: 3,
                ticket_type: TicketType::Passenger,
                price: 50_000,
            };
            count
        ];
        tx.insert_tickets(session.id, &drafts).await.unwrap();
    }

    #[tokio::test]
    async fn check_passes_until_quota_is_used() {
        let db = db_with_quota(2).await;
        let now = Utc::now();
        let mut tx = db.begin().await.unwrap();

        lock_and_check(tx.as_mut(), 1, 3, 2, now).await.unwrap();
        hold(tx.as_mut(), 2, now).await;

        let err = lock_and_check(tx.as_mut(), 1, 3, 1, now).await.unwrap_err();
        assert_eq!(
            err,
            CoreError::Conflict {
                class_id: 3,
                available: 0,
                requested: 1
            }
        );
    }

    #[tokio::test]
    async fn missing_ledger_is_not_found() {
        let db = db_with_quota(2).await;
        let mut tx = db.begin().await.unwrap();
        let err = lock_and_check(tx.as_mut(), 1, 99, 1, Utc::now()).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn restore_once_dedupes_by_class() {
        let db = db_with_quota(2).await;
        let mut tx = db.begin().await.unwrap();
        let mut restored = RestoredClasses::default();

        assert!(restored.restore_once(tx.as_mut(), 1, 3, 2).await.unwrap());
        assert!(!restored.restore_once(tx.as_mut(), 1, 3, 2).await.unwrap());
        tx.commit().await.unwrap();

        assert_eq!(db.ledger(1, 3).await.unwrap().total_quota, 4);
    }

    #[tokio::test]
    async fn restore_rejects_non_positive_amounts() {
        let db = db_with_quota(2).await;
        let mut tx = db.begin().await.unwrap();
        assert!(matches!(
            restore(tx.as_mut(), 1, 3, 0).await,
            Err(CoreError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn availability_reports_live_and_remaining() {
        let db = db_with_quota(5).await;
        let now = Utc::now();
        {
            let mut tx = db.begin().await.unwrap();
            hold(tx.as_mut(), 3, now).await;
            tx.commit().await.unwrap();
        }

        let mut tx = db.begin().await.unwrap();
        let view = ReadAvailability {
            schedule_id: 1,
            class_id: 3,
            clock: Arc::new(SystemClock),
        }
        .run(tx.as_mut())
        .await
        .unwrap();

        assert_eq!(view.live, 3);
        assert_eq!(view.available, 2);
        assert_eq!(view.unit_price, 50_000);
    }
}
