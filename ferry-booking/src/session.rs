//! Claim-session lifecycle: the guarded transition helper, the polling
//! snapshot and the expiry sweep.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ferry_core::{
    ClaimSession, ClaimStatus, Clock, CoreError, CoreResult, ScheduleId, SessionId, TicketId,
    Transaction, UnitOfWork,
};
use ferry_store::TxExecutor;

/// Applies `next` through [`ClaimSession::advance`] and persists it.
pub async fn transition(
    tx: &mut dyn Transaction,
    session: &mut ClaimSession,
    next: ClaimStatus,
    now: DateTime<Utc>,
    new_expiry: Option<DateTime<Utc>>,
) -> CoreResult<()> {
    let from = session.status;
    session.advance(next, now, new_expiry)?;
    tx.update_session(session.id, session.status, session.expires_at)
        .await?;
    debug!(session = %session.token, %from, to = %next, "claim session transitioned");
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub session_token: Uuid,
    pub schedule_id: ScheduleId,
    pub status: ClaimStatus,
    pub expires_at: DateTime<Utc>,
    pub ticket_ids: Vec<TicketId>,
}

pub struct LoadSnapshot {
    pub token: Uuid,
}

#[async_trait]
impl UnitOfWork for LoadSnapshot {
    type Output = SessionSnapshot;

    fn name(&self) -> &'static str {
        "load_session_snapshot"
    }

    async fn run(&self, tx: &mut dyn Transaction) -> CoreResult<SessionSnapshot> {
        let session = tx
            .find_session_by_token(self.token)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("claim session {}", self.token)))?;
        let tickets = tx.session_tickets(session.id).await?;

        Ok(SessionSnapshot {
            session_token: session.token,
            schedule_id: session.schedule_id,
            status: session.status,
            expires_at: session.expires_at,
            ticket_ids: tickets.iter().map(|t| t.id).collect(),
        })
    }
}

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub expired: usize,
    pub failed: usize,
}

struct ListOverdue {
    clock: Arc<dyn Clock>,
    limit: i64,
}

#[async_trait]
impl UnitOfWork for ListOverdue {
    type Output = Vec<SessionId>;

    fn name(&self) -> &'static str {
        "list_overdue_sessions"
    }

    async fn run(&self, tx: &mut dyn Transaction) -> CoreResult<Vec<SessionId>> {
        tx.overdue_sessions(self.clock.now(), self.limit).await
    }
}

struct ExpireSession {
    session_id: SessionId,
    clock: Arc<dyn Clock>,
}

#[async_trait]
impl UnitOfWork for ExpireSession {
    type Output = bool;

    fn name(&self) -> &'static str {
        "expire_session"
    }

    async fn run(&self, tx: &mut dyn Transaction) -> CoreResult<bool> {
        let now = self.clock.now();
        let Some(mut session) = tx.lock_session(self.session_id).await? else {
            return Ok(false);
        };
        // Re-checked under the row lock: a finalizer or reconciler may have won.
        if session.status.is_terminal() || !session.is_overdue(now) {
            return Ok(false);
        }
        transition(tx, &mut session, ClaimStatus::Expired, now, None).await?;
        Ok(true)
    }
}

/// Marks up to `batch_size` overdue sessions `Expired`, one short
/// transaction each. Never touches ledger rows and never retries: a session
/// that fails here is picked up again by the next pass.
pub async fn expire_overdue(
    executor: &TxExecutor,
    clock: Arc<dyn Clock>,
    batch_size: i64,
) -> CoreResult<SweepReport> {
    let candidates = executor
        .execute(&ListOverdue {
            clock: clock.clone(),
            limit: batch_size,
        })
        .await?;

    let mut report = SweepReport {
        scanned: candidates.len(),
        ..SweepReport::default()
    };

    for session_id in candidates {
        let unit = ExpireSession {
            session_id,
            clock: clock.clone(),
        };
        match executor.execute(&unit).await {
            Ok(true) => report.expired += 1,
            Ok(false) => {}
            Err(err) => {
                report.failed += 1;
                warn!(session_id, error = %err, "failed to expire claim session");
            }
        }
    }

    if report.scanned > 0 {
        info!(
            scanned = report.scanned,
            expired = report.expired,
            failed = report.failed,
            "expiry sweep finished"
        );
    }
    Ok(report)
}
