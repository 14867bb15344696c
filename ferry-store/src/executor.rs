//! Transactional executor.
//!
//! Every unit of work that touches the ledger, claim sessions or tickets runs
//! through [`TxExecutor`]: one transaction per attempt, rollback on error,
//! timeout or panic, and replay on transient failures only.

use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use ferry_core::{CoreError, CoreResult, Database, UnitOfWork};

use crate::app_config::ExecutorConfig;
use crate::retry::{retry_with_predicate, RetryPolicy};

#[derive(Debug, Default)]
struct ExecutorStats {
    executions: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    panics: AtomicU64,
    total_micros: AtomicU64,
}

/// Point-in-time copy of the executor counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub executions: u64,
    pub commits: u64,
    pub rollbacks: u64,
    pub retries: u64,
    pub timeouts: u64,
    pub panics: u64,
    pub average_duration: Duration,
}

#[derive(Clone)]
pub struct TxExecutor {
    db: Arc<dyn Database>,
    policy: RetryPolicy,
    timeout: Duration,
    stats: Arc<ExecutorStats>,
}

impl TxExecutor {
    pub fn new(db: Arc<dyn Database>, config: &ExecutorConfig) -> Self {
        Self {
            db,
            policy: RetryPolicy::from_config(config),
            timeout: config.timeout(),
            stats: Arc::new(ExecutorStats::default()),
        }
    }

    /// Runs `work` once. Failures of any kind are returned as-is.
    pub async fn execute<W: UnitOfWork>(&self, work: &W) -> CoreResult<W::Output> {
        self.attempt(work).await
    }

    /// Runs `work`, replaying it from a fresh transaction while it fails with
    /// [`CoreError::Transient`]. Business errors are returned after one attempt.
    pub async fn execute_with_retry<W: UnitOfWork>(&self, work: &W) -> CoreResult<W::Output> {
        retry_with_predicate(
            &self.policy,
            || self.attempt(work),
            CoreError::is_retryable,
            |attempt, err| {
                self.stats.retries.fetch_add(1, Ordering::Relaxed);
                debug!(unit = work.name(), attempt, error = %err, "replaying unit of work");
            },
        )
        .await
    }

    pub fn stats(&self) -> StatsSnapshot {
        let executions = self.stats.executions.load(Ordering::Relaxed);
        let total_micros = self.stats.total_micros.load(Ordering::Relaxed);
        let average_duration = if executions == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(total_micros / executions)
        };

        StatsSnapshot {
            executions,
            commits: self.stats.commits.load(Ordering::Relaxed),
            rollbacks: self.stats.rollbacks.load(Ordering::Relaxed),
            retries: self.stats.retries.load(Ordering::Relaxed),
            timeouts: self.stats.timeouts.load(Ordering::Relaxed),
            panics: self.stats.panics.load(Ordering::Relaxed),
            average_duration,
        }
    }

    async fn attempt<W: UnitOfWork>(&self, work: &W) -> CoreResult<W::Output> {
        let started = Instant::now();
        self.stats.executions.fetch_add(1, Ordering::Relaxed);

        // The transaction lives inside this future. Timeout or unwinding drops
        // it, and dropping an uncommitted transaction rolls it back.
        let unit = async {
            let mut tx = self.db.begin().await?;
            match work.run(tx.as_mut()).await {
                Ok(output) => {
                    tx.commit().await.map_err(|err| {
                        error!(unit = work.name(), error = %err, "commit failed after successful unit of work");
                        match err {
                            CoreError::Fatal(msg) => CoreError::Fatal(msg),
                            other => CoreError::Fatal(format!("commit failed: {other}")),
                        }
                    })?;
                    Ok(output)
                }
                Err(err) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(unit = work.name(), error = %rollback_err, "rollback failed");
                    }
                    Err(err)
                }
            }
        };

        let outcome = tokio::time::timeout(self.timeout, AssertUnwindSafe(unit).catch_unwind()).await;

        let result = match outcome {
            Err(_) => {
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(unit = work.name(), timeout_ms = self.timeout.as_millis() as u64, "transaction timed out");
                Err(CoreError::Transient(format!(
                    "{} timed out after {:?}",
                    work.name(),
                    self.timeout
                )))
            }
            Ok(Err(panic)) => {
                self.stats.panics.fetch_add(1, Ordering::Relaxed);
                let message = panic_message(panic.as_ref());
                error!(unit = work.name(), panic = %message, "unit of work panicked, transaction rolled back");
                Err(CoreError::Fatal(format!("{} panicked: {message}", work.name())))
            }
            Ok(Ok(result)) => result,
        };

        match &result {
            Ok(_) => self.stats.commits.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.stats.rollbacks.fetch_add(1, Ordering::Relaxed),
        };
        self.stats
            .total_micros
            .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);

        result
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
