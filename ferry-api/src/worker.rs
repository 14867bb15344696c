use ferry_booking::BookingService;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Periodically expires claim sessions whose TTL has passed. Runs until the
/// process exits.
pub async fn start_expiry_worker(service: BookingService, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(interval_secs = every.as_secs(), "expiry worker started");

    loop {
        ticker.tick().await;
        match service.expire_overdue().await {
            Ok(report) if report.failed > 0 => warn!(
                scanned = report.scanned,
                expired = report.expired,
                failed = report.failed,
                "expiry sweep finished with failures"
            ),
            Ok(report) if report.expired > 0 => info!(
                scanned = report.scanned,
                expired = report.expired,
                "expiry sweep finished"
            ),
            Ok(_) => debug!("expiry sweep found nothing overdue"),
            Err(e) => error!(error = %e, "expiry sweep failed"),
        }
    }
}
