use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use super::orchestrator::BankingService;

/// Expires stale payment sessions on a fixed interval until `shutdown` flips to true.
/// Several sweepers may run at once; expiry only ever touches pending rows.
pub async fn run_session_sweeper(
    service: BankingService,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = every.as_secs(), "Payment session sweeper started");

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match service.expire_stale_sessions().await {
                    Ok(0) => debug!("No stale payment sessions"),
                    Ok(expired) => debug!(expired, "Sweep finished"),
                    Err(e) => error!(error = %e, "Payment session sweep failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("Payment session sweeper stopped");
}
