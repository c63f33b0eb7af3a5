use crate::backfill::{InspectToxicPosts, ScanOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Drive the backfill scanner on a fixed interval until `shutdown` flips.
///
/// Runs are sequential: a run that outlasts the interval delays the next
/// tick instead of overlapping it.
pub async fn run_backfill(
    scanner: Arc<InspectToxicPosts>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut timer = interval(every);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = timer.tick() => {
                match scanner.execute().await {
                    Ok(report) => match report.outcome {
                        ScanOutcome::Idle => log::debug!("Backfill is disabled"),
                        outcome => log::info!(
                            "Backfill run: {:?}, retried {}, scanned {}, {} failed, checkpoint {}",
                            outcome,
                            report.retried,
                            report.scanned,
                            report.failed.len(),
                            report.checkpoint
                        ),
                    },
                    Err(e) => log::error!("Backfill run failed: {e:#}"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    log::info!("Backfill scheduler stopped");
}
