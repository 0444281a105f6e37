use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::app::AppContext;
use crate::source::SnapshotSource;
use crate::tracker::Tracker;

pub const SLOW_OPS_LOOP: &str = "slow_ops";

/// Drive the tracker until cancelled or until a fetch fails.
///
/// Ticks never overlap: each one fetches, reconciles and publishes, then the
/// loop sleeps for the configured interval. Cancellation is observed while
/// sleeping; an in-flight fetch is allowed to finish.
pub async fn run<S>(ctx: AppContext, mut source: S, cancel: CancellationToken) -> Result<()>
where
    S: SnapshotSource,
{
    let interval = ctx.config.poll.interval;
    let mut tracker = Tracker::new(ctx.config.tracker.clone());

    info!(
        loop_name = SLOW_OPS_LOOP,
        interval = ?interval,
        "starting poller loop"
    );

    while !cancel.is_cancelled() {
        if let Err(err) = poll_once(&ctx, &mut source, &mut tracker).await {
            error!(loop_name = SLOW_OPS_LOOP, error = ?err, "poller loop terminated");
            return Err(err);
        }

        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = time::sleep(interval) => {}
        }
    }

    info!(loop_name = SLOW_OPS_LOOP, "poller loop cancelled");
    Ok(())
}

#[instrument(skip_all)]
async fn poll_once<S>(ctx: &AppContext, source: &mut S, tracker: &mut Tracker) -> Result<()>
where
    S: SnapshotSource,
{
    let start = Instant::now();

    let snapshot = match source.fetch().await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            ctx.metrics.record_success(SLOW_OPS_LOOP, false);
            ctx.metrics.inc_error(SLOW_OPS_LOOP);
            ctx.state.record_loop_failure(format!("{err:#}")).await;
            return Err(err.context("failed to fetch currentOp snapshot"));
        }
    };

    let now = Utc::now();
    let summary = tracker.reconcile(&snapshot, now, &ctx.metrics);
    if summary.skipped > 0 {
        warn!(
            skipped = summary.skipped,
            parsed = summary.parsed,
            "some currentOp entries could not be parsed"
        );
    }

    ctx.metrics.inc_parse_failures(summary.skipped);
    ctx.metrics
        .set_tracker_gauges(tracker.tracked(), tracker.history().len());
    ctx.state.publish(tracker.view(now, summary));

    let elapsed = start.elapsed();
    ctx.metrics.observe_duration(SLOW_OPS_LOOP, elapsed);
    ctx.metrics.record_success(SLOW_OPS_LOOP, true);
    ctx.state.record_loop_success().await;

    info!(
        loop_name = SLOW_OPS_LOOP,
        elapsed = ?elapsed,
        running = tracker.tracked(),
        emitted = summary.emitted,
        completed = summary.completed,
        recorded = summary.recorded,
        "loop completed successfully"
    );
    Ok(())
}
