use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use super::{cancelled, fetch_or_cancel, window, ProviderEvent, Shared};
use crate::config::ReadinessPolicy;
use crate::source::CandleSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    Applied,
    Skipped,
    Failed,
    Cancelled,
}

/// Run live ticks every `update_interval` until shutdown.
///
/// Ticks execute inline in this loop, so a slow tick delays the next one
/// instead of overlapping it; missed ticks are skipped, not bunched.
pub(crate) async fn run(
    shared: &Shared,
    source: &dyn CandleSource,
    shutdown: &mut watch::Receiver<bool>,
) {
    let period = shared.update_interval;
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancelled(shutdown) => break,
            _ = ticker.tick() => {}
        }
        if tick(shared, source, shutdown).await == TickOutcome::Cancelled {
            break;
        }
    }
}

/// One fetch, append and evict pass.
pub(crate) async fn tick(
    shared: &Shared,
    source: &dyn CandleSource,
    shutdown: &mut watch::Receiver<bool>,
) -> TickOutcome {
    // Under fail-closed the tick itself is what restores readiness.
    if !shared.is_ready() && shared.policy == ReadinessPolicy::FailOpen {
        tracing::debug!(symbol = %shared.symbol, "Live tick skipped, provider not ready");
        return TickOutcome::Skipped;
    }

    let interval_ms = shared.interval.duration_ms();
    let after_back = shared
        .read()
        .back()
        .ok()
        .map(|c| c.next_open_time(interval_ms));
    let start_time_ms = after_back
        .unwrap_or_else(|| window::window_since(shared.now_ms(), shared.window_days));

    let Some(result) = fetch_or_cancel(shared, source, start_time_ms, shutdown).await else {
        return TickOutcome::Cancelled;
    };

    match result {
        Ok(chunk) => {
            let fetched = chunk.len();
            let (appended, skipped, evicted, len) = {
                let mut buffer = shared.write();
                let (appended, skipped) = buffer.extend_ordered(chunk);
                let evicted =
                    window::evict_expired(&mut buffer, shared.now_ms(), shared.window_days);
                (appended, skipped, evicted, buffer.len())
            };

            tracing::debug!(
                symbol = %shared.symbol,
                start_time_ms,
                fetched,
                appended,
                skipped,
                evicted,
                len,
                "Live tick applied"
            );

            if shared.policy == ReadinessPolicy::FailClosed && !shared.is_ready() {
                shared.set_ready(true);
                tracing::info!(symbol = %shared.symbol, "Live tick recovered, provider ready again");
                shared.publish(ProviderEvent::Ready);
            }
            if appended > 0 || evicted > 0 {
                shared.publish(ProviderEvent::Updated { appended, evicted });
            }
            TickOutcome::Applied
        }
        Err(e) => {
            tracing::warn!(
                symbol = %shared.symbol,
                start_time_ms,
                error = %e,
                "Live tick fetch failed, retrying next tick"
            );
            shared.publish(ProviderEvent::LiveTickFailed {
                error: e.to_string(),
            });
            if shared.policy == ReadinessPolicy::FailClosed && shared.is_ready() {
                shared.set_ready(false);
                shared.publish(ProviderEvent::ReadinessLost);
            }
            TickOutcome::Failed
        }
    }
}
