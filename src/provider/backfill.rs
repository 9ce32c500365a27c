use tokio::sync::watch;

use super::{cancelled, fetch_or_cancel, window, Shared};
use crate::source::CandleSource;

/// Why the backfill loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillStop {
    /// The source returned an empty page.
    SourceExhausted,
    /// The oldest candle reaches the window start and the last page was short.
    WindowCovered,
    /// The next page would start after the current time.
    CaughtUp,
    /// A page contained nothing newer than what was already loaded.
    NoProgress,
    FetchFailed,
}

/// Outcome of the initial history load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillReport {
    /// Window start the load aimed for.
    pub since: i64,
    pub fetches: usize,
    /// Candles appended to the buffer.
    pub loaded: usize,
    /// Candles dropped for not advancing the buffer.
    pub skipped: usize,
    /// Candles removed by the post-backfill window pass.
    pub evicted: usize,
    /// Buffer length when the provider became ready.
    pub retained: usize,
    pub stop: BackfillStop,
    /// Set when a fetch failure cut the load short.
    pub error: Option<String>,
}

impl BackfillReport {
    /// `false` when the window may be missing history because a fetch failed.
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

pub(crate) enum BackfillOutcome {
    Finished(BackfillReport),
    Cancelled,
}

/// Page through the source from the window start until it is covered.
///
/// A fetch error ends the loop without retry; whatever was loaded stays.
pub(crate) async fn run(
    shared: &Shared,
    source: &dyn CandleSource,
    shutdown: &mut watch::Receiver<bool>,
) -> BackfillOutcome {
    let interval_ms = shared.interval.duration_ms();
    let since = window::window_since(shared.now_ms(), shared.window_days);
    let mut next = since;
    let mut report = BackfillReport {
        since,
        fetches: 0,
        loaded: 0,
        skipped: 0,
        evicted: 0,
        retained: 0,
        stop: BackfillStop::SourceExhausted,
        error: None,
    };

    tracing::info!(symbol = %shared.symbol, since, "Backfill started");

    loop {
        let Some(result) = fetch_or_cancel(shared, source, next, shutdown).await else {
            return BackfillOutcome::Cancelled;
        };
        report.fetches += 1;

        let chunk = match result {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::error!(
                    symbol = %shared.symbol,
                    start_time_ms = next,
                    loaded = report.loaded,
                    error = %e,
                    "Backfill fetch failed"
                );
                report.stop = BackfillStop::FetchFailed;
                report.error = Some(e.to_string());
                break;
            }
        };

        let Some(last_open_time) = chunk.last().map(|c| c.open_time) else {
            report.stop = BackfillStop::SourceExhausted;
            break;
        };
        let chunk_len = chunk.len();

        let (appended, skipped, covered) = {
            let mut buffer = shared.write();
            let (appended, skipped) = buffer.extend_ordered(chunk);
            // The first bar at or after `since` may open up to one interval later.
            let covered = buffer
                .front()
                .is_ok_and(|c| c.open_time < since.saturating_add(interval_ms));
            (appended, skipped, covered)
        };
        report.loaded += appended;
        report.skipped += skipped;

        if skipped > 0 {
            tracing::debug!(symbol = %shared.symbol, skipped, "Dropped non-advancing candles");
        }
        tracing::debug!(
            symbol = %shared.symbol,
            chunk = chunk_len,
            appended,
            total = report.loaded,
            "Backfill chunk appended"
        );

        if appended == 0 {
            tracing::warn!(
                symbol = %shared.symbol,
                start_time_ms = next,
                "Backfill page added nothing new, stopping"
            );
            report.stop = BackfillStop::NoProgress;
            break;
        }

        next = next.max(last_open_time.saturating_add(interval_ms));

        if covered && chunk_len < shared.limit {
            report.stop = BackfillStop::WindowCovered;
            break;
        }
        if next > shared.now_ms() {
            report.stop = BackfillStop::CaughtUp;
            break;
        }

        tokio::select! {
            biased;
            _ = cancelled(shutdown) => return BackfillOutcome::Cancelled,
            _ = tokio::time::sleep(shared.backfill_pause) => {}
        }
    }

    BackfillOutcome::Finished(report)
}
