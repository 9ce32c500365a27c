//! Trailing-window candle provider.
//!
//! A [`CandleWindowProvider`] owns one [`CandleBuffer`] and one background
//! task. The task backfills the configured window page by page, marks the
//! provider ready, then keeps the window current on a fixed period. All
//! buffer mutation happens on that task; consumers only read.

pub mod backfill;
pub mod live;
pub mod window;

use std::ops::Deref;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::buffer::CandleBuffer;
use crate::config::{ProviderConfig, ReadinessPolicy};
use crate::error::{FetchError, ProviderError, Result};
use crate::model::candle::Candle;
use crate::model::interval::Interval;
use crate::source::{CandleSource, Clock, SystemClock};

use self::backfill::{BackfillOutcome, BackfillReport};

const EVENT_CHANNEL_CAPACITY: usize = 64;
/// Upper bound on the up-front buffer reservation; larger windows grow on demand.
const MAX_PREALLOCATED_CANDLES: usize = 16 * 1024;

/// Background activity a consumer may want to react to.
///
/// Fetch failures never surface as errors from the provider's API; this
/// channel is where they become observable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// Backfill finished, possibly with partial data. Readiness follows.
    BackfillFinished(BackfillReport),
    Ready,
    /// A live tick changed the buffer.
    Updated { appended: usize, evicted: usize },
    LiveTickFailed { error: String },
    /// Fail-closed policy only: a failed tick withdrew readiness.
    ReadinessLost,
}

pub(crate) struct Shared {
    pub(crate) symbol: String,
    pub(crate) interval: Interval,
    pub(crate) window_days: u32,
    pub(crate) limit: usize,
    pub(crate) backfill_pause: Duration,
    pub(crate) update_interval: Duration,
    pub(crate) policy: ReadinessPolicy,
    pub(crate) clock: Arc<dyn Clock>,
    buffer: RwLock<CandleBuffer>,
    ready_tx: watch::Sender<bool>,
    events_tx: broadcast::Sender<ProviderEvent>,
}

impl Shared {
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, CandleBuffer> {
        self.buffer.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, CandleBuffer> {
        self.buffer.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub(crate) fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    pub(crate) fn set_ready(&self, ready: bool) {
        self.ready_tx.send_if_modified(|current| {
            let changed = *current != ready;
            *current = ready;
            changed
        });
    }

    pub(crate) fn publish(&self, event: ProviderEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }

    fn finish_backfill(
        &self,
        report: BackfillReport,
        report_tx: &watch::Sender<Option<BackfillReport>>,
    ) {
        // Readiness first, so whoever wakes on the report already sees it.
        self.set_ready(true);
        report_tx.send_replace(Some(report.clone()));
        self.publish(ProviderEvent::BackfillFinished(report));
        self.publish(ProviderEvent::Ready);
    }
}

/// Read-only view over the live buffer.
///
/// Holds the buffer's read lock for as long as it lives, which stalls the
/// background writer. Keep it short-lived; use
/// [`CandleWindowProvider::snapshot`] for anything long-running.
pub struct WindowView<'a> {
    guard: RwLockReadGuard<'a, CandleBuffer>,
}

impl Deref for WindowView<'_> {
    type Target = CandleBuffer;

    fn deref(&self) -> &CandleBuffer {
        &self.guard
    }
}

pub struct CandleWindowProvider {
    shared: Arc<Shared>,
    ready_rx: watch::Receiver<bool>,
    report_rx: watch::Receiver<Option<BackfillReport>>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl CandleWindowProvider {
    /// Validate `config` and start backfilling in the background.
    ///
    /// Fails synchronously only on bad configuration; fetch problems are
    /// reported through [`ProviderEvent`]s. Must be called inside a tokio
    /// runtime.
    pub fn new<S>(config: ProviderConfig, source: S) -> Result<Self>
    where
        S: CandleSource + 'static,
    {
        Self::with_clock(config, source, Arc::new(SystemClock))
    }

    pub fn with_clock<S>(config: ProviderConfig, source: S, clock: Arc<dyn Clock>) -> Result<Self>
    where
        S: CandleSource + 'static,
    {
        let interval = config.check()?;

        let (ready_tx, ready_rx) = watch::channel(false);
        let (report_tx, report_rx) = watch::channel(None);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            symbol: config.symbol.trim().to_string(),
            interval,
            window_days: config.window_days,
            limit: config.limit_per_fetch,
            backfill_pause: config.backfill_pause(),
            update_interval: config.update_interval(),
            policy: config.readiness_policy,
            clock,
            buffer: RwLock::new(CandleBuffer::with_capacity(
                interval
                    .candles_per_days(config.window_days)
                    .min(MAX_PREALLOCATED_CANDLES),
            )),
            ready_tx,
            events_tx,
        });

        tracing::info!(
            symbol = %shared.symbol,
            interval = %interval,
            window_days = shared.window_days,
            limit = shared.limit,
            update_interval_ms = config.update_interval_ms,
            policy = ?shared.policy,
            "Starting candle window provider"
        );

        let task = tokio::spawn(run(
            Arc::clone(&shared),
            Arc::new(source),
            report_tx,
            shutdown_rx,
        ));

        Ok(Self {
            shared,
            ready_rx,
            report_rx,
            shutdown_tx,
            task: Some(task),
        })
    }

    pub fn symbol(&self) -> &str {
        &self.shared.symbol
    }

    pub fn interval(&self) -> Interval {
        self.shared.interval
    }

    pub fn window_days(&self) -> u32 {
        self.shared.window_days
    }

    /// `true` once backfill has finished (and, under the fail-closed
    /// policy, while the latest live tick succeeded).
    pub fn is_data_available(&self) -> bool {
        *self.ready_rx.borrow()
    }

    /// Resolve once the initial backfill has finished, with its report.
    ///
    /// Resolves immediately if backfill is already done. Fails with
    /// [`ProviderError::Stopped`] if the background task exited first.
    pub async fn wait_until_ready(&self) -> Result<BackfillReport> {
        let mut rx = self.report_rx.clone();
        let report = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| ProviderError::Stopped)?;
        (*report).clone().ok_or(ProviderError::Stopped)
    }

    /// Report of the initial backfill, if it has finished.
    pub fn backfill_report(&self) -> Option<BackfillReport> {
        self.report_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.shared.events_tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.shared.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.read().is_empty()
    }

    /// Candle at `position`, counted from the oldest.
    pub fn get(&self, position: usize) -> Result<Candle> {
        self.shared.read().at(position).cloned()
    }

    pub fn first(&self) -> Result<Candle> {
        self.shared.read().front().cloned()
    }

    pub fn last(&self) -> Result<Candle> {
        self.shared.read().back().cloned()
    }

    /// Point-in-time copy of the whole window, oldest first.
    ///
    /// Copies every candle; for a 7 day window of 1m candles that is about
    /// ten thousand records.
    pub fn snapshot(&self) -> Vec<Candle> {
        self.shared.read().to_vec()
    }

    /// Borrow the live buffer read-only. See [`WindowView`].
    pub fn view(&self) -> WindowView<'_> {
        WindowView {
            guard: self.shared.read(),
        }
    }

    /// Stop the background task and wait for it to exit.
    ///
    /// Any fetch in flight is abandoned and its result discarded; once this
    /// returns the buffer is no longer mutated.
    pub async fn shutdown(mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!(symbol = %self.shared.symbol, error = %e, "Provider task panicked");
                }
            }
        }
        tracing::info!(symbol = %self.shared.symbol, "Candle window provider stopped");
    }
}

impl Drop for CandleWindowProvider {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.shutdown_tx.send_replace(true);
            task.abort();
        }
    }
}

/// Resolves once shutdown is requested or the provider is gone.
pub(crate) async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// One page from the source, or `None` if shutdown won the race.
pub(crate) async fn fetch_or_cancel(
    shared: &Shared,
    source: &dyn CandleSource,
    since_ms: i64,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<std::result::Result<Vec<Candle>, FetchError>> {
    tokio::select! {
        biased;
        _ = cancelled(shutdown) => None,
        result = source.fetch(&shared.symbol, shared.interval, since_ms, shared.limit) => Some(result),
    }
}

async fn run(
    shared: Arc<Shared>,
    source: Arc<dyn CandleSource>,
    report_tx: watch::Sender<Option<BackfillReport>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let report = match backfill::run(&shared, source.as_ref(), &mut shutdown).await {
        BackfillOutcome::Cancelled => {
            tracing::info!(symbol = %shared.symbol, "Backfill cancelled by shutdown");
            return;
        }
        BackfillOutcome::Finished(report) => report,
    };

    let evicted = {
        let now = shared.now_ms();
        window::evict_expired(&mut shared.write(), now, shared.window_days)
    };
    let report = BackfillReport {
        evicted,
        retained: shared.read().len(),
        ..report
    };

    match &report.error {
        Some(error) => tracing::warn!(
            symbol = %shared.symbol,
            loaded = report.loaded,
            retained = report.retained,
            error = %error,
            "Backfill ended early, provider ready with partial window"
        ),
        None => tracing::info!(
            symbol = %shared.symbol,
            loaded = report.loaded,
            retained = report.retained,
            fetches = report.fetches,
            stop = ?report.stop,
            "Backfill complete"
        ),
    }
    shared.finish_backfill(report, &report_tx);
    drop(report_tx);

    live::run(&shared, source.as_ref(), &mut shutdown).await;
    tracing::debug!(symbol = %shared.symbol, "Live updater exited");
}

#[cfg(test)]
impl Shared {
    pub(crate) fn for_test(
        window_days: u32,
        policy: ReadinessPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (ready_tx, _) = watch::channel(false);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            symbol: "BTCUSDT".to_string(),
            interval: Interval::M1,
            window_days,
            limit: 1000,
            backfill_pause: Duration::from_millis(500),
            update_interval: Duration::from_secs(10),
            policy,
            clock,
            buffer: RwLock::new(CandleBuffer::new()),
            ready_tx,
            events_tx,
        }
    }
}
