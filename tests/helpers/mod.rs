#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use candle_window::{Candle, CandleSource, Clock, FetchError, Interval};
use rust_decimal::Decimal;

pub const MINUTE: i64 = 60_000;
pub const DAY: i64 = 86_400_000;
/// Fixed "now" for tests: an exact day boundary far from the epoch.
pub const NOW: i64 = 20_000 * DAY;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub symbol: String,
    pub interval: Interval,
    pub since_ms: i64,
    pub limit: usize,
    /// Tokio time at which the fetch started.
    pub at: tokio::time::Instant,
}

/// In-memory source that replays scripted pages in order, then reports
/// exhaustion with empty pages.
#[derive(Default)]
pub struct ScriptedSource {
    pages: Mutex<VecDeque<Result<Vec<Candle>, FetchError>>>,
    calls: Mutex<Vec<FetchCall>>,
    delay: Option<Duration>,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_pages(pages: Vec<Result<Vec<Candle>, FetchError>>) -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(pages.into()),
            ..Self::default()
        })
    }

    /// Every fetch sleeps for `delay` (tokio time) before answering.
    pub fn slow(delay: Duration, pages: Vec<Result<Vec<Candle>, FetchError>>) -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(pages.into()),
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn push(&self, page: Result<Vec<Candle>, FetchError>) {
        self.pages.lock().unwrap().push_back(page);
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CandleSource for ScriptedSource {
    async fn fetch(
        &self,
        symbol: &str,
        interval: Interval,
        since_ms: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, FetchError> {
        self.calls.lock().unwrap().push(FetchCall {
            symbol: symbol.to_string(),
            interval,
            since_ms,
            limit,
            at: tokio::time::Instant::now(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.pages.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(Vec::new()))
    }
}

pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn at(now_ms: i64) -> Arc<Self> {
        Arc::new(Self(AtomicI64::new(now_ms)))
    }

    pub fn advance(&self, ms: i64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn candle(open_time: i64) -> Candle {
    let price = Decimal::from(open_time / MINUTE % 1000 + 100);
    Candle {
        open_time,
        open: price,
        high: price + Decimal::ONE,
        low: price - Decimal::ONE,
        close: price,
        volume: Decimal::new(15, 1),
    }
}

/// `count` candles spaced `step` apart, starting at `start`.
pub fn candles(start: i64, count: usize, step: i64) -> Vec<Candle> {
    (0..count as i64).map(|i| candle(start + i * step)).collect()
}

pub fn assert_ascending(candles: &[Candle]) {
    assert!(
        candles.windows(2).all(|w| w[0].open_time <= w[1].open_time),
        "candles are not in ascending open_time order"
    );
}
