use std::sync::Arc;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::model::candle::Candle;
use crate::model::interval::Interval;

/// Paginated candle history, e.g. an exchange kline endpoint.
///
/// Implementations return candles with `open_time >= since_ms` in ascending
/// order, at most `limit` of them, and an empty `Vec` once nothing more
/// exists. Retries and pacing are the caller's job.
#[async_trait]
pub trait CandleSource: Send + Sync {
    async fn fetch(
        &self,
        symbol: &str,
        interval: Interval,
        since_ms: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, FetchError>;
}

#[async_trait]
impl<T: CandleSource + ?Sized> CandleSource for Arc<T> {
    async fn fetch(
        &self,
        symbol: &str,
        interval: Interval,
        since_ms: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, FetchError> {
        (**self).fetch(symbol, interval, since_ms, limit).await
    }
}

/// Wall-clock source for window boundaries.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}
