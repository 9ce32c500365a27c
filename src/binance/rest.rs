use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::error::FetchError;
use crate::model::candle::Candle;
use crate::model::interval::Interval;
use crate::source::CandleSource;

use super::types::{BinanceApiErrorResponse, BinanceKline, ServerTimeResponse};

/// Binance caps a single klines request at this many rows.
pub const MAX_KLINES_PER_REQUEST: usize = 1000;

const REQUEST_WEIGHT_PER_MINUTE: u64 = 1200;

pub struct BinanceRestClient {
    http: reqwest::Client,
    base_url: String,
    // Simple rate tracker: request count in current minute window
    request_count: AtomicU64,
    window_start: Mutex<Instant>,
}

impl BinanceRestClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            request_count: AtomicU64::new(0),
            window_start: Mutex::new(Instant::now()),
        }
    }

    fn check_rate_limit(&self) {
        let mut start = self
            .window_start
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if start.elapsed().as_secs() >= 60 {
            *start = Instant::now();
            self.request_count.store(0, Ordering::Relaxed);
        }
        let count = self.request_count.fetch_add(1, Ordering::Relaxed);
        if count > REQUEST_WEIGHT_PER_MINUTE * 8 / 10 {
            tracing::warn!(count, "Approaching rate limit (80% of 1200/min)");
        }
    }

    pub async fn ping(&self) -> Result<()> {
        let url = format!("{}/api/v3/ping", self.base_url);
        self.http
            .get(&url)
            .send()
            .await
            .context("ping failed")?
            .error_for_status()
            .context("ping returned error status")?;
        Ok(())
    }

    pub async fn server_time(&self) -> Result<i64> {
        let url = format!("{}/api/v3/time", self.base_url);
        let resp: ServerTimeResponse = self
            .http
            .get(&url)
            .send()
            .await
            .context("server_time failed")?
            .json()
            .await
            .context("server_time JSON parse failed")?;
        Ok(resp.server_time)
    }

    /// Fetch up to `limit` klines with `open_time >= start_time_ms`, oldest first.
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: Interval,
        start_time_ms: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, FetchError> {
        self.check_rate_limit();

        let limit = limit.clamp(1, MAX_KLINES_PER_REQUEST);
        let url = format!("{}/api/v3/klines", self.base_url);
        let start_s = start_time_ms.to_string();
        let limit_s = limit.to_string();

        tracing::debug!(
            symbol,
            interval = %interval,
            start_time_ms,
            limit,
            "Requesting klines"
        );

        let resp = self
            .http
            .get(&url)
            .query(&[
                ("symbol", symbol),
                ("interval", interval.as_str()),
                ("startTime", start_s.as_str()),
                ("limit", limit_s.as_str()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            if let Ok(err) = serde_json::from_str::<BinanceApiErrorResponse>(&body) {
                return Err(FetchError::Api {
                    code: err.code,
                    msg: err.msg,
                });
            }
            return Err(FetchError::Unavailable(format!(
                "klines request failed ({}): {}",
                status, body
            )));
        }

        let body = resp.bytes().await?;
        let rows: Vec<BinanceKline> = serde_json::from_slice(&body)?;
        Ok(rows.into_iter().map(Candle::from).collect())
    }
}

#[async_trait]
impl CandleSource for BinanceRestClient {
    async fn fetch(
        &self,
        symbol: &str,
        interval: Interval,
        since_ms: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, FetchError> {
        self.get_klines(symbol, interval, since_ms, limit).await
    }
}
