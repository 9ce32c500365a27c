use crate::buffer::CandleBuffer;
use crate::model::interval::DAY_MS;

/// Oldest `open_time` that still belongs to a `window_days` window ending at `now_ms`.
pub fn window_since(now_ms: i64, window_days: u32) -> i64 {
    now_ms.saturating_sub(i64::from(window_days) * DAY_MS)
}

/// Evict every candle that fell out of the trailing window as of `now_ms`.
pub fn evict_expired(buffer: &mut CandleBuffer, now_ms: i64, window_days: u32) -> usize {
    if buffer.is_empty() {
        return 0;
    }
    let since = window_since(now_ms, window_days);
    let evicted = buffer.evict_before(since);
    if evicted > 0 {
        tracing::debug!(evicted, since, remaining = buffer.len(), "Evicted expired candles");
    }
    evicted
}
